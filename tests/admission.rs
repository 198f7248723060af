//! End-to-end admission scenarios through the middleware.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use http::header::RETRY_AFTER;
use http::StatusCode;
use turnstile::middleware::{RejectionBody, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use turnstile::{
    Admission, Bypass, ManualClock, MemoryStore, PolicyCatalog, PolicyOptions, RequestInfo,
    TurnstileConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("turnstile=debug")
        .with_test_writer()
        .try_init();
}

fn manual_store() -> (Arc<ManualClock>, Arc<MemoryStore>) {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    (clock, store)
}

fn client(last_octet: u8) -> RequestInfo {
    RequestInfo::new("GET", "/api/items")
        .with_remote_addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)))
}

fn remaining(admission: &Admission) -> u64 {
    admission.headers().unwrap()[X_RATELIMIT_REMAINING]
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

#[test]
fn scenario_a_fixed_window() {
    init_tracing();
    let (_, store) = manual_store();
    let policy = PolicyOptions::new()
        .window_ms(60_000)
        .max_requests(3)
        .fixed_window(&store)
        .unwrap();

    let counts: Vec<u64> = (0..3)
        .map(|_| {
            let admission = policy.check(&client(1));
            assert!(admission.is_admitted());
            remaining(&admission)
        })
        .collect();
    assert_eq!(counts, vec![2, 1, 0]);

    let response = policy.check(&client(1)).into_rejection().unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[RETRY_AFTER], "60");
    assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
    assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "0");

    let body: RejectionBody = serde_json::from_str(response.body()).unwrap();
    assert!(!body.success);
    assert_eq!(body.retry_after, 60);
}

#[test]
fn scenario_b_sliding_window() {
    init_tracing();
    let (clock, store) = manual_store();
    let policy = PolicyOptions::new()
        .window_ms(1_000)
        .max_requests(2)
        .sliding_window(&store)
        .unwrap();

    assert!(policy.check(&client(1)).is_admitted());
    assert!(policy.check(&client(1)).is_admitted());

    clock.set(500);
    let admission = policy.check(&client(1));
    assert!(admission.is_rejected());
    assert_eq!(admission.headers().unwrap()[RETRY_AFTER], "1");

    clock.set(1_001);
    let admission = policy.check(&client(1));
    assert!(admission.is_admitted());
    assert!(admission.headers().unwrap().get(X_RATELIMIT_RESET).is_some());
}

#[test]
fn scenario_c_token_bucket() {
    init_tracing();
    let (clock, store) = manual_store();
    let policy = PolicyOptions::new().token_bucket(&store, 5, 1.0).unwrap();

    for _ in 0..5 {
        let admission = policy.check(&client(1));
        assert!(admission.is_admitted());
        assert!(admission.headers().unwrap().get(X_RATELIMIT_RESET).is_none());
    }

    let admission = policy.check(&client(1));
    assert!(admission.is_rejected());
    assert_eq!(admission.headers().unwrap()[RETRY_AFTER], "1");

    clock.advance(2_000);
    assert!(policy.check(&client(1)).is_admitted());
    assert!(policy.check(&client(1)).is_admitted());
    assert!(policy.check(&client(1)).is_rejected());
}

#[test]
fn scenario_d_bypass() {
    init_tracing();
    let (_, store) = manual_store();
    let policy = PolicyOptions::new()
        .max_requests(1)
        .skip(Bypass::custom(|req| req.path == "/health"))
        .fixed_window(&store)
        .unwrap();

    let health = RequestInfo::new("GET", "/health")
        .with_remote_addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
    for _ in 0..20 {
        assert!(matches!(policy.check(&health), Admission::Bypass));
    }
    assert!(store.is_empty());

    // The same caller is still limited on other paths.
    assert!(policy.check(&client(1)).is_admitted());
    assert!(policy.check(&client(1)).is_rejected());
}

#[test]
fn remaining_never_increases_within_window() {
    let (clock, store) = manual_store();
    let policy = PolicyOptions::new()
        .window_ms(10_000)
        .max_requests(5)
        .fixed_window(&store)
        .unwrap();

    let mut last = u64::MAX;
    for step in 0..12 {
        clock.set(step * 500);
        let value = remaining(&policy.check(&client(1)));
        assert!(value <= last);
        last = value;
    }
}

#[test]
fn strategies_sharing_a_store_do_not_collide() {
    let (_, store) = manual_store();
    let catalog = PolicyCatalog::new(store.clone());
    let strict = catalog.strict().unwrap();
    let sliding = catalog.sliding().unwrap();
    let burst = catalog.burst().unwrap();

    assert_eq!(remaining(&strict.check(&client(1))), 99);
    assert_eq!(remaining(&sliding.check(&client(1))), 100);
    assert_eq!(remaining(&burst.check(&client(1))), 19);

    assert_eq!(store.entry_count(), 2);
    assert_eq!(store.log_count(), 1);
    assert_eq!(store.len(), 3);
}

#[test]
fn concurrent_clients_never_exceed_quota() {
    let (_, store) = manual_store();
    let policy = Arc::new(
        PolicyOptions::new()
            .max_requests(100)
            .sliding_window(&store)
            .unwrap(),
    );

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let policy = policy.clone();
            std::thread::spawn(move || {
                (0..30)
                    .filter(|_| policy.check(&client(9)).is_admitted())
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 100);
}

#[test]
fn fail_closed_on_missing_address() {
    let (_, store) = manual_store();
    let policy = PolicyCatalog::new(store.clone()).strict().unwrap();

    let anonymous = RequestInfo::new("GET", "/api/items");
    let response = policy.check(&anonymous).into_rejection().unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[RETRY_AFTER], "60");
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sweeper_reclaims_abandoned_keys() {
    init_tracing();
    let yaml = r#"
store:
  sweep_interval_ms: 1000
policies:
  api:
    strategy: fixed_window
    window_ms: 500
    max_requests: 10
"#;
    let config = TurnstileConfig::from_yaml(yaml).unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(config.store.build(clock.clone()));
    let catalog = PolicyCatalog::from_config(store.clone(), &config).unwrap();
    let api = catalog.get("api").unwrap();

    store.start().unwrap();
    for octet in 1..=50 {
        assert!(api.check(&client(octet)).is_admitted());
    }
    assert_eq!(store.len(), 50);

    clock.set(600);
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(store.is_empty());

    // Expired state is recreated lazily.
    assert_eq!(remaining(&api.check(&client(1))), 9);

    store.stop();
    assert!(!store.is_running());
    assert!(store.is_empty());
}

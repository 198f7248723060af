//! Named, preconfigured rate limiting policies.
//!
//! Every factory builds a fresh [`RateLimitMiddleware`] with its own key
//! namespace, so two policies built from the same factory never share
//! quota even though they share a store.

use http::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{PolicyConfig, StrategyConfig, TurnstileConfig};
use crate::error::{Result, TurnstileError};
use crate::middleware::{Bypass, KeyGenerator, RateLimitMiddleware, RejectionHandler, DEFAULT_MESSAGE};
use crate::ratelimit::{FixedWindow, SlidingWindow, Strategy, TokenBucket};
use crate::store::MemoryStore;

const MINUTE_MS: u64 = 60_000;

/// Rejection message of the `auth` policy.
pub const AUTH_MESSAGE: &str = "Too many authentication attempts, please try again later.";

/// Names of the built-in policies.
pub const PRESETS: [&str; 7] = [
    "standard",
    "strict",
    "auth",
    "by_user",
    "by_method",
    "sliding",
    "burst",
];

/// Options shared by every strategy.
///
/// `window_ms` and `max_requests` apply to the window strategies; token
/// buckets take their size and rate directly.
#[derive(Debug, Clone)]
pub struct PolicyOptions {
    name: Option<String>,
    window_ms: u64,
    max_requests: u64,
    message: Option<String>,
    status_code: u16,
    key_generator: KeyGenerator,
    skip: Bypass,
    handler: RejectionHandler,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            name: None,
            window_ms: MINUTE_MS,
            max_requests: 100,
            message: None,
            status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            key_generator: KeyGenerator::default(),
            skip: Bypass::default(),
            handler: RejectionHandler::default(),
        }
    }
}

impl PolicyOptions {
    /// Start from the defaults: 100 requests per minute, keyed by address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Window length in milliseconds.
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.window_ms = window_ms;
        self
    }

    /// Window length.
    pub fn window(self, window: Duration) -> Self {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.window_ms(window_ms)
    }

    /// Requests admitted per window.
    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Rejection message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Rejection status; must be a 4xx or 5xx code.
    pub fn status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Key derivation.
    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Bypass predicate.
    pub fn skip(mut self, skip: Bypass) -> Self {
        self.skip = skip;
        self
    }

    /// Rejection handler, replacing the default JSON response.
    pub fn handler(mut self, handler: RejectionHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Build a fixed-window policy.
    pub fn fixed_window(self, store: &Arc<MemoryStore>) -> Result<RateLimitMiddleware> {
        let strategy = FixedWindow::new(store.clone(), self.window_ms, self.max_requests)?;
        self.finish(strategy)
    }

    /// Build a sliding-window policy.
    pub fn sliding_window(self, store: &Arc<MemoryStore>) -> Result<RateLimitMiddleware> {
        let strategy = SlidingWindow::new(store.clone(), self.window_ms, self.max_requests)?;
        self.finish(strategy)
    }

    /// Build a token-bucket policy.
    pub fn token_bucket(
        self,
        store: &Arc<MemoryStore>,
        bucket_size: u64,
        refill_rate: f64,
    ) -> Result<RateLimitMiddleware> {
        let strategy = TokenBucket::new(store.clone(), bucket_size, refill_rate)?;
        self.finish(strategy)
    }

    fn finish(self, strategy: impl Strategy + 'static) -> Result<RateLimitMiddleware> {
        let status = StatusCode::from_u16(self.status_code)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .ok_or_else(|| {
                TurnstileError::config(format!(
                    "status_code must be a 4xx or 5xx code, got {}",
                    self.status_code
                ))
            })?;

        let mut middleware = RateLimitMiddleware::new(strategy)
            .with_status(status)
            .with_message(self.message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()))
            .with_key_generator(self.key_generator)
            .with_skip(self.skip)
            .with_handler(self.handler);
        if let Some(name) = self.name {
            middleware = middleware.with_name(name);
        }

        debug!(
            policy = %middleware.name(),
            strategy = %middleware.strategy().kind(),
            limit = middleware.strategy().limit(),
            "Built rate limit policy"
        );
        Ok(middleware)
    }

    /// Options described by a configured policy.
    pub fn from_config(name: &str, config: &PolicyConfig) -> Self {
        let mut options = Self::new()
            .name(name)
            .status_code(config.status_code)
            .key_generator(config.key.into());
        if let Some(message) = &config.message {
            options = options.message(message.clone());
        }

        let paths = config.skip_paths.clone();
        let prefixes = config.skip_path_prefixes.clone();
        let skip = match (paths.is_empty(), prefixes.is_empty()) {
            (true, true) => Bypass::Never,
            (false, true) => Bypass::Paths(paths),
            (true, false) => Bypass::PathPrefixes(prefixes),
            (false, false) => Bypass::custom(move |req| {
                paths.iter().any(|p| *p == req.path)
                    || prefixes.iter().any(|p| req.path.starts_with(p))
            }),
        };
        options.skip(skip)
    }
}

/// Build the middleware for a configured policy.
pub fn build_configured(
    store: &Arc<MemoryStore>,
    name: &str,
    config: &PolicyConfig,
) -> Result<RateLimitMiddleware> {
    let options = PolicyOptions::from_config(name, config);
    let built = match config.strategy {
        StrategyConfig::FixedWindow {
            window_ms,
            max_requests,
        } => options
            .window_ms(window_ms)
            .max_requests(max_requests)
            .fixed_window(store),
        StrategyConfig::SlidingWindow {
            window_ms,
            max_requests,
        } => options
            .window_ms(window_ms)
            .max_requests(max_requests)
            .sliding_window(store),
        StrategyConfig::TokenBucket {
            bucket_size,
            refill_rate,
        } => options.token_bucket(store, bucket_size, refill_rate),
    };

    built.map_err(|e| match e {
        TurnstileError::Config(msg) => TurnstileError::Config(format!("policy {}: {}", name, msg)),
        other => other,
    })
}

/// Factory for named policies over a shared store.
pub struct PolicyCatalog {
    store: Arc<MemoryStore>,
    configured: HashMap<String, PolicyConfig>,
}

impl PolicyCatalog {
    /// Create a catalog offering only the built-in presets.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            configured: HashMap::new(),
        }
    }

    /// Create a catalog offering the presets plus every configured policy.
    ///
    /// Every configured policy is built once here so misconfiguration is
    /// reported up front.
    pub fn from_config(store: Arc<MemoryStore>, config: &TurnstileConfig) -> Result<Self> {
        for (name, policy) in &config.policies {
            if PRESETS.contains(&name.as_str()) {
                return Err(TurnstileError::config(format!(
                    "policy {} shadows a built-in policy",
                    name
                )));
            }
            build_configured(&store, name, policy)?;
        }

        Ok(Self {
            store,
            configured: config.policies.clone(),
        })
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// All policy names this catalog can build.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = PRESETS.iter().map(|s| s.to_string()).collect();
        let mut configured: Vec<String> = self.configured.keys().cloned().collect();
        configured.sort();
        names.extend(configured);
        names
    }

    /// Build a fresh instance of the named policy.
    pub fn get(&self, name: &str) -> Result<RateLimitMiddleware> {
        match name {
            "standard" => self.standard(),
            "strict" => self.strict(),
            "auth" => self.auth(),
            "by_user" => self.by_user(),
            "by_method" => self.by_method(),
            "sliding" => self.sliding(),
            "burst" => self.burst(),
            _ => match self.configured.get(name) {
                Some(config) => build_configured(&self.store, name, config),
                None => Err(TurnstileError::config(format!("unknown policy {}", name))),
            },
        }
    }

    /// General API traffic: 1000 requests per 15 minutes per address.
    pub fn standard(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("standard")
            .window_ms(15 * MINUTE_MS)
            .max_requests(1000)
            .fixed_window(&self.store)
    }

    /// Sensitive endpoints: 100 requests per minute per address.
    pub fn strict(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("strict")
            .window_ms(MINUTE_MS)
            .max_requests(100)
            .fixed_window(&self.store)
    }

    /// Authentication endpoints: 10 attempts per minute per address.
    pub fn auth(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("auth")
            .window_ms(MINUTE_MS)
            .max_requests(10)
            .message(AUTH_MESSAGE)
            .fixed_window(&self.store)
    }

    /// 100 requests per minute per user, falling back to the address.
    pub fn by_user(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("by_user")
            .window_ms(MINUTE_MS)
            .max_requests(100)
            .key_generator(KeyGenerator::UserOrAddr)
            .fixed_window(&self.store)
    }

    /// 100 requests per minute per method and address.
    pub fn by_method(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("by_method")
            .window_ms(MINUTE_MS)
            .max_requests(100)
            .key_generator(KeyGenerator::MethodAndAddr)
            .fixed_window(&self.store)
    }

    /// 100 requests in any rolling minute per address.
    pub fn sliding(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("sliding")
            .window_ms(MINUTE_MS)
            .max_requests(100)
            .sliding_window(&self.store)
    }

    /// Bursts of 20, refilling at 2 requests per second, per address.
    pub fn burst(&self) -> Result<RateLimitMiddleware> {
        PolicyOptions::new()
            .name("burst")
            .token_bucket(&self.store, 20, 2.0)
    }
}

impl std::fmt::Debug for PolicyCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyCatalog")
            .field("store", &self.store)
            .field("configured", &self.configured.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyKind;
    use crate::middleware::{Admission, RequestInfo};
    use crate::ratelimit::StrategyKind;
    use crate::store::ManualClock;
    use std::net::{IpAddr, Ipv4Addr};

    fn catalog() -> PolicyCatalog {
        PolicyCatalog::new(Arc::new(MemoryStore::with_clock(Arc::new(ManualClock::new(0)))))
    }

    fn request(last_octet: u8) -> RequestInfo {
        RequestInfo::new("POST", "/login").with_remote_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)))
    }

    #[test]
    fn test_presets_build() {
        let catalog = catalog();
        for name in PRESETS {
            let policy = catalog.get(name).unwrap();
            assert_eq!(policy.name(), name);
        }
    }

    #[test]
    fn test_preset_quotas() {
        let catalog = catalog();
        assert_eq!(catalog.standard().unwrap().strategy().limit(), 1000);
        assert_eq!(catalog.strict().unwrap().strategy().limit(), 100);
        assert_eq!(catalog.auth().unwrap().strategy().limit(), 10);
        assert_eq!(catalog.auth().unwrap().message(), AUTH_MESSAGE);
        assert_eq!(
            catalog.sliding().unwrap().strategy().kind(),
            StrategyKind::SlidingWindow
        );
        assert_eq!(
            catalog.burst().unwrap().strategy().kind(),
            StrategyKind::TokenBucket
        );
    }

    #[test]
    fn test_factories_return_independent_instances() {
        let catalog = catalog();
        let first = catalog.auth().unwrap();
        let second = catalog.auth().unwrap();

        for _ in 0..10 {
            assert!(first.check(&request(1)).is_admitted());
        }
        assert!(first.check(&request(1)).is_rejected());
        assert!(second.check(&request(1)).is_admitted());
    }

    #[test]
    fn test_by_user_keys_on_identity() {
        let catalog = catalog();
        let policy = PolicyOptions::new()
            .max_requests(1)
            .key_generator(KeyGenerator::UserOrAddr)
            .fixed_window(catalog.store())
            .unwrap();

        // Same user from two addresses shares one quota.
        assert!(policy.check(&request(1).with_user_id("alice")).is_admitted());
        assert!(policy.check(&request(2).with_user_id("alice")).is_rejected());
        assert!(policy.check(&request(2)).is_admitted());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let catalog = catalog();
        let store = catalog.store();

        assert!(PolicyOptions::new().max_requests(0).fixed_window(store).is_err());
        assert!(PolicyOptions::new().window_ms(0).sliding_window(store).is_err());
        assert!(PolicyOptions::new().token_bucket(store, 0, 1.0).is_err());
        assert!(PolicyOptions::new().status_code(200).fixed_window(store).is_err());
        assert!(PolicyOptions::new().status_code(1000).fixed_window(store).is_err());
        assert!(PolicyOptions::new().status_code(503).fixed_window(store).is_ok());
    }

    #[test]
    fn test_unknown_policy() {
        assert!(matches!(
            catalog().get("nope"),
            Err(TurnstileError::Config(_))
        ));
    }

    #[test]
    fn test_configured_policies() {
        let yaml = r#"
policies:
  login:
    strategy: fixed_window
    window_ms: 60000
    max_requests: 2
    message: "Slow down"
    skip_paths: ["/health"]
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let store = Arc::new(MemoryStore::with_clock(Arc::new(ManualClock::new(0))));
        let catalog = PolicyCatalog::from_config(store, &config).unwrap();
        assert!(catalog.names().contains(&"login".to_string()));

        let login = catalog.get("login").unwrap();
        assert_eq!(login.message(), "Slow down");
        assert!(login.check(&request(1)).is_admitted());
        assert!(login.check(&request(1)).is_admitted());
        assert!(login.check(&request(1)).is_rejected());

        let health = RequestInfo::new("GET", "/health");
        assert!(matches!(login.check(&health), Admission::Bypass));
    }

    #[test]
    fn test_invalid_configured_policy_fails_up_front() {
        let yaml = r#"
policies:
  broken:
    strategy: token_bucket
    bucket_size: 5
    refill_rate: 0
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        let err = PolicyCatalog::from_config(Arc::new(MemoryStore::new()), &config).unwrap_err();
        assert!(err.to_string().contains("policy broken"));
    }

    #[test]
    fn test_configured_name_cannot_shadow_preset() {
        let mut config = TurnstileConfig::default();
        config.policies.insert(
            "strict".to_string(),
            PolicyConfig {
                strategy: StrategyConfig::FixedWindow {
                    window_ms: 1_000,
                    max_requests: 1,
                },
                message: None,
                status_code: 429,
                key: KeyKind::RemoteAddr,
                skip_paths: Vec::new(),
                skip_path_prefixes: Vec::new(),
            },
        );
        assert!(PolicyCatalog::from_config(Arc::new(MemoryStore::new()), &config).is_err());
    }
}

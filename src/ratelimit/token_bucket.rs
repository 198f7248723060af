//! Token bucket rate limiting.
//!
//! A bucket of `bucket_size` tokens refills continuously at `refill_rate`
//! tokens per second. Each admitted request takes one token, so bursts of
//! up to `bucket_size` are allowed while the long-run rate stays at
//! `refill_rate`.

use std::sync::Arc;
use tracing::{debug, trace};

use super::{Decision, Namespace, Strategy, StrategyKind};
use crate::error::{Result, TurnstileError};
use crate::store::{Entry, MemoryStore};

/// Token bucket rate limiter.
pub struct TokenBucket {
    store: Arc<MemoryStore>,
    namespace: Namespace,
    bucket_size: u64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a token bucket holding `bucket_size` tokens that refills at
    /// `refill_rate` tokens per second.
    pub fn new(store: Arc<MemoryStore>, bucket_size: u64, refill_rate: f64) -> Result<Self> {
        if bucket_size == 0 {
            return Err(TurnstileError::config("bucket_size must be greater than 0"));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(TurnstileError::config(
                "refill_rate must be a positive number",
            ));
        }

        let namespace = Namespace::new(StrategyKind::TokenBucket, store.next_instance_id());
        Ok(Self {
            store,
            namespace,
            bucket_size,
            refill_rate,
        })
    }

    /// Maximum number of tokens.
    pub fn bucket_size(&self) -> u64 {
        self.bucket_size
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Milliseconds until a bucket holding `tokens` is full again.
    fn ms_until_full(&self, tokens: f64) -> u64 {
        let missing = (self.bucket_size as f64 - tokens).max(0.0);
        (missing / self.refill_rate * 1000.0).ceil() as u64
    }
}

impl Strategy for TokenBucket {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TokenBucket
    }

    fn limit(&self) -> u64 {
        self.bucket_size
    }

    fn check(&self, key: &str) -> Decision {
        let key = self.namespace.key(key);
        let capacity = self.bucket_size as f64;

        trace!(key = %key, "Checking token bucket");

        let (admitted, tokens) = self.store.update(&key, |slot| {
            let now = self.store.now_ms();
            let entry = slot.get_or_insert(Entry::bucket(capacity, now));

            let elapsed = now.saturating_sub(entry.last_refill) as f64 / 1000.0;
            entry.tokens = (entry.tokens + elapsed * self.refill_rate).min(capacity);
            entry.last_refill = entry.last_refill.max(now);

            let admitted = entry.tokens >= 1.0;
            if admitted {
                entry.tokens -= 1.0;
            }
            entry.reset_at = now.saturating_add(self.ms_until_full(entry.tokens));
            (admitted, entry.tokens)
        });

        let remaining = tokens.floor() as u64;

        if admitted {
            Decision::admit(self.bucket_size, remaining, None)
        } else {
            let retry_after = ((1.0 - tokens) / self.refill_rate).ceil() as u64;
            debug!(
                key = %key,
                tokens = tokens,
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            Decision::reject(self.bucket_size, remaining, None, retry_after.max(1))
        }
    }

    fn reset(&self, key: &str) {
        self.store.delete(&self.namespace.key(key));
    }

    fn full_retry_after(&self) -> u64 {
        ((1.0 / self.refill_rate).ceil() as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;

    fn limiter(size: u64, rate: f64) -> (Arc<ManualClock>, Arc<MemoryStore>, TokenBucket) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = TokenBucket::new(store.clone(), size, rate).unwrap();
        (clock, store, limiter)
    }

    #[test]
    fn test_burst_then_refill() {
        let (clock, _, limiter) = limiter(5, 1.0);

        for i in 0..5 {
            assert!(limiter.check("K").admitted, "Request {} should be admitted", i);
        }

        let decision = limiter.check("K");
        assert!(!decision.admitted);
        assert_eq!(decision.retry_after, Some(1));
        assert_eq!(decision.reset, None);

        clock.advance(2_000);
        assert!(limiter.check("K").admitted);
        assert!(limiter.check("K").admitted);
        assert!(!limiter.check("K").admitted);
    }

    #[test]
    fn test_slow_stream_never_rejected() {
        let (clock, _, limiter) = limiter(1, 2.0);

        for _ in 0..50 {
            assert!(limiter.check("K").admitted);
            clock.advance(500);
        }
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let (clock, store, limiter) = limiter(3, 0.5);
        let key = limiter.namespace.key("K");

        for step in 0..40u64 {
            clock.advance((step % 7) * 700);
            limiter.check("K");
            let tokens = store.get(&key).unwrap().tokens;
            assert!((0.0..=3.0).contains(&tokens), "tokens out of range: {}", tokens);
        }

        clock.advance(3_600_000);
        limiter.check("K");
        assert!(store.get(&key).unwrap().tokens <= 3.0);
    }

    #[test]
    fn test_fractional_retry_after() {
        let (clock, _, limiter) = limiter(1, 0.25);

        assert!(limiter.check("K").admitted);
        clock.advance(1_000);
        // 0.25 tokens held, 0.75 missing at 0.25/s -> 3s
        let decision = limiter.check("K");
        assert!(!decision.admitted);
        assert_eq!(decision.retry_after, Some(3));
    }

    #[test]
    fn test_remaining_is_whole_tokens() {
        let (_, _, limiter) = limiter(5, 1.0);

        let remaining: Vec<u64> = (0..5).map(|_| limiter.check("K").remaining).collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_full_bucket_entry_is_sweepable() {
        let (clock, store, limiter) = limiter(2, 1.0);

        limiter.check("K");
        clock.advance(999);
        assert_eq!(store.sweep(), 0);

        clock.advance(1);
        assert_eq!(store.sweep(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalid_configuration() {
        let store = Arc::new(MemoryStore::new());
        assert!(TokenBucket::new(store.clone(), 0, 1.0).is_err());
        assert!(TokenBucket::new(store.clone(), 5, 0.0).is_err());
        assert!(TokenBucket::new(store.clone(), 5, -1.0).is_err());
        assert!(TokenBucket::new(store, 5, f64::NAN).is_err());
    }
}

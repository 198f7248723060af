//! Sliding-window log rate limiting.
//!
//! Keeps the timestamp of every admitted request per key and counts those
//! younger than `window_ms`. Unlike the fixed window there is no boundary
//! burst, at the cost of one timestamp per admitted request.

use std::sync::Arc;
use tracing::{debug, trace};

use super::{ceil_secs, Decision, Namespace, Strategy, StrategyKind};
use crate::error::{Result, TurnstileError};
use crate::store::MemoryStore;

/// Sliding-window log rate limiter.
pub struct SlidingWindow {
    store: Arc<MemoryStore>,
    namespace: Namespace,
    window_ms: u64,
    max_requests: u64,
}

impl SlidingWindow {
    /// Create a sliding-window limiter admitting `max_requests` in any
    /// `window_ms` interval.
    pub fn new(store: Arc<MemoryStore>, window_ms: u64, max_requests: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(TurnstileError::config("window_ms must be greater than 0"));
        }
        if max_requests == 0 {
            return Err(TurnstileError::config("max_requests must be greater than 0"));
        }

        let namespace = Namespace::new(StrategyKind::SlidingWindow, store.next_instance_id());
        Ok(Self {
            store,
            namespace,
            window_ms,
            max_requests,
        })
    }

    /// The window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// The quota within any window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

impl Strategy for SlidingWindow {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SlidingWindow
    }

    fn limit(&self) -> u64 {
        self.max_requests
    }

    fn check(&self, key: &str) -> Decision {
        let key = self.namespace.key(key);
        let window = self.window_ms;
        let max = self.max_requests;

        trace!(key = %key, "Checking sliding window");

        self.store.update_log(&key, window, |log| {
            // Sampled under the key's lock so appends follow lock order.
            let now = self.store.now_ms();
            log.prune(now);

            let len = log.len() as u64;
            // Reported before this request is appended.
            let remaining = max.saturating_sub(len);

            if len >= max {
                let oldest = log.oldest().unwrap_or(now);
                let expires = oldest.saturating_add(window);
                let retry_after = ceil_secs(expires.saturating_sub(now));
                debug!(
                    key = %key,
                    count = len,
                    limit = max,
                    retry_after = retry_after,
                    "Rate limit exceeded"
                );
                return Decision::reject(max, remaining, Some(ceil_secs(expires)), retry_after);
            }

            log.push(now);
            let oldest = log.oldest().unwrap_or(now);
            Decision::admit(max, remaining, Some(ceil_secs(oldest.saturating_add(window))))
        })
    }

    fn reset(&self, key: &str) {
        self.store.delete(&self.namespace.key(key));
    }

    fn full_retry_after(&self) -> u64 {
        ceil_secs(self.window_ms)
    }
}

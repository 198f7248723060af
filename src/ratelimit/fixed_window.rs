//! Fixed-window rate limiting.
//!
//! Each key gets a counter that lives for `window_ms` from its first
//! request. Once the window expires the next request starts a new one.
//! Exactly `max_requests` requests are admitted per window; bursts at a
//! window boundary can reach twice that.

use std::sync::Arc;
use tracing::{debug, trace};

use super::{ceil_secs, Decision, Namespace, Strategy, StrategyKind};
use crate::error::{Result, TurnstileError};
use crate::store::{Entry, MemoryStore};

/// Fixed-window rate limiter.
pub struct FixedWindow {
    store: Arc<MemoryStore>,
    namespace: Namespace,
    window_ms: u64,
    max_requests: u64,
}

impl FixedWindow {
    /// Create a fixed-window limiter admitting `max_requests` per `window_ms`.
    pub fn new(store: Arc<MemoryStore>, window_ms: u64, max_requests: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(TurnstileError::config("window_ms must be greater than 0"));
        }
        if max_requests == 0 {
            return Err(TurnstileError::config("max_requests must be greater than 0"));
        }

        let namespace = Namespace::new(StrategyKind::FixedWindow, store.next_instance_id());
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

    /// The per-window quota.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

impl Strategy for FixedWindow {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FixedWindow
    }

    fn limit(&self) -> u64 {
        self.max_requests
    }

    fn check(&self, key: &str) -> Decision {
        let key = self.namespace.key(key);

        trace!(key = %key, "Checking fixed window");

        let (now, count, reset_at) = self.store.update(&key, |slot| {
            let now = self.store.now_ms();
            let fresh = Entry::window(now.saturating_add(self.window_ms));
            let entry = slot.get_or_insert(fresh);
            if entry.is_expired(now) {
                *entry = fresh;
            }
            entry.count += 1;
            (now, entry.count, entry.reset_at)
        });

        let remaining = self.max_requests.saturating_sub(count);
        let reset = Some(ceil_secs(reset_at));

        if count > self.max_requests {
            let retry_after = ceil_secs(reset_at.saturating_sub(now));
            debug!(
                key = %key,
                count = count,
                limit = self.max_requests,
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            Decision::reject(self.max_requests, remaining, reset, retry_after)
        } else {
            Decision::admit(self.max_requests, remaining, reset)
        }
    }

    fn reset(&self, key: &str) {
        self.store.delete(&self.namespace.key(key));
    }

    fn full_retry_after(&self) -> u64 {
        ceil_secs(self.window_ms)
    }
}

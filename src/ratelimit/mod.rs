//! Rate limiting strategies.
//!
//! Every strategy keeps its state in a shared [`MemoryStore`] under keys
//! namespaced by strategy kind and instance, so strategies sharing a store
//! never see each other's state.
//!
//! [`MemoryStore`]: crate::store::MemoryStore

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use std::fmt;

/// The three supported algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Counter that resets at the end of each window
    FixedWindow,
    /// Timestamp log over a rolling window
    SlidingWindow,
    /// Continuously refilled token pool
    TokenBucket,
}

impl StrategyKind {
    /// Key prefix used for this strategy's store entries.
    pub fn prefix(&self) -> &'static str {
        match self {
            StrategyKind::FixedWindow => "fixed",
            StrategyKind::SlidingWindow => "sliding",
            StrategyKind::TokenBucket => "bucket",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Outcome of a single strategy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// The quota (`max_requests` or bucket size)
    pub limit: u64,
    /// Requests left, never negative
    pub remaining: u64,
    /// Epoch seconds at which the window resets, when the strategy has one
    pub reset: Option<u64>,
    /// Seconds the caller should wait, set only on rejection
    pub retry_after: Option<u64>,
}

impl Decision {
    /// An admitted decision.
    pub fn admit(limit: u64, remaining: u64, reset: Option<u64>) -> Self {
        Self {
            admitted: true,
            limit,
            remaining,
            reset,
            retry_after: None,
        }
    }

    /// A rejected decision.
    pub fn reject(limit: u64, remaining: u64, reset: Option<u64>, retry_after: u64) -> Self {
        Self {
            admitted: false,
            limit,
            remaining,
            reset,
            retry_after: Some(retry_after),
        }
    }
}

/// A rate limiting algorithm bound to a store.
///
/// `check` performs the whole decision as one atomic read-modify-write on
/// the store, so concurrent checks for the same key are linearizable.
pub trait Strategy: Send + Sync {
    /// Which algorithm this is.
    fn kind(&self) -> StrategyKind;

    /// The quota reported in `X-RateLimit-Limit`.
    fn limit(&self) -> u64;

    /// Record a request for `key` and decide whether to admit it.
    fn check(&self, key: &str) -> Decision;

    /// Forget all state for `key`.
    fn reset(&self, key: &str);

    /// Retry guidance, in seconds, when no better estimate exists.
    fn full_retry_after(&self) -> u64;
}

/// Per-instance key namespace, e.g. `fixed:3:10.0.0.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Namespace {
    prefix: &'static str,
    instance: u64,
}

impl Namespace {
    pub(crate) fn new(kind: StrategyKind, instance: u64) -> Self {
        Self {
            prefix: kind.prefix(),
            instance,
        }
    }

    pub(crate) fn key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.instance, key)
    }
}

/// Milliseconds to whole seconds, rounding up.
pub(crate) fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

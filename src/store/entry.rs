//! Per-key state kept by the store.

use std::collections::VecDeque;

/// State for one key.
///
/// Fixed-window strategies use `count`/`reset_at`; token buckets use
/// `tokens`/`last_refill` and keep `reset_at` at the instant the bucket
/// would be full again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    /// Requests observed in the current fixed window
    pub count: u64,
    /// Epoch ms at which this entry stops being meaningful
    pub reset_at: u64,
    /// Current token balance
    pub tokens: f64,
    /// Epoch ms of the last refill
    pub last_refill: u64,
}

impl Entry {
    /// A fresh fixed-window entry that expires at `reset_at`.
    pub fn window(reset_at: u64) -> Self {
        Self {
            count: 0,
            reset_at,
            tokens: 0.0,
            last_refill: 0,
        }
    }

    /// A token-bucket entry holding `tokens` as of `now`.
    pub fn bucket(tokens: f64, now: u64) -> Self {
        Self {
            count: 0,
            reset_at: now,
            tokens,
            last_refill: now,
        }
    }

    /// Whether the entry must be treated as absent at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.reset_at
    }
}

/// Ordered request timestamps for one sliding-window key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampLog {
    timestamps: VecDeque<u64>,
    window_ms: u64,
}

impl TimestampLog {
    /// Create an empty log for a window of `window_ms`.
    pub fn new(window_ms: u64) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window_ms,
        }
    }

    /// Drop every timestamp at or before `now - window_ms`.
    pub fn prune(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_ms);
        while let Some(&front) = self.timestamps.front() {
            if front <= cutoff && now >= self.window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a request at `now`, keeping the log in timestamp order.
    pub fn push(&mut self, now: u64) {
        let at = self.timestamps.partition_point(|&t| t <= now);
        self.timestamps.insert(at, now);
    }

    /// Number of timestamps currently held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The earliest timestamp, i.e. the next one to fall out of the window.
    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }

    /// The window this log is pruned against.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Whether every timestamp has left the window at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.timestamps.back() {
            Some(&newest) => newest.saturating_add(self.window_ms) <= now,
            None => true,
        }
    }
}

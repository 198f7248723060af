//! Shared, self-expiring key→state store.
//!
//! The store holds fixed-window and token-bucket [`Entry`] values and
//! sliding-window [`TimestampLog`]s in sharded maps. Strategies mutate state
//! only through [`MemoryStore::update`] and [`MemoryStore::update_log`], which
//! run the whole read-modify-write under the key's shard lock.
//!
//! A background sweep started with [`MemoryStore::start`] deletes expired
//! state on a fixed cadence. The sweep bounds memory; it never decides
//! whether state is valid. Validity is always re-derived at access time.

mod clock;
mod entry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{Entry, TimestampLog};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{Result, TurnstileError};

/// Default cadence of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweep task.
struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// In-memory store shared by every strategy instance.
///
/// This struct is thread-safe and is normally shared as `Arc<MemoryStore>`.
pub struct MemoryStore {
    /// Fixed-window and token-bucket state indexed by namespaced key
    entries: DashMap<String, Entry>,
    /// Sliding-window logs indexed by namespaced key
    logs: DashMap<String, TimestampLog>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    sweeper: Mutex<Option<Sweeper>>,
    next_instance: AtomicU64,
}

impl MemoryStore {
    /// Create a store on the wall clock with the default sweep interval.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            logs: DashMap::new(),
            clock,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweeper: Mutex::new(None),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Set the sweep cadence. Takes effect on the next [`start`](Self::start).
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Current time according to the store's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The configured sweep cadence.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Issue a fresh namespace id for a strategy instance.
    pub fn next_instance_id(&self) -> u64 {
        self.next_instance.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a copy of the entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Entry> {
        self.entries.get(key).map(|e| *e.value())
    }

    /// Insert or replace the entry for `key`.
    pub fn set(&self, key: &str, entry: Entry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Remove any state held under `key`.
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
        self.logs.remove(key);
    }

    /// Run `f` against the entry for `key` while holding its lock.
    ///
    /// `f` sees `None` when no entry exists. Leaving `Some` in the slot
    /// stores it; leaving `None` removes the entry.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut Option<Entry>) -> R) -> R {
        match self.entries.entry(key.to_string()) {
            Slot::Occupied(mut occupied) => {
                let mut slot = Some(*occupied.get());
                let result = f(&mut slot);
                match slot {
                    Some(entry) => *occupied.get_mut() = entry,
                    None => {
                        occupied.remove();
                    }
                }
                result
            }
            Slot::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(entry) = slot {
                    vacant.insert(entry);
                }
                result
            }
        }
    }

    /// Run `f` against the timestamp log for `key` while holding its lock.
    ///
    /// A missing log is created empty for a window of `window_ms`.
    pub fn update_log<R>(
        &self,
        key: &str,
        window_ms: u64,
        f: impl FnOnce(&mut TimestampLog) -> R,
    ) -> R {
        let mut log = self
            .logs
            .entry(key.to_string())
            .or_insert_with(|| TimestampLog::new(window_ms));
        f(&mut log)
    }

    /// Get a copy of the timestamp log for `key`, if any.
    pub fn get_log(&self, key: &str) -> Option<TimestampLog> {
        self.logs.get(key).map(|l| l.value().clone())
    }

    /// Number of stored keys, counting entries and logs.
    pub fn len(&self) -> usize {
        self.entries.len() + self.logs.len()
    }

    /// Number of counter and bucket entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries and no logs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.logs.is_empty()
    }

    /// Number of sliding-window logs.
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Delete all expired entries and logs. Returns how many were removed.
    ///
    /// `retain` locks one shard at a time, so hot-path updates on other
    /// shards proceed while a sweep is in progress.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            removed += usize::from(!keep);
            keep
        });
        self.logs.retain(|_, log| {
            let keep = !log.is_expired(now);
            removed += usize::from(!keep);
            keep
        });

        trace!(removed = removed, now = now, "Swept expired rate limit state");
        removed
    }

    /// Start the background sweep on the current Tokio runtime.
    ///
    /// Starting a store that is already running does nothing.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(TurnstileError::config("sweep interval must be non-zero"));
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            debug!("Sweeper already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TurnstileError::Runtime(e.to_string()))?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(sweep_loop(
            Arc::downgrade(self),
            self.sweep_interval,
            shutdown_rx,
        ));

        info!(interval = ?self.sweep_interval, "Started rate limit store sweeper");
        *sweeper = Some(Sweeper { shutdown, handle });
        Ok(())
    }

    /// Halt the background sweep and clear all state.
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = sweeper.shutdown.send(true);
            sweeper.handle.abort();
            info!("Stopped rate limit store sweeper");
        }
        self.entries.clear();
        self.logs.clear();
    }

    /// Whether the background sweep is running.
    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.handle.abort();
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("logs", &self.logs.len())
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

/// Body of the sweep task. Holds only a weak reference so a dropped store
/// ends the loop.
async fn sweep_loop(
    store: Weak<MemoryStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed = removed, remaining = store.len(), "Sweep removed expired entries");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

//! Configuration management for Turnstile.
//!
//! Policies can be declared in YAML and built by name through
//! [`PolicyCatalog::from_config`](crate::policy::PolicyCatalog::from_config):
//!
//! ```yaml
//! store:
//!   sweep_interval_ms: 60000
//! policies:
//!   login:
//!     strategy: fixed_window
//!     window_ms: 60000
//!     max_requests: 5
//!     key: user_or_addr
//!   uploads:
//!     strategy: token_bucket
//!     bucket_size: 10
//!     refill_rate: 0.5
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::middleware::KeyGenerator;
use crate::store::{Clock, MemoryStore};

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Named policies
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Background sweep cadence in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl StoreConfig {
    /// Sweep cadence as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Build a store reading time from `clock`.
    pub fn build(&self, clock: Arc<dyn Clock>) -> MemoryStore {
        MemoryStore::with_clock(clock).with_sweep_interval(self.sweep_interval())
    }
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

/// Algorithm and quota of a configured policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    FixedWindow {
        #[serde(default = "default_window_ms")]
        window_ms: u64,
        #[serde(default = "default_max_requests")]
        max_requests: u64,
    },
    SlidingWindow {
        #[serde(default = "default_window_ms")]
        window_ms: u64,
        #[serde(default = "default_max_requests")]
        max_requests: u64,
    },
    TokenBucket {
        bucket_size: u64,
        refill_rate: f64,
    },
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_requests() -> u64 {
    100
}

/// Built-in key derivations selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    #[default]
    RemoteAddr,
    MethodAndAddr,
    UserOrAddr,
}

impl From<KeyKind> for KeyGenerator {
    fn from(kind: KeyKind) -> Self {
        match kind {
            KeyKind::RemoteAddr => KeyGenerator::RemoteAddr,
            KeyKind::MethodAndAddr => KeyGenerator::MethodAndAddr,
            KeyKind::UserOrAddr => KeyGenerator::UserOrAddr,
        }
    }
}

/// A policy declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Algorithm and quota
    #[serde(flatten)]
    pub strategy: StrategyConfig,

    /// Rejection message
    #[serde(default)]
    pub message: Option<String>,

    /// Rejection status
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    /// Key derivation
    #[serde(default)]
    pub key: KeyKind,

    /// Paths that bypass the limiter
    #[serde(default)]
    pub skip_paths: Vec<String>,

    /// Path prefixes that bypass the limiter
    #[serde(default)]
    pub skip_path_prefixes: Vec<String>,
}

fn default_status_code() -> u16 {
    429
}

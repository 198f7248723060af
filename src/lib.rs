//! Turnstile - In-process Request Admission Control
//!
//! This crate decides, per inbound request, whether to admit or reject it
//! based on a rate policy. Three strategies (fixed window, sliding window,
//! token bucket) keep their state in a shared, self-expiring in-memory
//! store. A [`RateLimitMiddleware`] wraps a strategy with key derivation,
//! bypass predicates and response decoration, and a [`PolicyCatalog`]
//! hands out named, preconfigured instances.
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//! use turnstile::{MemoryStore, PolicyCatalog, RequestInfo};
//!
//! # async fn example() -> turnstile::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! store.start()?;
//!
//! let catalog = PolicyCatalog::new(store.clone());
//! let auth = catalog.auth()?;
//!
//! let request = RequestInfo::new("POST", "/login")
//!     .with_remote_addr(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));
//! if let Some(response) = auth.check(&request).into_rejection() {
//!     println!("rejected with {}", response.status());
//! }
//!
//! store.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod ratelimit;
pub mod store;

pub use config::TurnstileConfig;
pub use error::{KeyError, Result, TurnstileError};
pub use middleware::{
    Admission, Bypass, KeyGenerator, RateLimitMiddleware, RejectionHandler, RequestInfo,
};
pub use policy::{PolicyCatalog, PolicyOptions};
pub use ratelimit::{Decision, FixedWindow, SlidingWindow, Strategy, StrategyKind, TokenBucket};
pub use store::{Clock, ManualClock, MemoryStore, SystemClock};

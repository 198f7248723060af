//! Inbound request descriptor, key derivation and bypass predicates.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::KeyError;

/// Information about an inbound request, supplied by the web framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Caller's network address
    pub remote_addr: Option<IpAddr>,
    /// Request method (GET, POST, ...)
    pub method: String,
    /// Request path
    pub path: String,
    /// Authenticated user id, if any
    pub user_id: Option<String>,
}

impl RequestInfo {
    /// Create a request descriptor with no address or identity.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            remote_addr: None,
            method: method.into(),
            path: path.into(),
            user_id: None,
        }
    }

    /// Set the caller address.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the authenticated user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    fn remote_addr_key(&self) -> Result<String, KeyError> {
        self.remote_addr
            .map(|addr| addr.to_string())
            .ok_or(KeyError::MissingRemoteAddr)
    }
}

/// Signature of a custom key generator.
pub type KeyFn = Arc<dyn Fn(&RequestInfo) -> Result<String, KeyError> + Send + Sync>;

/// How the rate limit key is derived from a request.
#[derive(Clone, Default)]
pub enum KeyGenerator {
    /// Caller address
    #[default]
    RemoteAddr,
    /// Method and caller address, e.g. `POST:10.0.0.1`
    MethodAndAddr,
    /// Authenticated user id, falling back to the caller address
    UserOrAddr,
    /// Caller-supplied function
    Custom(KeyFn),
}

impl KeyGenerator {
    /// Wrap a function as a key generator.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo) -> Result<String, KeyError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Derive the key for `request`.
    pub fn key(&self, request: &RequestInfo) -> Result<String, KeyError> {
        match self {
            Self::RemoteAddr => request.remote_addr_key(),
            Self::MethodAndAddr => Ok(format!("{}:{}", request.method, request.remote_addr_key()?)),
            Self::UserOrAddr => match &request.user_id {
                Some(user) => Ok(format!("user:{}", user)),
                None => request.remote_addr_key(),
            },
            Self::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteAddr => f.write_str("RemoteAddr"),
            Self::MethodAndAddr => f.write_str("MethodAndAddr"),
            Self::UserOrAddr => f.write_str("UserOrAddr"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Signature of a custom bypass predicate.
pub type SkipFn = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;

/// Requests that bypass the limiter entirely.
#[derive(Clone, Default)]
pub enum Bypass {
    /// Every request is limited
    #[default]
    Never,
    /// Exact path matches
    Paths(Vec<String>),
    /// Path prefix matches
    PathPrefixes(Vec<String>),
    /// Caller-supplied predicate
    Custom(SkipFn),
}

impl Bypass {
    /// Wrap a predicate as a bypass rule.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Whether `request` skips rate limiting.
    pub fn matches(&self, request: &RequestInfo) -> bool {
        match self {
            Self::Never => false,
            Self::Paths(paths) => paths.iter().any(|p| *p == request.path),
            Self::PathPrefixes(prefixes) => prefixes.iter().any(|p| request.path.starts_with(p)),
            Self::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for Bypass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Paths(paths) => f.debug_tuple("Paths").field(paths).finish(),
            Self::PathPrefixes(prefixes) => f.debug_tuple("PathPrefixes").field(prefixes).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

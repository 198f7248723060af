//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Quota rejections are not errors; they surface as
/// [`Admission::Reject`](crate::middleware::Admission::Reject). These
/// variants cover misconfiguration and lifecycle problems only.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background sweep could not be scheduled
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TurnstileError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

/// Failure to derive a rate limit key from a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The request carries no caller address
    #[error("request has no remote address")]
    MissingRemoteAddr,

    /// A custom key generator refused the request
    #[error("key generator failed: {0}")]
    Custom(String),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

//! Quota headers and rejection responses.

use std::fmt;
use std::sync::Arc;

use http::header::{HeaderName, CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::request::RequestInfo;
use crate::ratelimit::Decision;

/// `X-RateLimit-Limit`
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining`
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset`
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Quota headers for a decision. The reset header is only present for
/// strategies that have a window.
pub fn quota_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Some(reset) = decision.reset {
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
    }
    headers
}

/// JSON body of the default rejection response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub success: bool,
    pub message: String,
    pub retry_after: u64,
}

/// Everything known about a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status the response should carry
    pub status: StatusCode,
    /// Human readable reason
    pub message: String,
    /// Seconds until the caller should retry
    pub retry_after: u64,
    /// The strategy decision; `None` when the key could not be derived
    pub decision: Option<Decision>,
}

impl Rejection {
    /// `Retry-After` plus the quota headers, if a decision was made.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = self
            .decision
            .as_ref()
            .map(quota_headers)
            .unwrap_or_default();
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after));
        headers
    }

    /// The default JSON body.
    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            success: false,
            message: self.message.clone(),
            retry_after: self.retry_after,
        }
    }
}

/// Signature of a custom rejection handler.
pub type HandlerFn = Arc<dyn Fn(&RequestInfo, &Rejection) -> Response<String> + Send + Sync>;

/// Builds the response for a rejected request.
#[derive(Clone, Default)]
pub enum RejectionHandler {
    /// JSON body with `Retry-After` and quota headers
    #[default]
    Json,
    /// Caller-supplied response, used as is
    Custom(HandlerFn),
}

impl RejectionHandler {
    /// Wrap a function as a rejection handler.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo, &Rejection) -> Response<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Build the rejection response.
    pub fn respond(&self, request: &RequestInfo, rejection: &Rejection) -> Response<String> {
        match self {
            Self::Json => {
                let body = serde_json::to_string(&rejection.body()).unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to serialize rejection body");
                    format!(r#"{{"success":false,"retryAfter":{}}}"#, rejection.retry_after)
                });
                let mut response = Response::new(body);
                *response.status_mut() = rejection.status;
                let headers = response.headers_mut();
                headers.extend(rejection.headers());
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Self::Custom(f) => f(request, rejection),
        }
    }
}

impl fmt::Debug for RejectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("Json"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

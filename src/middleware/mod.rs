//! Request-pipeline gate.
//!
//! [`RateLimitMiddleware::check`] takes a [`RequestInfo`] and returns an
//! [`Admission`]: bypass, forward with quota headers, or a finished
//! rejection response.

mod request;
mod response;

pub use request::{Bypass, KeyFn, KeyGenerator, RequestInfo, SkipFn};
pub use response::{
    quota_headers, HandlerFn, Rejection, RejectionBody, RejectionHandler, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};

use http::{HeaderMap, Response, StatusCode};
use tracing::{debug, trace, warn};

use crate::error::KeyError;
use crate::ratelimit::{Decision, Strategy};

/// Message used when no custom rejection message is configured.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// What the pipeline should do with a request.
#[derive(Debug)]
pub enum Admission {
    /// The bypass predicate matched; no state was touched
    Bypass,
    /// Pass the request downstream and add these headers to its response
    Forward {
        /// Quota headers
        headers: HeaderMap,
    },
    /// Terminate the request with this response
    Reject(Response<String>),
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Reject(_))
    }

    /// Whether the request was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Reject(_))
    }

    /// Headers the pipeline should attach, if any.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Bypass => None,
            Self::Forward { headers } => Some(headers),
            Self::Reject(response) => Some(response.headers()),
        }
    }

    /// Copy the quota headers onto a downstream response.
    pub fn decorate<B>(&self, response: &mut Response<B>) {
        if let Self::Forward { headers } = self {
            for (name, value) in headers {
                response.headers_mut().insert(name, value.clone());
            }
        }
    }

    /// The rejection response, if the request was rejected.
    pub fn into_rejection(self) -> Option<Response<String>> {
        match self {
            Self::Reject(response) => Some(response),
            _ => None,
        }
    }
}

/// Rate limiting gate combining a strategy with key derivation, bypass and
/// rejection handling.
pub struct RateLimitMiddleware {
    name: String,
    strategy: Box<dyn Strategy>,
    key_generator: KeyGenerator,
    skip: Bypass,
    handler: RejectionHandler,
    message: String,
    status: StatusCode,
}

impl RateLimitMiddleware {
    /// Create a middleware with default key derivation, no bypass and the
    /// JSON rejection response.
    pub fn new(strategy: impl Strategy + 'static) -> Self {
        Self {
            name: strategy.kind().to_string(),
            strategy: Box::new(strategy),
            key_generator: KeyGenerator::default(),
            skip: Bypass::default(),
            handler: RejectionHandler::default(),
            message: DEFAULT_MESSAGE.to_string(),
            status: StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Set the name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the key generator.
    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Set the bypass predicate.
    pub fn with_skip(mut self, skip: Bypass) -> Self {
        self.skip = skip;
        self
    }

    /// Set the rejection handler.
    pub fn with_handler(mut self, handler: RejectionHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Set the rejection message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set the rejection status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying strategy.
    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    /// Rejection message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rejection status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Decide what to do with `request`.
    ///
    /// A request whose key cannot be derived is rejected.
    pub fn check(&self, request: &RequestInfo) -> Admission {
        if self.skip.matches(request) {
            trace!(policy = %self.name, path = %request.path, "Request bypasses rate limit");
            return Admission::Bypass;
        }

        let key = match self.key_generator.key(request) {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    policy = %self.name,
                    error = %e,
                    "Could not derive rate limit key, rejecting request"
                );
                let retry_after = self.strategy.full_retry_after();
                return Admission::Reject(self.reject(request, None, retry_after));
            }
        };

        let decision = self.strategy.check(&key);
        if decision.admitted {
            trace!(policy = %self.name, key = %key, remaining = decision.remaining, "Request admitted");
            Admission::Forward {
                headers: quota_headers(&decision),
            }
        } else {
            let retry_after = decision
                .retry_after
                .unwrap_or_else(|| self.strategy.full_retry_after());
            debug!(policy = %self.name, key = %key, retry_after = retry_after, "Request rejected");
            Admission::Reject(self.reject(request, Some(decision), retry_after))
        }
    }

    /// Forget the quota state of the key `request` maps to.
    pub fn reset(&self, request: &RequestInfo) -> Result<(), KeyError> {
        let key = self.key_generator.key(request)?;
        self.strategy.reset(&key);
        debug!(policy = %self.name, key = %key, "Reset rate limit");
        Ok(())
    }

    fn reject(
        &self,
        request: &RequestInfo,
        decision: Option<Decision>,
        retry_after: u64,
    ) -> Response<String> {
        let rejection = Rejection {
            status: self.status,
            message: self.message.clone(),
            retry_after,
            decision,
        };
        self.handler.respond(request, &rejection)
    }
}

impl std::fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("name", &self.name)
            .field("strategy", &self.strategy.kind())
            .field("limit", &self.strategy.limit())
            .field("key_generator", &self.key_generator)
            .field("skip", &self.skip)
            .field("handler", &self.handler)
            .field("status", &self.status)
            .finish()
    }
}

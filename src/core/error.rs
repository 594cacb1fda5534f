//! Error types for admission, generation and scheduler operations.

use std::time::Duration;

use thiserror::Error;

/// Reasons the admission manager refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    /// Circuit breaker is open and the cool-down has not elapsed.
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        /// Remaining cool-down.
        retry_after: Duration,
    },
    /// Request cap for the current window is reached.
    #[error("request quota reached, retry after {retry_after:?}")]
    RequestQuota {
        /// Time until the window rolls over.
        retry_after: Duration,
    },
    /// Token cap for the current window would be exceeded.
    #[error("token quota reached, retry after {retry_after:?}")]
    TokenQuota {
        /// Time until the window rolls over.
        retry_after: Duration,
    },
    /// The call alone is larger than the per-call ceiling. Waiting does not help.
    #[error("estimated {estimated} tokens exceeds per-call ceiling of {ceiling}")]
    OversizedCall {
        /// Estimated token cost of the call.
        estimated: u64,
        /// Configured per-call ceiling.
        ceiling: u64,
    },
}

impl AdmissionDenied {
    /// Whether waiting can ever turn this denial into an admission.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::OversizedCall { .. })
    }

    /// Suggested wait before re-checking, if the denial is time-recoverable.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after }
            | Self::RequestQuota { retry_after }
            | Self::TokenQuota { retry_after } => Some(*retry_after),
            Self::OversizedCall { .. } => None,
        }
    }
}

/// Failures reported by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Upstream quota exhausted (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Service unavailable or overloaded (HTTP 5xx).
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The call did not finish within its deadline.
    #[error("generation timed out")]
    Timeout,
    /// The connection was reset or refused mid-call.
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    /// Malformed request (HTTP 400).
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or rejected credentials (HTTP 401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Credentials lack permission (HTTP 403).
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Model or endpoint does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),
    /// Request rejected as invalid (argument, schema, safety).
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Anything not classified above.
    #[error("generation failed: {0}")]
    Other(String),
}

impl GenerationError {
    /// Map an HTTP status code plus message onto a variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => Self::BadRequest(message),
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            408 | 504 => Self::Timeout,
            422 => Self::Invalid(message),
            429 => Self::RateLimited(message),
            500..=599 => Self::Unavailable(message),
            _ => Self::Other(message),
        }
    }

    /// Classify a free-text error signal from a client library.
    ///
    /// Signals match whole words or status codes only, so "thereof" is not an
    /// EOF and "5000 tokens" is not a 500. Retryable signals are checked first
    /// so that a message mentioning both (e.g. "invalid response: 503") is
    /// treated as transient.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let words = signal_words(&message);
        let has = |needles: &[&str]| needles.iter().any(|n| words.contains(&format!(" {n} ")));

        if has(&["429", "rate limit", "rate limited", "ratelimit", "resource_exhausted", "quota"]) {
            Self::RateLimited(message)
        } else if has(&["500", "502", "503", "unavailable", "overloaded"]) {
            Self::Unavailable(message)
        } else if has(&["timeout", "timed out", "deadline exceeded"]) {
            Self::Timeout
        } else if has(&["connection reset", "connection refused", "broken pipe", "eof"]) {
            Self::ConnectionReset(message)
        } else if has(&["400", "bad request"]) {
            Self::BadRequest(message)
        } else if has(&["401", "unauthorized", "unauthenticated"]) {
            Self::Unauthorized(message)
        } else if has(&["403", "forbidden", "permission denied"]) {
            Self::Forbidden(message)
        } else if has(&["404", "not found"]) {
            Self::NotFound(message)
        } else if has(&["invalid"]) {
            Self::Invalid(message)
        } else {
            Self::Other(message)
        }
    }

    /// Whether a later attempt may succeed. Unknown errors count as retryable.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::BadRequest(_)
                | Self::Unauthorized(_)
                | Self::Forbidden(_)
                | Self::NotFound(_)
                | Self::Invalid(_)
        )
    }
}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Queue is full for the target source.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Admission manager refused the call.
    #[error("admission denied: {0}")]
    Admission(#[from] AdmissionDenied),
    /// Generation backend failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,
    /// A bounded operation exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// Invalid configuration.
    #[error("config invalid: {0}")]
    Config(String),
}

/// Lowercased words of `message` joined by single spaces, with a space at
/// each end so phrases can be matched on word boundaries.
fn signal_words(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 2);
    out.push(' ');
    for word in message
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_ascii_lowercase());
        out.push(' ');
    }
    out
}

impl SchedulerError {
    /// Whether retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Admission(denied) => denied.is_retryable(),
            Self::Generation(err) => err.is_retryable(),
            Self::Timeout(_) | Self::Backend(_) => true,
            Self::QueueFull(_) | Self::Cancelled | Self::Config(_) => false,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

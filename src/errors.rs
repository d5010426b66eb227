/*!
 * Error types for the subtrans pipeline.
 *
 * Every error that crosses the model boundary is classified into a kind that
 * fully determines retry behaviour. Errors carry two messages: a safe one for
 * user-facing output and logs, and the wrapped cause for troubleshooting.
 * The cause may contain sensitive fragments and is never shown directly.
 */

use std::fmt;

use thiserror::Error;

/// Classification of a pipeline error at the model boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Server 5xx, network, DNS, socket, timeout, unknown causes. Retried.
    Transient,
    /// HTTP 429. Retried with doubled backoff.
    RateLimit,
    /// HTTP 401/403. Not retried.
    Auth,
    /// HTTP 400/404, model not found. Not retried.
    BadRequest,
    /// Parse failures, hallucinated/duplicate/missing IDs, empty output,
    /// CPL overflow. Retried, since the model is nondeterministic.
    Validation,
}

impl ErrorKind {
    fn default_safe_message(self) -> &'static str {
        match self {
            ErrorKind::Transient => "Temporary upstream error. Please try again.",
            ErrorKind::RateLimit => "Rate limit exceeded. Please try again later.",
            ErrorKind::Auth => "Authentication failed. Please verify your API key and permissions.",
            ErrorKind::BadRequest => "Request rejected by upstream API.",
            ErrorKind::Validation => "Response validation failed.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Validation => "validation",
        };
        write!(f, "{}", name)
    }
}

/// Classified pipeline error with a safe message and a wrapped cause.
///
/// `Display` shows only the safe message; the cause is reachable through
/// [`AppError::cause`] for redacted logging.
#[derive(Error, Debug)]
#[error("{safe_message}")]
pub struct AppError {
    kind: ErrorKind,
    safe_message: String,
    cause: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error with an explicit safe message.
    /// An empty message falls back to the kind's default.
    pub fn new(kind: ErrorKind, safe_message: impl Into<String>, cause: anyhow::Error) -> Self {
        let msg = safe_message.into();
        let safe_message = if msg.trim().is_empty() {
            kind.default_safe_message().to_string()
        } else {
            msg
        };
        Self {
            kind,
            safe_message,
            cause: Some(cause),
        }
    }

    pub fn transient(cause: anyhow::Error) -> Self {
        Self::new(ErrorKind::Transient, "", cause)
    }

    pub fn rate_limit(cause: anyhow::Error) -> Self {
        Self::new(ErrorKind::RateLimit, "", cause)
    }

    pub fn auth(cause: anyhow::Error) -> Self {
        Self::new(ErrorKind::Auth, "", cause)
    }

    pub fn bad_request(cause: anyhow::Error) -> Self {
        Self::new(ErrorKind::BadRequest, "", cause)
    }

    pub fn validation(cause: anyhow::Error) -> Self {
        Self::new(ErrorKind::Validation, "", cause)
    }

    /// The error classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The user-facing message. Never contains request or response content.
    pub fn safe_message(&self) -> &str {
        &self.safe_message
    }

    /// The wrapped internal cause, if any.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    /// Whether the engine should retry after this error.
    ///
    /// Transient and RateLimit cover upstream hiccups; Validation is
    /// retryable because the model is nondeterministic and may produce a
    /// well-formed response on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Transient | ErrorKind::RateLimit | ErrorKind::Validation
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == ErrorKind::RateLimit
    }
}

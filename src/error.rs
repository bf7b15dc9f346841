//! Rampart error types
//!
//! Every failure that crosses the resilience layer is expressed as a
//! [`RampartError`] tagged with one [`ErrorKind`] from a closed taxonomy.
//! Raw failures coming out of a wrapped operation ([`RawError`]) are
//! classified exactly once by the [`Classifier`](crate::classify::Classifier);
//! errors that are already typed pass through untouched.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Authentication,
    Authorization,
    RateLimit,
    Validation,
    Timeout,
    Server,
    /// Cache tier failure. Non-fatal: callers degrade to origin.
    Cache,
    ReportGeneration,
    Configuration,
    Security,
    /// A circuit breaker short-circuited the call.
    CircuitBreakerOpen,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::Authorization,
        ErrorKind::RateLimit,
        ErrorKind::Validation,
        ErrorKind::Timeout,
        ErrorKind::Server,
        ErrorKind::Cache,
        ErrorKind::ReportGeneration,
        ErrorKind::Configuration,
        ErrorKind::Security,
        ErrorKind::CircuitBreakerOpen,
        ErrorKind::Unknown,
    ];

    /// Stable machine code surfaced to callers.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "AUTHORIZATION_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Server => "SERVER_ERROR",
            ErrorKind::Cache => "CACHE_ERROR",
            ErrorKind::ReportGeneration => "REPORT_GENERATION_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Security => "SECURITY_ERROR",
            ErrorKind::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Default retryability for this kind.
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorKind::Network
            | ErrorKind::RateLimit
            | ErrorKind::Timeout
            | ErrorKind::Server
            | ErrorKind::Cache
            | ErrorKind::ReportGeneration
            | ErrorKind::Unknown => true,
            ErrorKind::Authentication
            | ErrorKind::Authorization
            | ErrorKind::Validation
            | ErrorKind::Configuration
            | ErrorKind::Security
            | ErrorKind::CircuitBreakerOpen => false,
        }
    }

    /// Kinds that are never retried, whatever the retry configuration says.
    pub fn is_never_retried(self) -> bool {
        matches!(
            self,
            ErrorKind::CircuitBreakerOpen
                | ErrorKind::Validation
                | ErrorKind::Security
                | ErrorKind::Configuration
        )
    }

    /// Sanitized message shown to end users for this kind.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => {
                "Unable to reach the upstream service. Check connectivity and try again."
            }
            ErrorKind::Authentication => {
                "Authentication with the upstream service failed. Check your credentials."
            }
            ErrorKind::Authorization => {
                "You do not have permission to access this resource."
            }
            ErrorKind::RateLimit => {
                "The upstream service is rate limiting requests. Please wait and try again."
            }
            ErrorKind::Validation => "The request was invalid. Check the supplied parameters.",
            ErrorKind::Timeout => "The upstream service took too long to respond.",
            ErrorKind::Server => "The upstream service reported an internal error.",
            ErrorKind::Cache => "A caching problem occurred; results were fetched directly.",
            ErrorKind::ReportGeneration => "The report could not be generated. Please try again.",
            ErrorKind::Configuration => "The service is misconfigured. Contact an administrator.",
            ErrorKind::Security => "The request was rejected for security reasons.",
            ErrorKind::CircuitBreakerOpen => {
                "The upstream service is temporarily unavailable. Please try again later."
            }
            ErrorKind::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured context attached to a typed error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub tool: Option<String>,
    pub operation: Option<String>,
    /// Upstream HTTP status, when one was observed.
    pub status: Option<u16>,
    /// Number of attempts made before the error surfaced.
    pub attempts: u32,
}

/// Typed, sanitized error surfaced by the resilience layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RampartError {
    pub kind: ErrorKind,
    /// Sanitized detail. Safe to log; not shown to end users.
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub context: ErrorContext,
}

impl RampartError {
    /// Create an error of `kind` with the kind's default retryability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_after: None,
            context: ErrorContext::default(),
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimit,
            format!("rate limit exceeded, retry after {}s", retry_after.as_secs()),
        );
        err.retry_after = Some(retry_after);
        err
    }

    pub fn circuit_open(tool: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::CircuitBreakerOpen,
            format!("circuit breaker open for {tool}:{operation}"),
        )
        .with_operation(tool, operation)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    /// Attach the `(tool, operation)` pair the error was observed under.
    pub fn with_operation(mut self, tool: &str, operation: &str) -> Self {
        self.context.tool = Some(tool.to_owned());
        self.context.operation = Some(operation.to_owned());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.context.status = Some(status);
        self
    }

    /// Stable machine code (e.g. `RATE_LIMIT_ERROR`).
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Sanitized message suitable for end users.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    /// Whether a retry may succeed.
    pub fn is_transient(&self) -> bool {
        self.retryable && !self.kind.is_never_retried()
    }

    /// Provider-supplied backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// User-facing body for this error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.user_message(),
            retryable: self.retryable,
            retry_after_secs: self.retry_after.map(|d| d.as_secs_f64().ceil() as u64),
            tool: self.context.tool.clone(),
            operation: self.context.operation.clone(),
        }
    }
}

/// Serializable user-facing shape of a [`RampartError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: &'static str,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Unclassified failure reported by an upstream operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RawError {
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Failure with an HTTP status code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl From<reqwest::Error> for RawError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let err = err.without_url();
        let message = if err.is_timeout() {
            format!("request timeout: {err}")
        } else if err.is_connect() {
            format!("connection refused: {err}")
        } else {
            err.to_string()
        };
        Self {
            status,
            message,
            retry_after: None,
        }
    }
}

/// Failure returned by a wrapped operation: either raw, or already typed.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error(transparent)]
    Raw(#[from] RawError),
    #[error(transparent)]
    Typed(#[from] RampartError),
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        Failure::Raw(err.into())
    }
}

/// Result type alias for Rampart operations
pub type Result<T> = std::result::Result<T, RampartError>;

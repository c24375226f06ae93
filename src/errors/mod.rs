//! Error types for the keyword gateway.
//!
//! One taxonomy covers every provider. Each variant knows whether it may be
//! retried, whether it says something about upstream health (and therefore
//! feeds the circuit breaker), and how it should be presented to an end user.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Where a rate-limit rejection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOrigin {
    /// The local token bucket refused admission; no request was sent.
    Local,
    /// The upstream API answered with HTTP 429.
    Upstream,
}

/// Comprehensive error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request failed validation before anything was sent.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong.
        message: String,
        /// Offending field, when known.
        field: Option<String>,
    },

    /// The gateway or a provider is misconfigured.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is missing or invalid.
        message: String,
    },

    /// Credentials were rejected (HTTP 401/403 or an API-level auth code).
    #[error("Authentication failed for {provider}: {message}")]
    Authentication {
        /// Provider name.
        provider: String,
        /// Error message from the API.
        message: String,
    },

    /// Rate limit exceeded, locally or upstream.
    #[error("Rate limit exceeded for {provider}: {message}")]
    RateLimit {
        /// Provider name.
        provider: String,
        /// Error message.
        message: String,
        /// How long to wait before trying again.
        retry_after: Option<Duration>,
        /// Whether the local limiter or the upstream API refused.
        origin: RateLimitOrigin,
    },

    /// The provider's circuit breaker is open.
    #[error("Circuit breaker open for {provider}: service temporarily unavailable")]
    CircuitOpen {
        /// Provider name.
        provider: String,
        /// Time left until a probe call is allowed.
        retry_after: Option<Duration>,
    },

    /// The network call exceeded its per-operation timeout.
    #[error("Request to {provider} timed out after {elapsed:?} ({operation})")]
    Timeout {
        /// Provider name.
        provider: String,
        /// Operation label.
        operation: String,
        /// Configured timeout that was hit.
        elapsed: Duration,
    },

    /// The caller cancelled the operation.
    #[error("Request cancelled by caller ({operation})")]
    Cancelled {
        /// Operation label.
        operation: String,
    },

    /// Upstream server failure (HTTP 5xx or 529 overloaded).
    #[error("Upstream error from {provider} (HTTP {status}): {message}")]
    Upstream {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Server-provided retry hint.
        retry_after: Option<Duration>,
    },

    /// Upstream rejected the request with a non-retryable client status.
    #[error("Request rejected by {provider} (HTTP {status}): {message}")]
    Rejected {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Network or connection failure before a response arrived.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// A response could not be parsed into the expected shape.
    #[error("Failed to parse response from {provider}: {message}")]
    Parse {
        /// Provider name.
        provider: String,
        /// Error message.
        message: String,
        /// Leading part of the offending payload.
        excerpt: Option<String>,
    },

    /// Serialization of an outgoing payload failed.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Every provider in a cascade failed.
    #[error("All providers failed: {}", summarize_attempts(.attempts))]
    AllProvidersFailed {
        /// `(provider, error message)` per attempt, in priority order.
        attempts: Vec<(String, String)>,
    },

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

fn summarize_attempts(attempts: &[(String, String)]) -> String {
    if attempts.is_empty() {
        return "no providers attempted".to_string();
    }
    attempts
        .iter()
        .map(|(provider, message)| format!("{provider}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stable, low-cardinality error label for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Validation failure.
    Validation,
    /// Configuration failure.
    Configuration,
    /// Authentication failure.
    Authentication,
    /// Rate limited.
    RateLimit,
    /// Circuit open.
    CircuitOpen,
    /// Timed out.
    Timeout,
    /// Cancelled by caller.
    Cancelled,
    /// Upstream 5xx.
    Upstream,
    /// Upstream 4xx.
    Rejected,
    /// Connection failure.
    Connection,
    /// Parse failure.
    Parse,
    /// Serialization failure.
    Serialization,
    /// Cascade exhausted.
    AllProvidersFailed,
    /// Internal error.
    Internal,
}

impl ErrorKind {
    /// Returns the label as a static string.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Connection => "connection",
            ErrorKind::Parse => "parse",
            ErrorKind::Serialization => "serialization",
            ErrorKind::AllProvidersFailed => "all_providers_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Human-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The upstream service is overloaded.
    Overloaded,
    /// Too many requests.
    RateLimited,
    /// The provider is temporarily disabled by the circuit breaker.
    TemporarilyUnavailable,
    /// The request took too long.
    Timeout,
    /// Credentials need fixing.
    Authentication,
    /// The request itself is invalid.
    InvalidRequest,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Returns the message shown to end users for this category.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::Overloaded => {
                "The AI service is currently overloaded. Please try again in a few minutes."
            }
            ErrorCategory::RateLimited => {
                "Too many requests right now. Please wait a moment and try again."
            }
            ErrorCategory::TemporarilyUnavailable => {
                "This data provider is temporarily unavailable. Please try again shortly."
            }
            ErrorCategory::Timeout => {
                "The request took too long to complete. Try a smaller batch or try again."
            }
            ErrorCategory::Authentication => {
                "The provider rejected our credentials. Please check the API key configuration."
            }
            ErrorCategory::InvalidRequest => "The request was invalid. Please check your input.",
            ErrorCategory::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

fn overloaded_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(overloaded|over capacity|capacity exceeded)\b").ok())
        .as_ref()
}

fn message_patterns() -> &'static [(Regex, ErrorCategory)] {
    static PATTERNS: OnceLock<Vec<(Regex, ErrorCategory)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)\b(overloaded|over capacity|529)\b", ErrorCategory::Overloaded),
            (r"(?i)(rate.?limit|too many requests|\b429\b)", ErrorCategory::RateLimited),
            (r"(?i)(circuit.?(breaker)?.?open|temporarily unavailable)", ErrorCategory::TemporarilyUnavailable),
            (r"(?i)(timed? ?out|deadline exceeded)", ErrorCategory::Timeout),
            (r"(?i)(unauthori[sz]ed|invalid api key|authentication|forbidden|\b401\b|\b403\b)", ErrorCategory::Authentication),
        ]
        .into_iter()
        .filter_map(|(pattern, category)| Regex::new(pattern).ok().map(|re| (re, category)))
        .collect()
    })
}

/// Maps arbitrary error text (for example from a collaborator that only has
/// a string) onto a user-facing category.
pub fn categorize_message(message: &str) -> ErrorCategory {
    message_patterns()
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map_or(ErrorCategory::Unknown, |(_, category)| *category)
}

impl GatewayError {
    /// Returns true if the retry executor may re-attempt this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimit { .. }
                | GatewayError::Timeout { .. }
                | GatewayError::Upstream { .. }
                | GatewayError::Connection { .. }
        )
    }

    /// Returns true if this error says the upstream is unhealthy.
    pub fn should_circuit_break(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout { .. }
                | GatewayError::Cancelled { .. }
                | GatewayError::Upstream { .. }
                | GatewayError::Connection { .. }
        )
    }

    /// Returns the retry-after hint if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimit { retry_after, .. }
            | GatewayError::CircuitOpen { retry_after, .. }
            | GatewayError::Upstream { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the stable error label.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation { .. } => ErrorKind::Validation,
            GatewayError::Configuration { .. } => ErrorKind::Configuration,
            GatewayError::Authentication { .. } => ErrorKind::Authentication,
            GatewayError::RateLimit { .. } => ErrorKind::RateLimit,
            GatewayError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::Cancelled { .. } => ErrorKind::Cancelled,
            GatewayError::Upstream { .. } => ErrorKind::Upstream,
            GatewayError::Rejected { .. } => ErrorKind::Rejected,
            GatewayError::Connection { .. } => ErrorKind::Connection,
            GatewayError::Parse { .. } => ErrorKind::Parse,
            GatewayError::Serialization { .. } => ErrorKind::Serialization,
            GatewayError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            GatewayError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Maps this error onto a user-facing category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Upstream { status, message, .. } => {
                if *status == 529
                    || *status == 503
                    || overloaded_pattern().is_some_and(|re| re.is_match(message))
                {
                    ErrorCategory::Overloaded
                } else {
                    ErrorCategory::Unknown
                }
            }
            GatewayError::RateLimit { .. } => ErrorCategory::RateLimited,
            GatewayError::CircuitOpen { .. } => ErrorCategory::TemporarilyUnavailable,
            GatewayError::Timeout { .. } => ErrorCategory::Timeout,
            GatewayError::Authentication { .. } => ErrorCategory::Authentication,
            GatewayError::Validation { .. } | GatewayError::Rejected { .. } => {
                ErrorCategory::InvalidRequest
            }
            GatewayError::AllProvidersFailed { attempts } => attempts
                .last()
                .map_or(ErrorCategory::Unknown, |(_, message)| categorize_message(message)),
            GatewayError::Configuration { .. }
            | GatewayError::Cancelled { .. }
            | GatewayError::Connection { .. }
            | GatewayError::Parse { .. }
            | GatewayError::Serialization { .. }
            | GatewayError::Internal { .. } => ErrorCategory::Unknown,
        }
    }

    /// Returns the message to show an end user.
    pub fn user_message(&self) -> &'static str {
        self.category().user_message()
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a validation error for a specific field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        GatewayError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a parse error, keeping a short excerpt of the payload.
    pub fn parse(provider: impl Into<String>, message: impl Into<String>, payload: &str) -> Self {
        let excerpt = (!payload.is_empty()).then(|| payload.chars().take(200).collect());
        GatewayError::Parse {
            provider: provider.into(),
            message: message.into(),
            excerpt,
        }
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(
        provider: &str,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let provider = provider.to_string();
        let message = message.into();
        match status {
            401 | 403 => GatewayError::Authentication { provider, message },
            400 | 404 | 409 | 413 | 422 => GatewayError::Validation {
                message: format!("{provider} rejected the request (HTTP {status}): {message}"),
                field: None,
            },
            429 => GatewayError::RateLimit {
                provider,
                message,
                retry_after,
                origin: RateLimitOrigin::Upstream,
            },
            500..=599 => GatewayError::Upstream {
                provider,
                status,
                message,
                retry_after,
            },
            _ => GatewayError::Rejected {
                provider,
                status,
                message,
            },
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Parse {
                provider: "transport".to_string(),
                message: err.to_string(),
                excerpt: None,
            }
        } else {
            GatewayError::Connection {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::Configuration {
            message: format!("Invalid URL: {err}"),
        }
    }
}

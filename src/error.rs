use std::time::Duration;
use thiserror::Error;

/// Structured error context for configuration and runtime errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error (e.g., "services.gemini_api.requests_per_minute")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "circuit_breaker", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the rate limiter refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    MinuteLimitExceeded,
    HourLimitExceeded,
    BurstLimitExceeded,
}

impl RateLimitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitReason::MinuteLimitExceeded => "minute_limit_exceeded",
            RateLimitReason::HourLimitExceeded => "hour_limit_exceeded",
            RateLimitReason::BurstLimitExceeded => "burst_limit_exceeded",
        }
    }
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the circuit breaker refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitRejection {
    /// Still inside the recovery window after the last failure.
    Open,
    /// The half-open trial budget is used up.
    HalfOpenSaturated,
}

impl std::fmt::Display for CircuitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitRejection::Open => f.write_str("circuit is open"),
            CircuitRejection::HalfOpenSaturated => f.write_str("too many half-open calls"),
        }
    }
}

/// Unified error type for the resilience layer.
///
/// `RateLimited` and `CircuitOpen` are recoverable rejections raised before the
/// wrapped operation runs; `Upstream` carries the wrapped operation's own failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit exceeded for '{service}': {reason}, retry after {:.1}s", .retry_after.as_secs_f64())]
    RateLimited {
        service: String,
        reason: RateLimitReason,
        retry_after: Duration,
    },

    #[error("Circuit breaker '{service}': {reason}, retry after {:.0}s", .retry_after.as_secs_f64())]
    CircuitOpen {
        service: String,
        reason: CircuitRejection,
        retry_after: Duration,
    },

    #[error("Operation on '{service}' timed out after {after:?}")]
    Timeout { service: String, after: Duration },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream operation failed: {0}")]
    Upstream(Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Wrap an upstream failure.
    pub fn upstream<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Upstream(err.into())
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Back-off hint for recoverable rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } | Error::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// True when the call was refused before the wrapped operation ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::CircuitOpen { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }

    pub(crate) fn poisoned(source: &'static str) -> Self {
        Error::runtime_with_context(
            "lock poisoned",
            ErrorContext::new().with_source(source),
        )
    }
}

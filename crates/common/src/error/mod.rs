//! Common error classification shared across trialflow crates
//!
//! Every error that crosses a resilience boundary is classified through
//! [`ErrorClassification`]. Retry conditions use `is_retryable()` to decide
//! whether another attempt is worthwhile, and callers use `severity()` to pick
//! a log level.
//!
//! ## Taxonomy
//!
//! | Class | Examples | Retryable |
//! |-------|----------|-----------|
//! | **Transient** | timeouts, connection resets, 429/5xx | yes |
//! | **Circuit open** | call rejected without being attempted | no |
//! | **Non-retryable / domain** | invalid input, 4xx | no |
//! | **Configuration** | invalid thresholds or limits | no |
//!
//! Module-specific errors compose with this trait rather than with a shared
//! enum:
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum UpstreamError {
//!     #[error("connection reset")]
//!     Connection,
//!     #[error("bad request: {0}")]
//!     BadRequest(String),
//! }
//!
//! impl ErrorClassification for UpstreamError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Connection)
//!     }
//!     // ...
//! }
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again (timeouts, rate limiting, temporary unavailability).
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (for
    /// example from a `Retry-After` header).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field failed validation
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// The configuration document could not be parsed
    #[error("Failed to parse {format} configuration: {message}")]
    Parse { format: &'static str, message: String },
}

impl ConfigError {
    /// Shorthand for an [`ConfigError::Invalid`] error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

impl ErrorClassification for ConfigError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }
}

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ErrorClassification for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::TimedOut
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionRefused
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }

    fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

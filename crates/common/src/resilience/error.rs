//! Error types shared by the resilience primitives
//!
//! [`ResilienceError`] wraps the caller's own error type `E` so the original
//! failure is never lost, while making "never attempted" (circuit open,
//! permit timeout) distinguishable from "attempted and failed".

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Raised when a breaker rejects a call without invoking the operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit breaker '{name}' is open ({failure_count} failures)")]
pub struct CircuitBreakerError {
    /// Breaker name
    pub name: String,
    /// Failure count at the time of rejection
    pub failure_count: u64,
    /// When the most recent failure was recorded
    pub last_failure_time: Option<Instant>,
    /// Time elapsed since the most recent failure
    pub since_last_failure: Option<Duration>,
}

/// Raised when a concurrency permit could not be obtained in time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Timed out after {waited:?} waiting for a '{key}' permit")]
pub struct PermitTimeout {
    /// Limiter key
    pub key: String,
    /// How long the caller waited
    pub waited: Duration,
}

/// Errors produced by resilience wrappers around an operation failing with `E`
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker is open; the operation was not invoked
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),

    /// Every allowed attempt failed with a retriable error
    #[error("All {attempts} attempts failed: {source}")]
    RetriesExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// The last failure
        #[source]
        source: E,
    },

    /// The operation failed with an error that is not retried
    #[error("Operation failed with non-retryable error after {attempts} attempt(s): {source}")]
    NonRetryable {
        /// Attempts made, including the failing one
        attempts: u32,
        /// The failure
        #[source]
        source: E,
    },

    /// The overall deadline expired; the in-flight attempt was abandoned
    #[error("Deadline of {deadline:?} exceeded after {attempts} attempt(s)")]
    DeadlineExceeded {
        /// Configured deadline
        deadline: Duration,
        /// Attempts started, including the abandoned one
        attempts: u32,
    },

    /// A concurrency permit could not be acquired
    #[error(transparent)]
    PermitTimeout(#[from] PermitTimeout),

    /// The operation failed and no retry policy was involved
    #[error("Operation failed: {source}")]
    Operation {
        /// The failure
        #[source]
        source: E,
    },
}

/// Result type for resilience-wrapped operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The operation's own error, if this variant carries one
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::RetriesExhausted { source, .. }
            | Self::NonRetryable { source, .. }
            | Self::Operation { source } => Some(source),
            _ => None,
        }
    }

    /// Consume the error and return the operation's own error, if any
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::RetriesExhausted { source, .. }
            | Self::NonRetryable { source, .. }
            | Self::Operation { source } => Some(source),
            _ => None,
        }
    }

    /// True when the operation was never invoked
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen(_) | Self::PermitTimeout(_))
    }

    /// Collapse a layered error produced by composing wrappers
    ///
    /// Inner wrapper failures keep their own variant; outer retry accounting
    /// is applied only when the inner error is the operation's own error.
    pub fn flatten(layered: ResilienceError<ResilienceError<E>>) -> Self {
        match layered {
            ResilienceError::CircuitOpen(err) => Self::CircuitOpen(err),
            ResilienceError::PermitTimeout(err) => Self::PermitTimeout(err),
            ResilienceError::DeadlineExceeded { deadline, attempts } => {
                Self::DeadlineExceeded { deadline, attempts }
            }
            ResilienceError::RetriesExhausted { attempts, source } => match source {
                Self::Operation { source } => Self::RetriesExhausted { attempts, source },
                other => other,
            },
            ResilienceError::NonRetryable { attempts, source } => match source {
                Self::Operation { source } => Self::NonRetryable { attempts, source },
                other => other,
            },
            ResilienceError::Operation { source } => source,
        }
    }
}

impl ErrorClassification for CircuitBreakerError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }
}

impl ErrorClassification for PermitTimeout {
    fn is_retryable(&self) -> bool {
        true
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen(_) | Self::NonRetryable { .. } => false,
            Self::RetriesExhausted { .. } | Self::DeadlineExceeded { .. } => false,
            Self::PermitTimeout(_) => true,
            Self::Operation { source } => source.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen(_) | Self::PermitTimeout(_) => ErrorSeverity::Warning,
            Self::RetriesExhausted { .. } | Self::DeadlineExceeded { .. } => ErrorSeverity::Error,
            Self::NonRetryable { source, .. } | Self::Operation { source } => source.severity(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Operation { source } => source.retry_after(),
            _ => None,
        }
    }
}

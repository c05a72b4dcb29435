//! Scripted stand-ins for unreliable remote calls
//!
//! [`ScriptedOperation`] replays a fixed sequence of outcomes, one per call,
//! and counts how often it was invoked. Handles are cheap to clone and share
//! the script, so a clone can be moved into a closure while the test keeps
//! the original to inspect the call count.

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};
use crate::resilience::HasStatusCode;

/// Failure produced by a [`ScriptedOperation`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptedError {
    /// Retryable failure
    #[error("transient failure on call {call}")]
    Transient {
        /// 1-based call number
        call: usize,
    },
    /// Non-retryable failure
    #[error("permanent failure on call {call}")]
    Permanent {
        /// 1-based call number
        call: usize,
    },
}

impl ErrorClassification for ScriptedError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transient { .. } => ErrorSeverity::Warning,
            Self::Permanent { .. } => ErrorSeverity::Error,
        }
    }
}

#[derive(Debug, Clone)]
enum Step<T> {
    Ok(T),
    Transient,
    Permanent,
}

/// Operation that replays scripted outcomes
///
/// Once the script is exhausted every further call repeats the last step;
/// an empty script fails transiently.
#[derive(Debug, Clone)]
pub struct ScriptedOperation<T> {
    script: Arc<Mutex<VecDeque<Step<T>>>>,
    last: Arc<Mutex<Option<Step<T>>>>,
    calls: Arc<AtomicUsize>,
}

impl<T: Clone> Default for ScriptedOperation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ScriptedOperation<T> {
    /// Operation with an empty script
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Operation that fails transiently `failures` times, then returns `value`
    pub fn flaky(failures: usize, value: T) -> Self {
        (0..failures).fold(Self::new(), |op, _| op.then_transient()).then_ok(value)
    }

    /// Append a success
    #[must_use]
    pub fn then_ok(self, value: T) -> Self {
        self.script.lock().push_back(Step::Ok(value));
        self
    }

    /// Append a retryable failure
    #[must_use]
    pub fn then_transient(self) -> Self {
        self.script.lock().push_back(Step::Transient);
        self
    }

    /// Append a non-retryable failure
    #[must_use]
    pub fn then_permanent(self) -> Self {
        self.script.lock().push_back(Step::Permanent);
        self
    }

    /// Run the next scripted step
    pub fn call(&self) -> Result<T, ScriptedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = {
            let mut last = self.last.lock();
            match self.script.lock().pop_front() {
                Some(step) => {
                    *last = Some(step.clone());
                    step
                }
                None => last.clone().unwrap_or(Step::Transient),
            }
        };
        match step {
            Step::Ok(value) => Ok(value),
            Step::Transient => Err(ScriptedError::Transient { call }),
            Step::Permanent => Err(ScriptedError::Permanent { call }),
        }
    }

    /// Async form of [`ScriptedOperation::call`]
    pub async fn call_async(&self) -> Result<T, ScriptedError> {
        tokio::task::yield_now().await;
        self.call()
    }

    /// Calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Minimal response carrying a protocol status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    /// Status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl StatusResponse {
    /// Response with `status` and `body`
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }
}

impl HasStatusCode for StatusResponse {
    fn status_code(&self) -> Option<u16> {
        Some(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_replays_then_repeats_last_step() {
        let op = ScriptedOperation::new().then_transient().then_ok(7);

        assert_eq!(op.call(), Err(ScriptedError::Transient { call: 1 }));
        assert_eq!(op.call(), Ok(7));
        assert_eq!(op.call(), Ok(7));
        assert_eq!(op.calls(), 3);
    }

    #[test]
    fn test_clones_share_script_and_count() {
        let op = ScriptedOperation::flaky(1, "ok");
        let clone = op.clone();

        assert!(clone.call().is_err());
        assert_eq!(op.call(), Ok("ok"));
        assert_eq!(op.calls(), 2);
    }

    #[test]
    fn test_classification() {
        assert!(ScriptedError::Transient { call: 1 }.is_retryable());
        assert!(!ScriptedError::Permanent { call: 1 }.is_retryable());
        assert_eq!(ScriptedError::Permanent { call: 2 }.severity(), ErrorSeverity::Error);
    }

    #[tokio::test]
    async fn test_empty_script_fails_transiently() {
        let op: ScriptedOperation<u8> = ScriptedOperation::new();
        assert_eq!(op.call_async().await, Err(ScriptedError::Transient { call: 1 }));
    }
}

//! Errors raised by nodes and flows
//!
//! A [`NodeError`] is what a node phase returns when it cannot continue. The
//! flow engine never propagates it: it is written into the shared context
//! and the walk halts. [`FlowError`] covers the mistakes a caller makes
//! while building or driving a flow.

use std::error::Error as StdError;

use thiserror::Error;
use trialflow_common::utils::short_type_name;
use trialflow_common::{ErrorClassification, ErrorSeverity};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of a single node phase
///
/// Carries a short `error_type` label (reported under the `error_type`
/// key of the shared context) and a human-readable message.
#[derive(Debug, Error)]
#[error("{error_type}: {message}")]
pub struct NodeError {
    error_type: String,
    message: String,
    retryable: bool,
    #[source]
    source: Option<BoxError>,
}

impl NodeError {
    /// Create an error with an explicit type label
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error_type: error_type.into(), message: message.into(), retryable: false, source: None }
    }

    /// A required shared-context key is absent
    pub fn missing_input(key: &str) -> Self {
        Self::new("MissingInput", format!("required key '{key}' is missing from the shared context"))
    }

    /// A shared-context value has the wrong shape
    pub fn invalid_input(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::new("InvalidInput", format!("key '{key}' is invalid: {reason}"))
    }

    /// The node has no implementation of a phase for the requested mode
    pub fn unsupported(node_id: &str, phase: &str) -> Self {
        Self::new("UnsupportedMode", format!("node '{node_id}' has no blocking {phase}"))
    }

    /// Wrap any error, labelling it with the error's type name
    ///
    /// Retryability is taken from the wrapped error's classification.
    pub fn from_error<E>(err: E) -> Self
    where
        E: StdError + ErrorClassification + Send + Sync + 'static,
    {
        Self {
            error_type: short_type_name::<E>().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            source: Some(Box::new(err)),
        }
    }

    /// Wrap an error that carries no classification
    pub fn from_unclassified<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            error_type: short_type_name::<E>().to_string(),
            message: err.to_string(),
            retryable: false,
            source: Some(Box::new(err)),
        }
    }

    /// Mark the error as transient
    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Short type label
    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_unclassified(err)
    }
}

impl ErrorClassification for NodeError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn severity(&self) -> ErrorSeverity {
        if self.retryable {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

/// Errors building or driving a [`Flow`](crate::flow::Flow)
#[derive(Debug, Error)]
pub enum FlowError {
    /// The requested start node is not registered
    #[error("Start node '{id}' is not registered in the flow")]
    MissingStartNode {
        /// Requested start id
        id: String,
    },

    /// Two different nodes share an id
    #[error("Node id '{id}' is registered by two different nodes")]
    DuplicateNode {
        /// Conflicting id
        id: String,
    },

    /// A blocking run needs its own runtime but was called from inside one
    #[error("Flow needs non-blocking execution; use run_async inside a tokio runtime")]
    BlockingInsideRuntime,

    /// The private runtime for a blocking run could not be built
    #[error("Failed to build flow runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ErrorClassification for FlowError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Runtime(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }
}

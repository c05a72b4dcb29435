//! The node contract
//!
//! A node is one pipeline step with three ordered phases:
//!
//! 1. `prep` extracts its input from the [`SharedContext`]
//! 2. `exec` does the work, typically an outbound call wrapped in the
//!    resilience layer
//! 3. `post` writes results back and picks the next node
//!
//! Every phase has a blocking and a non-blocking form. The non-blocking forms
//! default to the blocking ones, so a blocking node implements `prep` and
//! `exec` (plus `post` when it stores results or branches) and works under
//! both modes. A node doing async I/O overrides
//! `exec_async` (and any other async phase it needs), leaves `exec` at its
//! default and declares [`ExecutionMode::NonBlocking`].
//!
//! ```rust,ignore
//! struct Search { client: TrialsClient }
//!
//! #[async_trait]
//! impl Node for Search {
//!     type Prep = String;
//!     type Exec = Vec<Study>;
//!
//!     fn mode(&self) -> ExecutionMode { ExecutionMode::NonBlocking }
//!
//!     fn prep(&self, shared: &SharedContext) -> Result<String, NodeError> {
//!         shared.require("query")
//!     }
//!
//!     async fn exec_async(&self, query: &String) -> Result<Vec<Study>, NodeError> {
//!         self.client.search(query).await.map_err(NodeError::from_error)
//!     }
//!
//!     fn post(&self, shared: &mut SharedContext, _: String, studies: Vec<Study>) -> Result<Next, NodeError> {
//!         if studies.is_empty() { return Ok(Next::branch("empty")); }
//!         shared.set("studies", &studies)?;
//!         Ok(Next::Default)
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trialflow_common::utils::short_type_name;

use super::context::SharedContext;
use crate::error::NodeError;

/// Which form of the phases a node (or flow) runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Phases run on the calling thread
    #[default]
    Blocking,
    /// Phases are awaited on a tokio runtime
    NonBlocking,
}

impl ExecutionMode {
    /// Label used in logs and metric tags
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::NonBlocking => "non_blocking",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successor selected by a node's `post` phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Follow the default edge; the run completes when there is none
    Default,
    /// Follow the edge with this label
    Branch(String),
    /// Jump to the node registered under this id
    Goto(String),
    /// Complete the run
    Stop,
}

impl Next {
    /// Labelled edge
    pub fn branch(label: impl Into<String>) -> Self {
        Self::Branch(label.into())
    }

    /// Jump by id
    pub fn goto(id: impl Into<String>) -> Self {
        Self::Goto(id.into())
    }
}

/// Phase of a node in which an error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Prep,
    Exec,
    Post,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prep => "prep",
            Self::Exec => "exec",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A three-phase pipeline step
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// Output of `prep`, input of `exec`
    type Prep: Send + Sync + 'static;
    /// Output of `exec`
    type Exec: Send + 'static;

    /// Node id; defaults to the implementing type's name
    fn id(&self) -> String {
        short_type_name::<Self>().to_string()
    }

    /// Which form of the phases this node needs
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Blocking
    }

    /// Read this node's input from the shared context
    ///
    /// # Errors
    ///
    /// Fails when a required input is absent or malformed.
    fn prep(&self, shared: &SharedContext) -> Result<Self::Prep, NodeError>;

    /// Do the node's work
    ///
    /// The default reports the phase as unsupported, for nodes that only
    /// implement [`Node::exec_async`].
    ///
    /// # Errors
    ///
    /// Fails with whatever the work fails with.
    fn exec(&self, _prep: &Self::Prep) -> Result<Self::Exec, NodeError> {
        Err(NodeError::unsupported(&self.id(), Phase::Exec.as_str()))
    }

    /// Write results into the shared context and choose the successor
    ///
    /// The default stores nothing and follows the default edge.
    ///
    /// # Errors
    ///
    /// Fails when results cannot be stored.
    fn post(&self, _shared: &mut SharedContext, _prep: Self::Prep, _exec: Self::Exec) -> Result<Next, NodeError> {
        Ok(Next::Default)
    }

    /// Non-blocking `prep`
    async fn prep_async(&self, shared: &SharedContext) -> Result<Self::Prep, NodeError> {
        self.prep(shared)
    }

    /// Non-blocking `exec`
    async fn exec_async(&self, prep: &Self::Prep) -> Result<Self::Exec, NodeError> {
        self.exec(prep)
    }

    /// Non-blocking `post`
    async fn post_async(
        &self,
        shared: &mut SharedContext,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> Result<Next, NodeError> {
        self.post(shared, prep, exec)
    }
}

/// Error raised in a known phase
#[derive(Debug)]
pub(crate) struct PhaseError {
    pub(crate) phase: Phase,
    pub(crate) error: NodeError,
}

impl PhaseError {
    fn at(phase: Phase) -> impl FnOnce(NodeError) -> Self {
        move |error| Self { phase, error }
    }
}

/// Object-safe view of a [`Node`] with its associated types erased
#[async_trait]
pub(crate) trait Step: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    fn run(&self, shared: &mut SharedContext) -> Result<Next, PhaseError>;

    async fn run_async(&self, shared: &mut SharedContext) -> Result<Next, PhaseError>;
}

pub(crate) struct Erased<N>(pub(crate) N);

#[async_trait]
impl<N: Node> Step for Erased<N> {
    fn mode(&self) -> ExecutionMode {
        self.0.mode()
    }

    fn run(&self, shared: &mut SharedContext) -> Result<Next, PhaseError> {
        let prep = self.0.prep(shared).map_err(PhaseError::at(Phase::Prep))?;
        let exec = self.0.exec(&prep).map_err(PhaseError::at(Phase::Exec))?;
        self.0.post(shared, prep, exec).map_err(PhaseError::at(Phase::Post))
    }

    async fn run_async(&self, shared: &mut SharedContext) -> Result<Next, PhaseError> {
        let prep = self.0.prep_async(shared).await.map_err(PhaseError::at(Phase::Prep))?;
        let exec = self.0.exec_async(&prep).await.map_err(PhaseError::at(Phase::Exec))?;
        self.0.post_async(shared, prep, exec).await.map_err(PhaseError::at(Phase::Post))
    }
}

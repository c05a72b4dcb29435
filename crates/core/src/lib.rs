//! # Trialflow Core
//!
//! Orchestration layer built on the `trialflow-common` resilience
//! primitives.
//!
//! This crate contains:
//! - The three-phase node contract and the flow engine walking node graphs
//! - The shared context threaded through one flow run
//! - A batch node fanning list items out through a `BatchProcessor`
//!
//! ## Architecture Principles
//! - Only depends on `trialflow-common`
//! - No transport or domain code: outbound calls are injected by nodes
//! - Node failures are reported through the shared context, never raised
//!
//! ```rust,ignore
//! let parse = NodeHandle::new(ParseQuery);
//! let search = NodeHandle::new(SearchTrials::new(client));
//! parse.then(&search).then(&NodeHandle::new(Summarize));
//!
//! let flow = Flow::new(&parse)?;
//! let shared = flow.run_async(SharedContext::new()).await;
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod batch_node;
pub mod error;
pub mod flow;

pub use batch_node::{BatchNode, BatchOutput};
pub use error::{FlowError, NodeError};
pub use flow::{
    ExecutionMode, Flow, FlowOutcome, FlowReport, Next, Node, NodeHandle, NodeStats, SharedContext, Termination,
};

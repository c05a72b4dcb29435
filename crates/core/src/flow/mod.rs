//! Node / flow execution engine
//!
//! - [`node`]: the three-phase [`Node`] contract and [`Next`] successor choice
//! - [`graph`]: [`NodeHandle`] with owned default and labelled edges (weak back links close cycles)
//! - [`context`]: the [`SharedContext`] threaded through a run
//! - [`engine`]: the [`Flow`] walking the graph in blocking or non-blocking mode

pub mod context;
pub mod engine;
pub mod graph;
pub mod node;

pub use context::{SharedContext, ERROR_KEY, ERROR_NODE_KEY, ERROR_TYPE_KEY};
pub use engine::{metric_names, Flow, FlowOutcome, FlowReport, NodeStats, Termination, DEFAULT_MAX_STEPS};
pub use graph::{Branch, NodeHandle};
pub use node::{ExecutionMode, Next, Node, Phase};

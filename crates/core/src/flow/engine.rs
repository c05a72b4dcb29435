//! Flow execution
//!
//! A [`Flow`] walks a node graph from its start node. Each step runs the
//! node's three phases and follows the successor chosen by `post`. The walk
//! ends normally when a node yields no successor.
//!
//! Failures never escape a run. A phase error, a successor that is not
//! registered, or an exhausted step budget is written into the shared
//! context under [`ERROR_KEY`], [`ERROR_TYPE_KEY`] and [`ERROR_NODE_KEY`],
//! and the walk halts. Only construction mistakes (such as an unknown start
//! node) surface as [`FlowError`].

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use trialflow_common::observability::{noop_metrics, SharedMetrics};

use super::context::{SharedContext, ERROR_KEY, ERROR_NODE_KEY, ERROR_TYPE_KEY};
use super::graph::{EdgeTarget, NodeHandle};
use super::node::{ExecutionMode, Next, Phase, PhaseError};
use crate::error::FlowError;

/// Default bound on node executions in one run
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// Metric names emitted by flows
pub mod metric_names {
    /// Node executions, tagged `node_id`, `status` and `mode`
    pub const NODE_EXECUTIONS: &str = "node_executions_total";
    /// Node execution time in seconds, tagged `node_id`
    pub const NODE_DURATION: &str = "node_execution_duration";
    /// Flow runs, tagged `start` and `status`
    pub const FLOW_RUNS: &str = "flow_runs_total";
}

/// Execution statistics of one node across runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub executions: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub last_duration: Duration,
}

impl NodeStats {
    /// Mean duration per execution
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.executions) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => Duration::from_secs_f64(self.total_duration.as_secs_f64() / self.executions as f64),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A node yielded no successor
    Completed,
    /// A node phase returned an error
    Failed {
        node_id: String,
        phase: Phase,
        error_type: String,
        message: String,
    },
    /// A node chose a successor that is not registered
    UnknownNode {
        node_id: String,
        target: String,
    },
    /// The run reached the flow's step budget
    StepLimit {
        limit: usize,
    },
}

impl Termination {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    const fn status(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::UnknownNode { .. } => "unknown_node",
            Self::StepLimit { .. } => "step_limit",
        }
    }
}

/// Trace of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    /// Ids of the executed nodes, in order
    pub path: Vec<String>,
    pub termination: Termination,
    pub mode: ExecutionMode,
    pub elapsed: Duration,
}

/// Shared context and trace of one run
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub shared: SharedContext,
    pub report: FlowReport,
}

/// A reusable node graph with a designated start node
///
/// Runs never mutate the graph; each run only mutates the [`SharedContext`]
/// it is given. Per-node statistics accumulate across runs.
pub struct Flow {
    start: NodeHandle,
    nodes: BTreeMap<String, NodeHandle>,
    mode: Option<ExecutionMode>,
    max_steps: usize,
    metrics: SharedMetrics,
    stats: Mutex<BTreeMap<String, NodeStats>>,
}

impl Flow {
    /// Build a flow from `start` and every node reachable from it
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DuplicateNode`] when two reachable nodes share an
    /// id.
    pub fn new(start: &NodeHandle) -> Result<Self, FlowError> {
        let mut flow = Self {
            start: start.clone(),
            nodes: BTreeMap::new(),
            mode: None,
            max_steps: DEFAULT_MAX_STEPS,
            metrics: noop_metrics(),
            stats: Mutex::new(BTreeMap::new()),
        };
        flow.register(start)?;
        Ok(flow)
    }

    /// Build a flow from explicit nodes, starting at `start_id`
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MissingStartNode`] when no registered node has
    /// id `start_id`, or [`FlowError::DuplicateNode`] on an id clash.
    pub fn from_nodes<'a>(
        nodes: impl IntoIterator<Item = &'a NodeHandle>,
        start_id: &str,
    ) -> Result<Self, FlowError> {
        let mut nodes = nodes.into_iter();
        let first = nodes.next().ok_or_else(|| FlowError::MissingStartNode { id: start_id.to_string() })?;
        let mut flow = Self::new(first)?;
        for node in nodes {
            flow.register(node)?;
        }
        flow.with_start(start_id)
    }

    /// Register `node` and everything reachable from it
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DuplicateNode`] on an id clash.
    pub fn add_node(mut self, node: &NodeHandle) -> Result<Self, FlowError> {
        self.register(node)?;
        Ok(self)
    }

    /// Start runs at the registered node `id`
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::MissingStartNode`] when `id` is not registered.
    pub fn with_start(mut self, id: &str) -> Result<Self, FlowError> {
        let start = self.nodes.get(id).cloned().ok_or_else(|| FlowError::MissingStartNode { id: id.to_string() })?;
        self.start = start;
        Ok(self)
    }

    /// Force the mode used by [`Flow::run`]
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bound on node executions per run
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Forced mode, or `NonBlocking` when any registered node needs it
    pub fn mode(&self) -> ExecutionMode {
        self.mode.unwrap_or_else(|| {
            if self.nodes.values().any(|node| node.mode() == ExecutionMode::NonBlocking) {
                ExecutionMode::NonBlocking
            } else {
                ExecutionMode::Blocking
            }
        })
    }

    pub fn start_id(&self) -> &str {
        self.start.id()
    }

    /// Registered ids in sorted order
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Accumulated statistics for node `id`
    pub fn node_stats(&self, id: &str) -> Option<NodeStats> {
        self.stats.lock().get(id).copied()
    }

    /// Accumulated statistics for every executed node
    pub fn stats(&self) -> BTreeMap<String, NodeStats> {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        self.stats.lock().clear();
    }

    /// Run the flow on the calling thread
    ///
    /// A flow in `NonBlocking` mode is driven on a private current-thread
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::BlockingInsideRuntime`] when a `NonBlocking` flow
    /// is run from inside a tokio runtime, or [`FlowError::Runtime`] when
    /// the private runtime cannot be built. Node failures are never
    /// returned here; they are recorded in the shared context.
    pub fn run(&self, shared: SharedContext) -> Result<SharedContext, FlowError> {
        self.run_with_report(shared).map(|outcome| outcome.shared)
    }

    /// [`Flow::run`], also returning the visited path and termination
    ///
    /// # Errors
    ///
    /// Same as [`Flow::run`].
    #[instrument(level = "debug", skip_all, fields(start = %self.start.id(), mode = %self.mode()))]
    pub fn run_with_report(&self, shared: SharedContext) -> Result<FlowOutcome, FlowError> {
        match self.mode() {
            ExecutionMode::Blocking => Ok(self.walk_blocking(shared)),
            ExecutionMode::NonBlocking => {
                if tokio::runtime::Handle::try_current().is_ok() {
                    return Err(FlowError::BlockingInsideRuntime);
                }
                let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
                Ok(runtime.block_on(self.walk_async(shared)))
            }
        }
    }

    /// Run the flow awaiting every node's non-blocking phases
    pub async fn run_async(&self, shared: SharedContext) -> SharedContext {
        self.run_async_with_report(shared).await.shared
    }

    /// [`Flow::run_async`], also returning the visited path and termination
    #[instrument(level = "debug", skip_all, fields(start = %self.start.id()))]
    pub async fn run_async_with_report(&self, shared: SharedContext) -> FlowOutcome {
        self.walk_async(shared).await
    }

    fn walk_blocking(&self, mut shared: SharedContext) -> FlowOutcome {
        let mut walk = Walk::begin(self, ExecutionMode::Blocking);
        let mut current = Some(self.start.clone());
        while let Some(node) = current.take().and_then(|node| walk.enter(node, &mut shared)) {
            let started = Instant::now();
            let result = node.step().run(&mut shared);
            current = walk.settle(&node, result, started.elapsed(), &mut shared);
        }
        walk.finish(shared)
    }

    async fn walk_async(&self, mut shared: SharedContext) -> FlowOutcome {
        let mut walk = Walk::begin(self, ExecutionMode::NonBlocking);
        let mut current = Some(self.start.clone());
        while let Some(node) = current.take().and_then(|node| walk.enter(node, &mut shared)) {
            let started = Instant::now();
            let result = node.step().run_async(&mut shared).await;
            current = walk.settle(&node, result, started.elapsed(), &mut shared);
        }
        walk.finish(shared)
    }

    fn register(&mut self, root: &NodeHandle) -> Result<(), FlowError> {
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(node) = queue.pop_front() {
            if let Some(existing) = self.nodes.get(node.id()) {
                if existing.same_node(&node) {
                    continue;
                }
                return Err(FlowError::DuplicateNode { id: node.id().to_string() });
            }
            queue.extend(node.successors());
            self.nodes.insert(node.id().to_string(), node);
        }
        Ok(())
    }

    /// Successor chosen by `next`; `Err` carries the unresolvable target
    fn resolve(&self, node: &NodeHandle, next: &Next) -> Result<Option<NodeHandle>, String> {
        let target = match next {
            Next::Stop => return Ok(None),
            Next::Goto(id) => EdgeTarget::Node(id.clone()),
            Next::Default => match node.default_target() {
                EdgeTarget::Missing => return Ok(None),
                EdgeTarget::Dangling => return Err("<dropped default successor>".to_string()),
                target @ EdgeTarget::Node(_) => target,
            },
            Next::Branch(label) => match node.branch_target(label) {
                EdgeTarget::Missing => return Err(format!("<no edge labelled '{label}'>")),
                EdgeTarget::Dangling => return Err(format!("<dropped target of '{label}'>")),
                target @ EdgeTarget::Node(_) => target,
            },
        };
        match target {
            EdgeTarget::Node(id) => self.nodes.get(&id).cloned().map(Some).ok_or(id),
            EdgeTarget::Dangling | EdgeTarget::Missing => Ok(None),
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("start", &self.start.id())
            .field("nodes", &self.node_ids())
            .field("mode", &self.mode())
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

/// State of one run
struct Walk<'f> {
    flow: &'f Flow,
    mode: ExecutionMode,
    path: Vec<String>,
    termination: Termination,
    started: Instant,
}

impl<'f> Walk<'f> {
    fn begin(flow: &'f Flow, mode: ExecutionMode) -> Self {
        info!(start = %flow.start.id(), mode = %mode, "flow started");
        Self { flow, mode, path: Vec::new(), termination: Termination::Completed, started: Instant::now() }
    }

    /// Admit `node` as the next step unless the step budget is spent
    fn enter(&mut self, node: NodeHandle, shared: &mut SharedContext) -> Option<NodeHandle> {
        if self.path.len() >= self.flow.max_steps {
            let limit = self.flow.max_steps;
            warn!(node_id = %node.id(), limit, "flow step limit reached");
            record_error(
                shared,
                node.id(),
                "StepLimitExceeded",
                &format!("flow exceeded {limit} node executions"),
                None,
            );
            self.termination = Termination::StepLimit { limit };
            return None;
        }
        debug!(node_id = %node.id(), step = self.path.len(), "running node");
        self.path.push(node.id().to_string());
        Some(node)
    }

    /// Account for one node execution and pick the next node
    fn settle(
        &mut self,
        node: &NodeHandle,
        result: Result<Next, PhaseError>,
        elapsed: Duration,
        shared: &mut SharedContext,
    ) -> Option<NodeHandle> {
        self.observe(node.id(), elapsed, result.is_ok());

        let next = match result {
            Ok(next) => next,
            Err(PhaseError { phase, error }) => {
                error!(
                    node_id = %node.id(),
                    phase = %phase,
                    error_type = %error.error_type(),
                    error = %error.message(),
                    "node failed, halting flow"
                );
                record_error(shared, node.id(), error.error_type(), error.message(), Some(phase));
                self.termination = Termination::Failed {
                    node_id: node.id().to_string(),
                    phase,
                    error_type: error.error_type().to_string(),
                    message: error.message().to_string(),
                };
                return None;
            }
        };

        match self.flow.resolve(node, &next) {
            Ok(successor) => successor,
            Err(target) => {
                error!(node_id = %node.id(), target = %target, "next node is not registered, halting flow");
                record_error(
                    shared,
                    node.id(),
                    "UnknownNode",
                    &format!("node '{}' selected '{target}', which is not registered", node.id()),
                    None,
                );
                self.termination = Termination::UnknownNode { node_id: node.id().to_string(), target };
                None
            }
        }
    }

    fn observe(&self, node_id: &str, elapsed: Duration, success: bool) {
        {
            let mut stats = self.flow.stats.lock();
            let entry = stats.entry(node_id.to_string()).or_default();
            entry.executions += 1;
            entry.total_duration += elapsed;
            entry.last_duration = elapsed;
            if !success {
                entry.failures += 1;
            }
        }

        let status = if success { "success" } else { "error" };
        let metrics = &self.flow.metrics;
        metrics.increment(
            metric_names::NODE_EXECUTIONS,
            1,
            &[("node_id", node_id), ("status", status), ("mode", self.mode.as_str())],
        );
        metrics.timing(metric_names::NODE_DURATION, elapsed, &[("node_id", node_id)]);
    }

    fn finish(self, shared: SharedContext) -> FlowOutcome {
        let elapsed = self.started.elapsed();
        let status = self.termination.status();
        self.flow
            .metrics
            .increment(metric_names::FLOW_RUNS, 1, &[("start", self.flow.start.id()), ("status", status)]);
        info!(
            path = %self.path.join(" -> "),
            status,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "flow finished"
        );
        FlowOutcome {
            shared,
            report: FlowReport { path: self.path, termination: self.termination, mode: self.mode, elapsed },
        }
    }
}

fn record_error(shared: &mut SharedContext, node_id: &str, error_type: &str, message: &str, phase: Option<Phase>) {
    shared.insert(
        ERROR_KEY,
        json!({
            "node_id": node_id,
            "message": message,
            "error_type": error_type,
            "phase": phase.map(Phase::as_str),
        }),
    );
    shared.insert(ERROR_TYPE_KEY, error_type);
    shared.insert(ERROR_NODE_KEY, node_id);
}

#[cfg(test)]
mod tests {
    //! Unit tests for walking, branching and failure recording.

    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;
    use trialflow_common::observability::InMemoryMetrics;

    use super::*;
    use crate::error::NodeError;
    use crate::flow::Node;

    /// Counts its passes under `{id}_passes` and follows the default edge
    struct Pass {
        id: &'static str,
    }

    impl Node for Pass {
        type Prep = ();
        type Exec = ();

        fn id(&self) -> String {
            self.id.to_string()
        }

        fn prep(&self, _shared: &SharedContext) -> Result<(), NodeError> {
            Ok(())
        }

        fn exec(&self, _prep: &()) -> Result<(), NodeError> {
            Ok(())
        }

        fn post(&self, shared: &mut SharedContext, _prep: (), _exec: ()) -> Result<Next, NodeError> {
            shared.increment(&format!("{}_passes", self.id), 1);
            Ok(Next::Default)
        }
    }

    /// Fails twice with a sentinel, then succeeds
    struct Flaky;

    impl Node for Flaky {
        type Prep = i64;
        type Exec = &'static str;

        fn id(&self) -> String {
            "b".to_string()
        }

        fn prep(&self, shared: &SharedContext) -> Result<i64, NodeError> {
            Ok(shared.get("b_passes").and_then(Value::as_i64).unwrap_or(0))
        }

        fn exec(&self, passes: &i64) -> Result<&'static str, NodeError> {
            Ok(if *passes < 2 { "fail" } else { "ok" })
        }

        fn post(&self, shared: &mut SharedContext, _prep: i64, exec: &'static str) -> Result<Next, NodeError> {
            shared.increment("b_passes", 1);
            if exec == "fail" {
                Ok(Next::branch("retry"))
            } else {
                Ok(Next::Default)
            }
        }
    }

    /// Requires `input` and fails in prep without it
    struct NeedsInput;

    impl Node for NeedsInput {
        type Prep = String;
        type Exec = ();

        fn id(&self) -> String {
            "b".to_string()
        }

        fn prep(&self, shared: &SharedContext) -> Result<String, NodeError> {
            shared.get_as("input")?.ok_or_else(|| NodeError::new("ValueError", "missing input"))
        }

        fn exec(&self, _prep: &String) -> Result<(), NodeError> {
            Ok(())
        }
    }

    /// Returns a fixed successor
    struct Jump {
        next: Next,
    }

    impl Node for Jump {
        type Prep = ();
        type Exec = ();

        fn prep(&self, _shared: &SharedContext) -> Result<(), NodeError> {
            Ok(())
        }

        fn exec(&self, _prep: &()) -> Result<(), NodeError> {
            Ok(())
        }

        fn post(&self, _shared: &mut SharedContext, _prep: (), _exec: ()) -> Result<Next, NodeError> {
            Ok(self.next.clone())
        }
    }

    /// Non-blocking node awaiting a timer
    struct Sleeper;

    #[async_trait]
    impl Node for Sleeper {
        type Prep = ();
        type Exec = u64;

        fn mode(&self) -> ExecutionMode {
            ExecutionMode::NonBlocking
        }

        fn prep(&self, _shared: &SharedContext) -> Result<(), NodeError> {
            Ok(())
        }

        async fn exec_async(&self, _prep: &()) -> Result<u64, NodeError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(5)
        }

        fn post(&self, shared: &mut SharedContext, _prep: (), slept: u64) -> Result<Next, NodeError> {
            shared.insert("slept_ms", slept);
            Ok(Next::Default)
        }
    }

    fn pass(id: &'static str) -> NodeHandle {
        NodeHandle::new(Pass { id })
    }

    /// Validates a conditional self loop in a three-node chain.
    ///
    /// Assertions:
    /// - Ensures A runs once, B three times and C once.
    /// - Confirms the path records every pass in order.
    #[test]
    fn test_retry_branch_loops_back() {
        let a = pass("a");
        let b = NodeHandle::new(Flaky);
        let c = pass("c");
        a.then(&b).then(&c);
        b.branch("retry").to(&b);

        let flow = Flow::new(&a).expect("valid graph");
        let outcome = flow.run_with_report(SharedContext::new()).expect("blocking flow runs");

        assert_eq!(outcome.shared.get("a_passes"), Some(&json!(1)));
        assert_eq!(outcome.shared.get("b_passes"), Some(&json!(3)));
        assert_eq!(outcome.shared.get("c_passes"), Some(&json!(1)));
        assert_eq!(outcome.report.path, vec!["a", "b", "b", "b", "c"]);
        assert!(outcome.report.termination.is_completed());
        assert!(!outcome.shared.has_error());
        assert_eq!(flow.node_stats("b").map(|s| s.executions), Some(3));
    }

    #[test]
    fn test_chain_through_inline_handles_runs_every_node() {
        let a = pass("a");
        let b = pass("b");
        a.then(&b).then(&pass("c")).then(&pass("d"));

        let flow = Flow::new(&a).expect("valid graph");
        let outcome = flow.run_with_report(SharedContext::new()).expect("blocking flow runs");

        assert_eq!(flow.node_ids(), vec!["a", "b", "c", "d"]);
        assert_eq!(outcome.report.path, vec!["a", "b", "c", "d"]);
        assert_eq!(outcome.shared.get("c_passes"), Some(&json!(1)));
        assert_eq!(outcome.shared.get("d_passes"), Some(&json!(1)));
        assert!(!outcome.shared.has_error());
    }

    /// Validates a prep failure halts the walk and is recorded.
    ///
    /// Assertions:
    /// - Ensures `error_type` and `error_node` name the failing node.
    /// - Confirms the third node never runs.
    #[test]
    fn test_prep_failure_recorded_in_context() {
        let a = pass("a");
        let b = NodeHandle::new(NeedsInput);
        let c = pass("c");
        a.then(&b).then(&c);

        let flow = Flow::new(&a).expect("valid graph");
        let shared = flow.run(SharedContext::new()).expect("failures are not flow errors");

        assert_eq!(shared.error_type(), Some("ValueError"));
        assert_eq!(shared.error_node(), Some("b"));
        assert_eq!(
            shared.get(ERROR_KEY),
            Some(&json!({"node_id": "b", "message": "missing input", "error_type": "ValueError", "phase": "prep"}))
        );
        assert!(!shared.contains("c_passes"));
        assert_eq!(flow.node_stats("b").map(|s| s.failures), Some(1));
    }

    #[test]
    fn test_unknown_branch_is_recorded() {
        let a = NodeHandle::with_id(Jump { next: Next::branch("missing") }, "a");
        let flow = Flow::new(&a).expect("valid graph");

        let outcome = flow.run_with_report(SharedContext::new()).expect("runs");

        assert_eq!(outcome.shared.error_type(), Some("UnknownNode"));
        assert!(matches!(
            outcome.report.termination,
            Termination::UnknownNode { ref node_id, .. } if node_id == "a"
        ));
    }

    #[test]
    fn test_goto_by_id_and_unregistered_goto() {
        let a = NodeHandle::with_id(Jump { next: Next::goto("c") }, "a");
        let c = pass("c");
        let flow = Flow::new(&a).expect("valid").add_node(&c).expect("valid");

        let shared = flow.run(SharedContext::new()).expect("runs");
        assert_eq!(shared.get("c_passes"), Some(&json!(1)));

        let lonely = Flow::new(&a).expect("valid");
        let outcome = lonely.run_with_report(SharedContext::new()).expect("runs");
        assert_eq!(outcome.report.termination, Termination::UnknownNode { node_id: "a".into(), target: "c".into() });
    }

    #[test]
    fn test_step_limit_is_recorded() {
        let a = NodeHandle::with_id(Jump { next: Next::branch("again") }, "a");
        a.branch("again").to(&a);
        let flow = Flow::new(&a).expect("valid").with_max_steps(4);

        let outcome = flow.run_with_report(SharedContext::new()).expect("runs");

        assert_eq!(outcome.report.path.len(), 4);
        assert_eq!(outcome.report.termination, Termination::StepLimit { limit: 4 });
        assert_eq!(outcome.shared.error_type(), Some("StepLimitExceeded"));
    }

    #[test]
    fn test_construction_errors() {
        let a = pass("a");
        let other_a = pass("a");
        a.then(&other_a);

        assert!(matches!(Flow::new(&a), Err(FlowError::DuplicateNode { ref id }) if id == "a"));
        assert!(matches!(
            Flow::from_nodes([&pass("x")], "y"),
            Err(FlowError::MissingStartNode { ref id }) if id == "y"
        ));
        assert!(matches!(Flow::from_nodes(std::iter::empty(), "y"), Err(FlowError::MissingStartNode { .. })));
    }

    /// Validates mixed flows run non-blocking from a blocking caller.
    ///
    /// Assertions:
    /// - Ensures the derived mode is `NonBlocking`.
    /// - Confirms `run` drives the non-blocking node to completion.
    #[test]
    fn test_mixed_flow_runs_from_blocking_caller() {
        let a = pass("a");
        let sleeper = NodeHandle::new(Sleeper);
        a.then(&sleeper);
        let flow = Flow::new(&a).expect("valid");

        assert_eq!(flow.mode(), ExecutionMode::NonBlocking);
        let outcome = flow.run_with_report(SharedContext::new()).expect("runs on a private runtime");
        assert_eq!(outcome.shared.get("slept_ms"), Some(&json!(5)));
        assert_eq!(outcome.report.mode, ExecutionMode::NonBlocking);
    }

    #[tokio::test]
    async fn test_blocking_run_inside_runtime_is_rejected() {
        let flow = Flow::new(&NodeHandle::new(Sleeper)).expect("valid");
        assert!(matches!(flow.run(SharedContext::new()), Err(FlowError::BlockingInsideRuntime)));

        let shared = flow.run_async(SharedContext::new()).await;
        assert_eq!(shared.get("slept_ms"), Some(&json!(5)));
    }

    #[test]
    fn test_forced_blocking_mode_reports_unsupported_phase() {
        let flow = Flow::new(&NodeHandle::new(Sleeper)).expect("valid").with_mode(ExecutionMode::Blocking);
        let shared = flow.run(SharedContext::new()).expect("runs");
        assert_eq!(shared.error_type(), Some("UnsupportedMode"));
    }

    /// Validates node metrics and stats accumulate across runs.
    ///
    /// Assertions:
    /// - Ensures success executions are counted per node and mode.
    /// - Confirms flow runs are counted by status.
    #[test]
    fn test_metrics_and_stats_across_runs() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let a = pass("a");
        let b = pass("b");
        a.then(&b);
        let flow = Flow::new(&a).expect("valid").with_metrics(metrics.clone());

        for _ in 0..2 {
            let shared = flow.run(SharedContext::new()).expect("runs");
            assert_eq!(shared.get("b_passes"), Some(&json!(1)));
        }

        let tags = [("node_id", "b"), ("status", "success"), ("mode", "blocking")];
        assert_eq!(metrics.counter(metric_names::NODE_EXECUTIONS, &tags), 2);
        assert_eq!(metrics.observations(metric_names::NODE_DURATION, &[("node_id", "a")]).len(), 2);
        assert_eq!(metrics.counter(metric_names::FLOW_RUNS, &[("start", "a"), ("status", "completed")]), 2);

        let stats = flow.stats();
        assert_eq!(stats["a"].executions, 2);
        assert!(stats["a"].average_duration() <= stats["a"].total_duration);
        flow.reset_stats();
        assert!(flow.stats().is_empty());
    }
}

//! Node handles and the edges between them
//!
//! A [`NodeHandle`] owns its node and its outgoing edges. An edge owns its
//! target, so a successor built inline stays alive through the edge. An
//! edge that would close a cycle (a node branching back to itself or to an
//! ancestor) is kept as a weak back link instead, so owned edges never form
//! a loop and a dropped graph is freed. The [`Flow`](super::Flow) built
//! from a start handle holds every reachable node, back link targets
//! included.
//!
//! ```rust,ignore
//! let parse = NodeHandle::new(ParseQuery);
//! let search = NodeHandle::new(Search::new(client));
//! let summarize = NodeHandle::new(Summarize);
//! let empty = NodeHandle::new(NoResults);
//!
//! parse.then(&search).then(&summarize);
//! search.branch("empty").to(&empty);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::node::{Erased, ExecutionMode, Node, Step};

pub(crate) struct NodeEntry {
    id: String,
    step: Box<dyn Step>,
    edges: RwLock<Edges>,
}

#[derive(Default)]
struct Edges {
    default: Option<Link>,
    labelled: BTreeMap<String, Link>,
}

enum Link {
    /// Forward edge keeping its target alive
    Owned(Arc<NodeEntry>),
    /// Edge closing a cycle
    Back(Weak<NodeEntry>),
}

impl Link {
    /// Own `target` unless it already reaches `from` through owned edges
    fn between(from: &Arc<NodeEntry>, target: &Arc<NodeEntry>) -> Self {
        if reaches(target, from) {
            Self::Back(Arc::downgrade(target))
        } else {
            Self::Owned(Arc::clone(target))
        }
    }

    fn upgrade(&self) -> Option<Arc<NodeEntry>> {
        match self {
            Self::Owned(entry) => Some(Arc::clone(entry)),
            Self::Back(weak) => weak.upgrade(),
        }
    }

    fn owned(&self) -> Option<&Arc<NodeEntry>> {
        match self {
            Self::Owned(entry) => Some(entry),
            Self::Back(_) => None,
        }
    }
}

/// Whether `goal` is `from` or reachable from it through owned edges
fn reaches(from: &Arc<NodeEntry>, goal: &Arc<NodeEntry>) -> bool {
    let mut stack = vec![Arc::clone(from)];
    let mut seen: Vec<*const NodeEntry> = Vec::new();
    while let Some(entry) = stack.pop() {
        if Arc::ptr_eq(&entry, goal) {
            return true;
        }
        if seen.contains(&Arc::as_ptr(&entry)) {
            continue;
        }
        seen.push(Arc::as_ptr(&entry));
        let edges = entry.edges.read();
        stack.extend(edges.default.iter().chain(edges.labelled.values()).filter_map(Link::owned).cloned());
    }
    false
}

/// Where an edge leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EdgeTarget {
    /// Live node with this id
    Node(String),
    /// The edge exists but its target has been dropped
    Dangling,
    /// No such edge
    Missing,
}

/// Shared handle to a node in a graph
///
/// Cloning a handle is cheap and refers to the same node and edges.
#[derive(Clone)]
pub struct NodeHandle {
    entry: Arc<NodeEntry>,
}

impl NodeHandle {
    /// Wrap a node, using [`Node::id`] as its id
    pub fn new<N: Node>(node: N) -> Self {
        let id = node.id();
        Self::with_id(node, id)
    }

    /// Wrap a node under an explicit id
    ///
    /// Needed when one node type appears more than once in a flow.
    pub fn with_id<N: Node>(node: N, id: impl Into<String>) -> Self {
        Self {
            entry: Arc::new(NodeEntry {
                id: id.into(),
                step: Box::new(Erased(node)),
                edges: RwLock::new(Edges::default()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    /// Mode the wrapped node requires
    pub fn mode(&self) -> ExecutionMode {
        self.entry.step.mode()
    }

    /// Make `next` this node's default successor and return `next`
    ///
    /// Calls chain left to right: `a.then(&b).then(&c)`. The edge keeps
    /// `next` alive, so `a.then(&NodeHandle::new(Last))` is enough.
    pub fn then<'a>(&self, next: &'a NodeHandle) -> &'a NodeHandle {
        let link = Link::between(&self.entry, &next.entry);
        self.entry.edges.write().default = Some(link);
        next
    }

    /// Start a labelled edge; complete it with [`Branch::to`]
    pub fn branch(&self, label: impl Into<String>) -> Branch<'_> {
        Branch { from: self, label: label.into() }
    }

    /// Labels of this node's conditional edges
    pub fn branch_labels(&self) -> Vec<String> {
        self.entry.edges.read().labelled.keys().cloned().collect()
    }

    /// Id of the default successor, if it is still alive
    pub fn default_successor(&self) -> Option<String> {
        match self.default_target() {
            EdgeTarget::Node(id) => Some(id),
            EdgeTarget::Dangling | EdgeTarget::Missing => None,
        }
    }

    pub(crate) fn step(&self) -> &dyn Step {
        self.entry.step.as_ref()
    }

    pub(crate) fn default_target(&self) -> EdgeTarget {
        Self::target(self.entry.edges.read().default.as_ref())
    }

    pub(crate) fn branch_target(&self, label: &str) -> EdgeTarget {
        Self::target(self.entry.edges.read().labelled.get(label))
    }

    /// Live handles of every outgoing edge
    pub(crate) fn successors(&self) -> Vec<NodeHandle> {
        let edges = self.entry.edges.read();
        edges
            .default
            .iter()
            .chain(edges.labelled.values())
            .filter_map(Link::upgrade)
            .map(|entry| NodeHandle { entry })
            .collect()
    }

    pub(crate) fn same_node(&self, other: &NodeHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    fn target(edge: Option<&Link>) -> EdgeTarget {
        match edge {
            None => EdgeTarget::Missing,
            Some(link) => link.upgrade().map_or(EdgeTarget::Dangling, |entry| EdgeTarget::Node(entry.id.clone())),
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.entry.id)
            .field("mode", &self.mode())
            .field("branches", &self.branch_labels())
            .finish_non_exhaustive()
    }
}

/// A labelled edge waiting for its target
#[must_use = "a branch does nothing until linked with `to`"]
pub struct Branch<'a> {
    from: &'a NodeHandle,
    label: String,
}

impl Branch<'_> {
    /// Link the labelled edge to `target` and return `target`
    pub fn to<'t>(self, target: &'t NodeHandle) -> &'t NodeHandle {
        let link = Link::between(&self.from.entry, &target.entry);
        self.from.entry.edges.write().labelled.insert(self.label, link);
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::flow::SharedContext;

    struct Noop;

    impl Node for Noop {
        type Prep = ();
        type Exec = ();

        fn prep(&self, _shared: &SharedContext) -> Result<(), NodeError> {
            Ok(())
        }

        fn exec(&self, _prep: &()) -> Result<(), NodeError> {
            Ok(())
        }
    }

    #[test]
    fn test_then_chains_left_to_right() {
        let a = NodeHandle::with_id(Noop, "a");
        let b = NodeHandle::with_id(Noop, "b");
        let c = NodeHandle::with_id(Noop, "c");

        let last = a.then(&b).then(&c);

        assert_eq!(last.id(), "c");
        assert_eq!(a.default_successor().as_deref(), Some("b"));
        assert_eq!(b.default_successor().as_deref(), Some("c"));
        assert_eq!(c.default_successor(), None);
    }

    /// Validates labelled edges and self loops.
    ///
    /// Assertions:
    /// - Ensures `branch(..).to(..)` returns the target.
    /// - Confirms a self loop resolves to the node itself.
    /// - Ensures an unknown label is reported as missing.
    #[test]
    fn test_branch_edges() {
        let a = NodeHandle::with_id(Noop, "a");
        let retry = a.branch("retry").to(&a);
        assert!(retry.same_node(&a));

        assert_eq!(a.branch_target("retry"), EdgeTarget::Node("a".into()));
        assert_eq!(a.branch_target("other"), EdgeTarget::Missing);
        assert_eq!(a.branch_labels(), vec!["retry".to_string()]);
        assert_eq!(a.successors().len(), 1);
    }

    #[test]
    fn test_edge_keeps_inline_successor_alive() {
        let a = NodeHandle::with_id(Noop, "a");
        a.then(&NodeHandle::with_id(Noop, "b")).then(&NodeHandle::with_id(Noop, "c"));

        assert_eq!(a.default_target(), EdgeTarget::Node("b".into()));
        let b = a.successors().pop().expect("b is owned by the edge");
        assert_eq!(b.default_successor().as_deref(), Some("c"));
    }

    /// Validates that cycles are closed with back links.
    ///
    /// Assertions:
    /// - Ensures a self loop does not keep its node alive.
    /// - Confirms a two-node cycle is freed once both handles drop.
    /// - Ensures a back link to a dropped node reads as dangling.
    #[test]
    fn test_cycles_do_not_leak() {
        let a = NodeHandle::with_id(Noop, "a");
        a.branch("retry").to(&a);
        let a_entry = Arc::downgrade(&a.entry);
        drop(a);
        assert!(a_entry.upgrade().is_none());

        let a = NodeHandle::with_id(Noop, "a");
        let b = NodeHandle::with_id(Noop, "b");
        a.then(&b).then(&a);
        let (a_entry, b_entry) = (Arc::downgrade(&a.entry), Arc::downgrade(&b.entry));
        drop(a);
        assert_eq!(b.default_target(), EdgeTarget::Dangling);
        assert!(b.successors().is_empty());
        drop(b);
        assert!(a_entry.upgrade().is_none());
        assert!(b_entry.upgrade().is_none());
    }

    #[test]
    fn test_default_id_is_type_name() {
        assert_eq!(NodeHandle::new(Noop).id(), "Noop");
    }
}

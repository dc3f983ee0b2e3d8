//! Internal graph bookkeeping shared by registration, inference, and
//! lowering.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::annotation::Annotation;
use crate::value::{Kernel, Value};

/// Identifies one registered operation within its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Argument to a registered call: either a concrete value or the result of a
/// previously registered operation.
#[derive(Clone)]
pub enum ArgValue {
    Data(Value),
    Node(NodeId),
}

impl ArgValue {
    /// Identity comparison: pointer identity for data, node id for nodes.
    pub(crate) fn same(&self, other: &ArgValue) -> bool {
        match (self, other) {
            (ArgValue::Data(left), ArgValue::Data(right)) => crate::value::same_value(left, right),
            (ArgValue::Node(left), ArgValue::Node(right)) => left == right,
            _ => false,
        }
    }

    pub(crate) fn as_node(&self) -> Option<NodeId> {
        match self {
            ArgValue::Node(id) => Some(*id),
            ArgValue::Data(_) => None,
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        ArgValue::Data(value)
    }
}

/// Current materialization state of a node's output.
///
/// Nodes start unevaluated and transition exactly once when the driver
/// commits a pipeline's results. Void operations evaluate to `None`.
pub(crate) enum NodeState {
    Unevaluated,
    Evaluated(Option<Value>),
}

/// One deferred call recorded in the graph.
pub(crate) struct OpNode {
    pub(crate) name: &'static str,
    pub(crate) kernel: Kernel,
    pub(crate) args: Vec<ArgValue>,
    pub(crate) kwargs: Vec<(String, ArgValue)>,
    /// Private clone of the function's annotation; rewritten by inference.
    pub(crate) annotation: Annotation,
    pub(crate) state: NodeState,
    /// Pipeline this operation executes in, assigned during inference.
    pub(crate) pipeline: usize,
    /// Whether no later node depends on this one.
    pub(crate) root: bool,
    /// Cleared to suppress cross-worker merging of a result only consumed
    /// inside its own pipeline.
    pub(crate) send_result: bool,
    /// Nodes that must be evaluated before this one.
    pub(crate) children: Vec<NodeId>,
}

impl OpNode {
    pub(crate) fn all_args(&self) -> impl Iterator<Item = &ArgValue> {
        self.args
            .iter()
            .chain(self.kwargs.iter().map(|(_, arg)| arg))
    }

    /// Arguments this operation mutates in place.
    pub(crate) fn mutable_args(&self) -> Vec<&ArgValue> {
        let mut mutables = Vec::new();
        for (index, arg) in self.args.iter().enumerate() {
            if self.annotation.is_mutable_arg(index) {
                mutables.push(arg);
            }
        }
        for (name, arg) in &self.kwargs {
            if self.annotation.is_mutable_kwarg(name) {
                mutables.push(arg);
            }
        }
        mutables
    }
}

/// Mutable graph storage protected by the mutex inside
/// [`TaskGraph`](super::TaskGraph).
pub(crate) struct GraphInner {
    pub(crate) nodes: Vec<OpNode>,
    pub(crate) roots: Vec<NodeId>,
}

impl GraphInner {
    pub(crate) fn new() -> Self {
        GraphInner {
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &OpNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut OpNode {
        &mut self.nodes[id.index()]
    }

    /// Whether `dep` must evaluate before `of`: either `of` consumes `dep`'s
    /// result directly, or `dep` mutates a value that `of` also receives.
    pub(crate) fn is_dependency(&self, dep: NodeId, of: NodeId) -> bool {
        let of_node = self.node(of);
        if of_node
            .all_args()
            .any(|arg| matches!(arg, ArgValue::Node(id) if *id == dep))
        {
            return true;
        }
        let dep_node = self.node(dep);
        for mutated in dep_node.mutable_args() {
            if of_node.all_args().any(|arg| mutated.same(arg)) {
                return true;
            }
        }
        false
    }

    /// Nodes in breadth-first order from the roots.
    pub(crate) fn topdown_order(&self) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<NodeId> = self.roots.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            order.push(current);
            queue.extend(self.node(current).children.iter().copied());
        }
        order
    }

    /// Nodes in dependency order: children before parents, each visited once.
    pub(crate) fn bottomup_order(&self) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in self.roots.clone() {
            self.visit_bottomup(root, &mut visited, &mut order);
        }
        order
    }

    fn visit_bottomup(&self, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        for child in self.node(id).children.clone() {
            self.visit_bottomup(child, visited, order);
        }
        order.push(id);
    }

    /// Disjoint mutable borrows of two distinct nodes.
    pub(crate) fn two_nodes_mut(&mut self, a: NodeId, b: NodeId) -> (&mut OpNode, &mut OpNode) {
        let (a, b) = (a.index(), b.index());
        debug_assert_ne!(a, b, "cannot borrow one node twice");
        if a < b {
            let (head, tail) = self.nodes.split_at_mut(b);
            (&mut head[a], &mut tail[0])
        } else {
            let (head, tail) = self.nodes.split_at_mut(a);
            (&mut tail[0], &mut head[b])
        }
    }
}

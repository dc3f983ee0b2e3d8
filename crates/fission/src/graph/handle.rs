//! Lazy handles that delay evaluation until a result is read.

use std::any::Any;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::arena::TaskGraph;
use super::state::{ArgValue, NodeId};
use crate::value::Value;

/// Handle to a deferred operation.
///
/// Reading the handle's value triggers evaluation of the whole owning graph
/// if it has not run yet; afterwards the value is served from the node's
/// recorded output.
#[derive(Clone)]
pub struct LazyHandle {
    graph: Arc<TaskGraph>,
    node: NodeId,
}

impl LazyHandle {
    pub(crate) fn new(graph: Arc<TaskGraph>, node: NodeId) -> Self {
        LazyHandle { graph, node }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn graph(&self) -> &Arc<TaskGraph> {
        &self.graph
    }

    /// The operation's value, evaluating the owning graph on first access.
    pub fn value(&self) -> Result<Value> {
        self.output()?
            .ok_or_else(|| anyhow!("operation {} produced no value", self.node))
    }

    /// Like [`LazyHandle::value`], but void operations yield `None`.
    pub fn output(&self) -> Result<Option<Value>> {
        self.graph.materialize(self.node)
    }

    /// The operation's value downcast to a concrete type.
    pub fn value_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.value()?
            .downcast::<T>()
            .map_err(|_| anyhow!("operation {} produced an unexpected type", self.node))
    }

    /// Suppresses merging and shipment of this operation's result: the value
    /// is consumed only inside its own pipeline and the node evaluates to
    /// `None`.
    pub fn suppress_send(&self) {
        self.graph.set_send_result(self.node, false);
    }
}

impl From<&LazyHandle> for ArgValue {
    fn from(handle: &LazyHandle) -> Self {
        ArgValue::Node(handle.node_id())
    }
}

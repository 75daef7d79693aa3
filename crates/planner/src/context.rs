//! Planning-phase-only bookkeeping.

use std::collections::HashMap;

use crate::node::{NodeId, PlanNode};

/// Side table tracking, during planning only, which producing subtree feeds
/// each receive node.
///
/// Kept off the nodes on purpose: the back-reference is transient, and a
/// field would drag the whole producing subtree into every serialized copy
/// of the receive node. The context is dropped when planning completes;
/// nothing at execution time may depend on it.
#[derive(Debug, Default)]
pub struct PlanningContext {
    producers: HashMap<NodeId, PlanNode>,
}

impl PlanningContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `producer` with a receive node. Returns the previously
    /// bound subtree if the planner rebinds.
    pub fn bind_producer(&mut self, receive_node: NodeId, producer: PlanNode) -> Option<PlanNode> {
        self.producers.insert(receive_node, producer)
    }

    pub fn producer(&self, receive_node: NodeId) -> Option<&PlanNode> {
        self.producers.get(&receive_node)
    }

    /// Detach the producing subtree, e.g. when fragmenting the plan into
    /// per-stage trees.
    pub fn take_producer(&mut self, receive_node: NodeId) -> Option<PlanNode> {
        self.producers.remove(&receive_node)
    }
}

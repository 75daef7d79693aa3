use arrow_schema::Schema;
use nexq_common::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::exchange::ExchangeSpec;

/// Stable identifier of a plan node within one query plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(
    /// Raw numeric id value.
    pub u32,
);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of exchange-boundary plan nodes.
///
/// The operator nodes between boundaries belong to the surrounding planner;
/// this crate models only the nodes the exchange layer executes. The
/// exchange-specific fields live on the boundary variants and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanNode {
    /// Sending half of a stage boundary.
    Send(SendNode),
    /// Receiving half of a stage boundary.
    Receive(ReceiveNode),
}

impl PlanNode {
    pub fn id(&self) -> NodeId {
        match self {
            PlanNode::Send(n) => n.id,
            PlanNode::Receive(n) => n.id,
        }
    }

    /// One-line operator description for plan rendering.
    pub fn explain(&self) -> String {
        match self {
            PlanNode::Send(n) => format!("MailboxSend({:?})", n.spec.exchange_type()),
            PlanNode::Receive(n) => format!("MailboxReceive({:?})", n.spec.exchange_type()),
        }
    }

    /// Visitor-style dispatch over the closed node set.
    pub fn visit<V: PlanNodeVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            PlanNode::Send(n) => visitor.visit_send(n),
            PlanNode::Receive(n) => visitor.visit_receive(n),
        }
    }
}

/// Double dispatch over [`PlanNode`] variants.
pub trait PlanNodeVisitor {
    type Output;

    fn visit_send(&mut self, node: &SendNode) -> Self::Output;
    fn visit_receive(&mut self, node: &ReceiveNode) -> Self::Output;
}

/// Sending half of a stage boundary: the last operator of the upstream
/// stage, pushing batches toward `receiver_stage_id` under `spec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNode {
    /// Node id within the plan.
    pub id: NodeId,
    /// Stage the batches are pushed to.
    pub receiver_stage_id: StageId,
    /// Fan-out contract, mirrored from the matching receive node.
    pub spec: ExchangeSpec,
}

/// Receiving half of a stage boundary: the first operator of the downstream
/// stage, draining the mailboxes fed by `sender_stage_id`.
///
/// The planning-only back-reference to the producing subtree is *not* a
/// field here; it lives in [`crate::context::PlanningContext`] so it can
/// never leak into the serialized plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveNode {
    /// Node id within the plan.
    pub id: NodeId,
    /// Stage the inbound batches originate from.
    pub sender_stage_id: StageId,
    /// Output schema attached by the planner for deterministic worker
    /// execution.
    #[serde(default)]
    pub schema: Option<Schema>,
    /// Fan-out/fan-in contract for this boundary.
    pub spec: ExchangeSpec,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExchangeSpec, KeySelector};

    struct ExplainVisitor;

    impl PlanNodeVisitor for ExplainVisitor {
        type Output = String;

        fn visit_send(&mut self, node: &SendNode) -> String {
            format!("send->{}", node.receiver_stage_id)
        }

        fn visit_receive(&mut self, node: &ReceiveNode) -> String {
            format!("recv<-{}", node.sender_stage_id)
        }
    }

    #[test]
    fn visitor_dispatches_by_variant() {
        let send = PlanNode::Send(SendNode {
            id: NodeId(1),
            receiver_stage_id: StageId(0),
            spec: ExchangeSpec::broadcast(),
        });
        let recv = PlanNode::Receive(ReceiveNode {
            id: NodeId(2),
            sender_stage_id: StageId(1),
            schema: None,
            spec: ExchangeSpec::hash_partitioned(KeySelector::new(vec![0])),
        });

        let mut v = ExplainVisitor;
        assert_eq!(send.visit(&mut v), "send->0");
        assert_eq!(recv.visit(&mut v), "recv<-1");
    }

    #[test]
    fn explain_names_the_exchange_type() {
        let recv = PlanNode::Receive(ReceiveNode {
            id: NodeId(4),
            sender_stage_id: StageId(1),
            schema: None,
            spec: ExchangeSpec::singleton(),
        });
        assert_eq!(recv.explain(), "MailboxReceive(Singleton)");
    }
}

//! Plan-time description of exchange boundaries.
//!
//! The optimizer (out of scope here) compiles a query into a tree of stages.
//! This crate models only what the exchange layer needs from that plan: the
//! closed set of boundary nodes ([`PlanNode`]), the declarative
//! [`ExchangeSpec`] attached to a receiving node, and the planning-phase
//! side table that remembers which subtree produces into each receive node.
//!
//! Everything here is immutable once planning completes and travels
//! coordinator → worker as JSON.

pub mod context;
pub mod exchange;
pub mod node;

pub use context::PlanningContext;
pub use exchange::{
    CollationKey, ExchangeSpec, ExchangeType, KeySelector, RangeBoundary, SortDirection,
};
pub use node::{NodeId, PlanNode, PlanNodeVisitor, ReceiveNode, SendNode};

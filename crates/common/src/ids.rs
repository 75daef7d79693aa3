//! Typed identifiers shared across planner and exchange components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-execution request identifier assigned at query submission.
///
/// Uniqueness across concurrent executions is a precondition on the
/// submitting component; nothing in this workspace enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable stage identifier within a query plan tree.
///
/// Signed on purpose: brokers are free to hand out negative ids for
/// synthetic stages and they must survive the address codec unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(
    /// Raw numeric id value.
    pub i32,
);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker index within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(
    /// Raw numeric id value.
    pub i32,
);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one running operator-chain instance: one worker executing one
/// stage of one request.
///
/// Created when the worker starts the stage, gone when the stage instance
/// completes, fails, or is cancelled. Equality and hashing cover all three
/// fields; inbound data is dispatched to chains by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId {
    /// Owning request.
    pub request_id: RequestId,
    /// Stage the chain executes.
    pub stage_id: StageId,
    /// Worker slot within the stage.
    pub worker_id: WorkerId,
}

impl ChainId {
    /// Build a chain identity from its raw parts.
    pub fn new(request_id: RequestId, stage_id: StageId, worker_id: WorkerId) -> Self {
        Self {
            request_id,
            stage_id,
            worker_id,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.request_id, self.stage_id, self.worker_id)
    }
}

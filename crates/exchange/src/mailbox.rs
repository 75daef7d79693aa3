//! Mailbox addressing.
//!
//! An address is the cross-process token naming one sender-worker →
//! receiver-worker channel of one request. The broker computes the topology
//! once per plan (without knowing the request id) and hands workers address
//! suffixes; [`mailbox_ids_for_request`] late-binds the request id onto
//! them at execution start.

use std::fmt;
use std::str::FromStr;

use nexq_common::{ChainId, NexqError, RequestId, Result, StageId, WorkerId};

/// Separator between address fields.
///
/// Must never collide with integer formatting output (digits, leading minus
/// sign), so negative stage/worker ids round-trip.
const SEPARATOR: char = '|';

/// Logical identity of one sender-worker → receiver-worker channel within a
/// query execution.
///
/// Encodes via `Display` to
/// `request|senderStage|senderWorker|receiverStage|receiverWorker` and
/// decodes via `FromStr`, failing with
/// [`NexqError::MalformedAddress`] on anything but exactly five integer
/// fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxId {
    pub request_id: RequestId,
    pub sender_stage_id: StageId,
    pub sender_worker_id: WorkerId,
    pub receiver_stage_id: StageId,
    pub receiver_worker_id: WorkerId,
}

impl MailboxId {
    pub fn new(
        request_id: RequestId,
        sender_stage_id: StageId,
        sender_worker_id: WorkerId,
        receiver_stage_id: StageId,
        receiver_worker_id: WorkerId,
    ) -> Self {
        Self {
            request_id,
            sender_stage_id,
            sender_worker_id,
            receiver_stage_id,
            receiver_worker_id,
        }
    }

    /// The receiving chain this address routes to.
    ///
    /// Sender fields are address metadata, not identity: two senders feeding
    /// the same receiver worker map to the same chain. Callers that need the
    /// sender must keep the full [`MailboxId`]. If order-preserving send
    /// ever lands, per-sender dispatch would key on the full id rather than
    /// widening [`ChainId`].
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(
            self.request_id,
            self.receiver_stage_id,
            self.receiver_worker_id,
        )
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.request_id,
            self.sender_stage_id,
            self.sender_worker_id,
            self.receiver_stage_id,
            self.receiver_worker_id,
            sep = SEPARATOR,
        )
    }
}

impl FromStr for MailboxId {
    type Err = NexqError;

    fn from_str(token: &str) -> Result<Self> {
        let parts: Vec<&str> = token.split(SEPARATOR).collect();
        if parts.len() != 5 {
            return Err(NexqError::MalformedAddress(format!(
                "expected 5 fields, got {} in {token:?}",
                parts.len()
            )));
        }
        Ok(Self {
            request_id: RequestId(parse_field(token, "request id", parts[0])?),
            sender_stage_id: StageId(parse_field(token, "sender stage", parts[1])?),
            sender_worker_id: WorkerId(parse_field(token, "sender worker", parts[2])?),
            receiver_stage_id: StageId(parse_field(token, "receiver stage", parts[3])?),
            receiver_worker_id: WorkerId(parse_field(token, "receiver worker", parts[4])?),
        })
    }
}

fn parse_field<T: FromStr>(token: &str, field: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| {
        NexqError::MalformedAddress(format!("non-integer {field} field {raw:?} in {token:?}"))
    })
}

/// Decode an address token down to the receiving chain identity.
///
/// Shorthand for `token.parse::<MailboxId>()?.chain_id()` used by inbound
/// dispatch, which only needs to know which chain to hand the message to.
pub fn decode_receiver_chain(token: &str) -> Result<ChainId> {
    Ok(token.parse::<MailboxId>()?.chain_id())
}

/// Late-bind `request_id` onto broker-computed address suffixes
/// (`senderStage|senderWorker|receiverStage|receiverWorker`), preserving
/// input order and length.
pub fn mailbox_ids_for_request(request_id: RequestId, suffixes: &[String]) -> Vec<String> {
    suffixes
        .iter()
        .map(|suffix| format!("{request_id}{SEPARATOR}{suffix}"))
        .collect()
}

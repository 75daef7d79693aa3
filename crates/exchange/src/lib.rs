//! Data-exchange runtime between stage workers.
//!
//! A query runs as a tree of stages; adjacent stages exchange row batches
//! through addressed mailboxes. This crate owns the runtime half of that
//! contract:
//! - [`mailbox`]: the address codec naming one sender-worker →
//!   receiver-worker channel for one request
//! - [`channel`]: the bounded, backpressured transport behind an address
//! - [`registry`]: per-request channel bookkeeping, cancellation, deadlines
//! - [`router`]: sender-side fan-out (singleton/broadcast/hash/round-robin/
//!   range)
//! - [`multiplexer`]: receiver-side fan-in, arrival-order or merge-sorted
//!
//! The plan-time description these components execute lives in
//! `nexq-planner`; the physical endpoint behind an address belongs to the
//! surrounding tooling.

pub mod channel;
pub mod mailbox;
mod merge;
pub mod multiplexer;
pub mod registry;
pub mod router;
mod rows;

pub use channel::{MailboxReceiver, MailboxSender};
pub use mailbox::{decode_receiver_chain, mailbox_ids_for_request, MailboxId};
pub use multiplexer::{multiplex, RecordBatchStream, SendableRecordBatchStream, StreamAdapter};
pub use registry::MailboxRegistry;
pub use router::FanOutRouter;

//! Per-request channel bookkeeping and teardown.
//!
//! Every channel of a request is opened through the registry, which keeps
//! the cancellation handle. Cancelling a request flips every handle whose
//! address carries that request id; a query deadline takes exactly the same
//! path. Both are idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nexq_common::{global_metrics, NexqError, RequestId, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{mailbox_channel, MailboxReceiver, MailboxSender};
use crate::mailbox::MailboxId;

/// Owner of the cancellation handles of all live channels.
///
/// One registry per process; shared via `Arc` between the runtime that
/// opens channels and the control plane that cancels requests.
#[derive(Debug, Default)]
pub struct MailboxRegistry {
    channels: Mutex<HashMap<MailboxId, watch::Sender<bool>>>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the channel for `id` and hand back both halves.
    ///
    /// The sender half goes to the sending worker's router, the receiver
    /// half to the receiving worker's multiplexer; the channel stays
    /// exclusively theirs. Opening the same address twice is a topology
    /// error.
    pub fn open(&self, id: MailboxId, capacity: usize) -> Result<(MailboxSender, MailboxReceiver)> {
        let mut channels = self.channels.lock().expect("mailbox registry lock");
        if channels.contains_key(&id) {
            return Err(NexqError::Execution(format!(
                "mailbox {id} is already open"
            )));
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        channels.insert(id.clone(), cancel_tx);
        drop(channels);

        global_metrics().channel_opened(id.request_id.0);
        debug!(mailbox = %id, capacity, "mailbox opened");
        Ok(mailbox_channel(id, capacity, cancel_rx))
    }

    /// Cancel one channel. A second cancel of the same address is a no-op.
    pub fn cancel(&self, id: &MailboxId) {
        let handle = self
            .channels
            .lock()
            .expect("mailbox registry lock")
            .remove(id);
        if let Some(cancel_tx) = handle {
            let _ = cancel_tx.send(true);
            global_metrics().record_cancellation(id.request_id.0);
            global_metrics().channel_closed(id.request_id.0);
            debug!(mailbox = %id, "mailbox cancelled");
        }
    }

    /// Tear down every channel of `request_id`, in any order.
    ///
    /// Used for explicit query cancellation and for exceeded deadlines;
    /// partial results already buffered are abandoned, nothing retries.
    /// Idempotent: a second call finds nothing to do.
    pub fn cancel_request(&self, request_id: RequestId) {
        let handles: Vec<(MailboxId, watch::Sender<bool>)> = {
            let mut channels = self.channels.lock().expect("mailbox registry lock");
            let ids: Vec<MailboxId> = channels
                .keys()
                .filter(|id| id.request_id == request_id)
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| channels.remove(&id).map(|tx| (id, tx)))
                .collect()
        };
        if handles.is_empty() {
            return;
        }
        for (id, cancel_tx) in &handles {
            let _ = cancel_tx.send(true);
            global_metrics().channel_closed(id.request_id.0);
        }
        global_metrics().record_cancellation(request_id.0);
        info!(
            request_id = %request_id,
            channels = handles.len(),
            "request exchange torn down"
        );
    }

    /// Drop bookkeeping for a request that completed normally.
    ///
    /// The channels have already carried end-of-stream; this only releases
    /// the cancellation handles.
    pub fn release_request(&self, request_id: RequestId) {
        let mut channels = self.channels.lock().expect("mailbox registry lock");
        let before = channels.len();
        channels.retain(|id, _| id.request_id != request_id);
        let released = before - channels.len();
        drop(channels);
        for _ in 0..released {
            global_metrics().channel_closed(request_id.0);
        }
        if released > 0 {
            debug!(request_id = %request_id, channels = released, "request exchange released");
        }
    }

    /// Whether any channel of `request_id` is still registered.
    pub fn has_request(&self, request_id: RequestId) -> bool {
        self.channels
            .lock()
            .expect("mailbox registry lock")
            .keys()
            .any(|id| id.request_id == request_id)
    }

    /// Arm the query deadline: when it expires and the request still has
    /// channels open, tear them down exactly like a cancel.
    ///
    /// Abort the returned handle when the request completes first.
    pub fn deadline_guard(
        self: &Arc<Self>,
        request_id: RequestId,
        deadline: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if registry.has_request(request_id) {
                warn!(request_id = %request_id, ?deadline, "query deadline exceeded, tearing down exchange");
                registry.cancel_request(request_id);
            }
        })
    }
}

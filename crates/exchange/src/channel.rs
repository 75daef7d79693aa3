//! Bounded, backpressured transport behind one mailbox address.
//!
//! One producer (the sending worker) and one consumer (the receiving
//! worker's multiplexer) per channel; nobody else may touch it. The queue
//! is bounded in batches: a slow receiver suspends its senders instead of
//! growing memory. Cancellation comes from the registry through a watch
//! signal and wakes both suspended ends within one scheduling step.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::record_batch::RecordBatch;
use futures::{Stream, StreamExt};
use nexq_common::{ChainId, NexqError, Result};
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::mailbox::MailboxId;

/// Wire unit of one mailbox: a row batch, end-of-stream, or an upstream
/// failure being propagated downstream.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    Batch(RecordBatch),
    Eos,
    Error(String),
}

/// Build the two halves of the channel for `id`.
///
/// `cancel` is the registry-owned teardown signal; flipping it to `true` is
/// terminal for both halves.
pub(crate) fn mailbox_channel(
    id: MailboxId,
    capacity: usize,
    cancel: watch::Receiver<bool>,
) -> (MailboxSender, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = MailboxSender {
        id: id.clone(),
        tx,
        cancel: cancel.clone(),
    };
    let receiver = MailboxReceiver {
        id,
        rx,
        cancel: WatchStream::new(cancel),
        done: false,
    };
    (sender, receiver)
}

/// Producer half of a mailbox.
#[derive(Debug)]
pub struct MailboxSender {
    id: MailboxId,
    tx: mpsc::Sender<Frame>,
    cancel: watch::Receiver<bool>,
}

impl MailboxSender {
    pub fn id(&self) -> &MailboxId {
        &self.id
    }

    /// Enqueue one batch, suspending while the channel is full.
    ///
    /// Backpressure is a scheduling state, not an error; the only error
    /// paths are cancellation and a consumer that is gone.
    pub async fn push(&self, batch: RecordBatch) -> Result<()> {
        self.send_frame(Frame::Batch(batch)).await
    }

    /// Deliver end-of-stream and release the producer side.
    pub async fn finish(self) -> Result<()> {
        self.send_frame(Frame::Eos).await
    }

    /// Propagate a failure to the consumer and release the producer side.
    pub async fn fail(self, cause: String) -> Result<()> {
        self.send_frame(Frame::Error(cause)).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let permit = self.reserve_slot().await?;
        permit.send(frame);
        Ok(())
    }

    /// Wait for queue capacity or cancellation, whichever comes first.
    async fn reserve_slot(&self) -> Result<mpsc::Permit<'_, Frame>> {
        let mut cancel = self.cancel.clone();
        loop {
            if *cancel.borrow() {
                return Err(self.closed("cancelled"));
            }
            tokio::select! {
                permit = self.tx.reserve() => {
                    return permit.map_err(|_| self.closed("consumer dropped"));
                }
                changed = cancel.changed() => {
                    if changed.is_err() {
                        // Registry dropped the cancel handle after normal
                        // completion; only queue state matters from here on.
                        let permit = self.tx.reserve().await;
                        return permit.map_err(|_| self.closed("consumer dropped"));
                    }
                }
            }
        }
    }

    fn closed(&self, why: &str) -> NexqError {
        NexqError::ChannelClosed(format!("mailbox {}: {why}", self.id))
    }
}

/// Consumer half of a mailbox.
///
/// Also a [`Stream`] of `Result<RecordBatch>` that ends at end-of-stream,
/// which is what the fan-in multiplexer consumes.
#[derive(Debug)]
pub struct MailboxReceiver {
    id: MailboxId,
    rx: mpsc::Receiver<Frame>,
    cancel: WatchStream<bool>,
    done: bool,
}

impl MailboxReceiver {
    pub fn id(&self) -> &MailboxId {
        &self.id
    }

    /// The chain this mailbox feeds.
    pub fn chain_id(&self) -> ChainId {
        self.id.chain_id()
    }

    /// Dequeue the next batch, suspending while the channel is empty.
    ///
    /// `Ok(None)` is end-of-stream. Upstream failure frames surface as
    /// [`NexqError::Upstream`]; cancellation and a producer that vanished
    /// without end-of-stream surface as [`NexqError::ChannelClosed`].
    pub async fn pop(&mut self) -> Result<Option<RecordBatch>> {
        self.next().await.transpose()
    }

    /// Consumer-side close: senders still pushing observe `ChannelClosed`.
    pub fn close(&mut self) {
        self.rx.close();
    }

    fn closed(&self, why: &str) -> NexqError {
        NexqError::ChannelClosed(format!("mailbox {}: {why}", self.id))
    }
}

impl Stream for MailboxReceiver {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // Cancellation wins over queued data: teardown is terminal and must
        // not be delayed behind a backlog.
        loop {
            match Pin::new(&mut this.cancel).poll_next(cx) {
                Poll::Ready(Some(true)) => {
                    this.done = true;
                    debug!(mailbox = %this.id, "mailbox receiver observed cancellation");
                    return Poll::Ready(Some(Err(this.closed("cancelled"))));
                }
                // Initial `false` value or a spurious publish.
                Poll::Ready(Some(false)) => continue,
                Poll::Ready(None) | Poll::Pending => break,
            }
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Frame::Batch(batch))) => Poll::Ready(Some(Ok(batch))),
            Poll::Ready(Some(Frame::Eos)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Frame::Error(cause))) => {
                this.done = true;
                Poll::Ready(Some(Err(NexqError::Upstream(cause))))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(
                    this.closed("producer dropped without end-of-stream")
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow_schema::{DataType, Field, Schema};
    use nexq_common::{RequestId, StageId, WorkerId};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_id() -> MailboxId {
        MailboxId::new(
            RequestId(1),
            StageId(1),
            WorkerId(0),
            StageId(0),
            WorkerId(0),
        )
    }

    fn batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).expect("batch")
    }

    #[tokio::test]
    async fn delivers_in_fifo_order_and_ends_at_eos() {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, mut rx) = mailbox_channel(test_id(), 4, cancel_rx);

        tx.push(batch(vec![1, 2])).await.expect("push");
        tx.push(batch(vec![3])).await.expect("push");
        tx.finish().await.expect("finish");

        let first = rx.pop().await.expect("pop").expect("some");
        assert_eq!(first.num_rows(), 2);
        let second = rx.pop().await.expect("pop").expect("some");
        assert_eq!(second.num_rows(), 1);
        assert!(rx.pop().await.expect("pop").is_none());
        // The stream stays ended.
        assert!(rx.pop().await.expect("pop").is_none());
    }

    #[tokio::test]
    async fn cancel_unblocks_suspended_push() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, _rx) = mailbox_channel(test_id(), 1, cancel_rx);

        tx.push(batch(vec![1])).await.expect("push fits capacity");
        let blocked = tokio::spawn(async move { tx.push(batch(vec![2])).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_tx.send(true).expect("cancel");

        let err = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("unblocked promptly")
            .expect("join")
            .expect_err("push fails after cancel");
        assert!(matches!(err, NexqError::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn cancel_unblocks_suspended_pop() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (_tx, mut rx) = mailbox_channel(test_id(), 1, cancel_rx);

        let blocked = tokio::spawn(async move { rx.pop().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_tx.send(true).expect("cancel");

        let err = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("unblocked promptly")
            .expect("join")
            .expect_err("pop fails after cancel");
        assert!(matches!(err, NexqError::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn push_after_cancel_fails_closed() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, _rx) = mailbox_channel(test_id(), 4, cancel_rx);

        cancel_tx.send(true).expect("cancel");
        let err = tx.push(batch(vec![1])).await.expect_err("closed");
        assert!(matches!(err, NexqError::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn failure_frame_surfaces_as_upstream_error() {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, mut rx) = mailbox_channel(test_id(), 4, cancel_rx);

        tx.fail("sender stage blew up".to_string())
            .await
            .expect("fail frame");
        let err = rx.pop().await.expect_err("upstream failure");
        assert!(matches!(err, NexqError::Upstream(_)));
    }

    #[tokio::test]
    async fn dropped_producer_is_not_a_clean_eos() {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, mut rx) = mailbox_channel(test_id(), 4, cancel_rx);

        drop(tx);
        let err = rx.pop().await.expect_err("no silent eos");
        assert!(matches!(err, NexqError::ChannelClosed(_)));
    }
}

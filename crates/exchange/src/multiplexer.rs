//! Receiver-side fan-in.
//!
//! One multiplexer per receiving worker: it takes the worker's inbound
//! mailboxes and presents them to the operator chain as a single logical
//! stream. Arrival-order mode forwards batches as they land; merge mode
//! k-way-merges collation-ordered senders.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use futures::Stream;
use nexq_common::{global_metrics, ChainId, NexqError, Result};
use nexq_planner::ExchangeSpec;
use tokio_stream::StreamMap;
use tracing::debug;

use crate::channel::MailboxReceiver;
use crate::merge::KWayMerge;

/// A stream of record batches that also knows its output schema.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> + Send {
    /// Output schema for every batch yielded by this stream.
    fn schema(&self) -> SchemaRef;
}

/// The standard "stream you can hand to an operator chain".
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream>>;

/// Adapter that attaches a schema to any `Stream<Item = Result<RecordBatch>>`.
pub struct StreamAdapter<S> {
    schema: SchemaRef,
    inner: S,
}

impl<S> StreamAdapter<S> {
    pub fn new(schema: SchemaRef, inner: S) -> Self {
        Self { schema, inner }
    }
}

impl<S> RecordBatchStream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Send + Unpin + 'static,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Unpin,
{
    type Item = Result<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Present the inbound mailboxes of one receiving worker as one logical
/// stream, per the receive node's exchange spec.
///
/// The stream completes only after every input delivered end-of-stream; the
/// first upstream failure terminates it immediately with that cause, and
/// the remaining channels are not drained further.
pub fn multiplex(
    schema: SchemaRef,
    spec: &ExchangeSpec,
    inputs: Vec<MailboxReceiver>,
    merge_batch_size_rows: usize,
) -> Result<SendableRecordBatchStream> {
    let chain = inputs.first().map(|input| input.chain_id());
    if !spec.sort_on_receiver() {
        return Ok(Box::pin(ArrivalOrderStream::new(schema, inputs, chain)));
    }

    if spec.collation().is_empty() {
        return Err(NexqError::Precondition(
            "receiver-sorted exchange needs a non-empty collation".to_string(),
        ));
    }
    for key in spec.collation() {
        if key.field >= schema.fields().len() {
            return Err(NexqError::Precondition(format!(
                "collation field {} out of range for schema with {} columns",
                key.field,
                schema.fields().len()
            )));
        }
    }

    let merge = KWayMerge::new(
        schema.clone(),
        spec.collation().to_vec(),
        merge_batch_size_rows,
        inputs,
    );
    let inner = futures::stream::unfold(merge, move |mut merge| async move {
        let item = merge.next_batch().await;
        if let Some(Ok(batch)) = &item {
            record_delivery(chain, batch);
        }
        item.map(|item| (item, merge))
    });
    Ok(Box::pin(StreamAdapter::new(schema, Box::pin(inner))))
}

fn record_delivery(chain: Option<ChainId>, batch: &RecordBatch) {
    if let Some(chain) = chain {
        global_metrics().record_delivery(
            chain.request_id.0,
            chain.stage_id.0,
            1,
            batch.num_rows() as u64,
        );
    }
}

/// Arrival-order fan-in: forwards from whichever input currently has data.
///
/// No interleaving guarantee across senders; per-channel FIFO order is
/// preserved and nothing is dropped or duplicated.
struct ArrivalOrderStream {
    schema: SchemaRef,
    inputs: StreamMap<usize, MailboxReceiver>,
    chain: Option<ChainId>,
    failed: bool,
}

impl ArrivalOrderStream {
    fn new(schema: SchemaRef, inputs: Vec<MailboxReceiver>, chain: Option<ChainId>) -> Self {
        let mut map = StreamMap::with_capacity(inputs.len());
        for (index, input) in inputs.into_iter().enumerate() {
            map.insert(index, input);
        }
        Self {
            schema,
            inputs: map,
            chain,
            failed: false,
        }
    }
}

impl Stream for ArrivalOrderStream {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.inputs).poll_next(cx) {
            Poll::Ready(Some((_, Ok(batch)))) => {
                record_delivery(this.chain, &batch);
                Poll::Ready(Some(Ok(batch)))
            }
            Poll::Ready(Some((input, Err(err)))) => {
                // Fail the logical stream with the first cause; the other
                // channels stop being drained.
                this.failed = true;
                if let (Some(chain), NexqError::Upstream(_)) = (this.chain, &err) {
                    global_metrics().record_upstream_failure(chain.request_id.0, chain.stage_id.0);
                }
                debug!(input, error = %err, "fan-in stream failed");
                Poll::Ready(Some(Err(err)))
            }
            // Every input delivered end-of-stream.
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl RecordBatchStream for ArrivalOrderStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

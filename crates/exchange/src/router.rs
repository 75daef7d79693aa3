//! Sender-side fan-out.
//!
//! One router per sending worker. It owns the mailbox senders toward every
//! worker of the receiving stage (`outputs[i]` = receiver worker `i`) and
//! decides, per batch, which of them get data.

use arrow::array::UInt32Array;
use arrow::compute::take;
use arrow::record_batch::RecordBatch;
use nexq_common::{global_metrics, NexqError, RequestId, Result, StageId};
use nexq_planner::{ExchangeSpec, ExchangeType, RangeBoundary};
use std::sync::Arc;
use tracing::debug;

use crate::channel::MailboxSender;
use crate::rows::{hash_row_key, range_destination};

/// Routes the batches of one sending worker across the receiving stage.
#[derive(Debug)]
pub struct FanOutRouter {
    spec: Arc<ExchangeSpec>,
    outputs: Vec<MailboxSender>,
    range_bounds: Vec<RangeBoundary>,
    round_robin: usize,
    request_id: RequestId,
    sender_stage_id: StageId,
}

impl FanOutRouter {
    /// `outputs[i]` must be the channel addressed to receiver worker `i`.
    ///
    /// Range exchanges additionally take the broker-computed boundary
    /// values; `bounds.len() + 1` ranges must line up with the receiver
    /// worker count.
    pub fn try_new(
        spec: Arc<ExchangeSpec>,
        outputs: Vec<MailboxSender>,
        range_bounds: Vec<RangeBoundary>,
    ) -> Result<Self> {
        if outputs.is_empty() {
            return Err(NexqError::Precondition(
                "fan-out router needs at least one destination".to_string(),
            ));
        }
        if spec.exchange_type() == ExchangeType::Singleton && outputs.len() != 1 {
            return Err(NexqError::Precondition(format!(
                "singleton exchange funnels into one receiver worker, got {}",
                outputs.len()
            )));
        }
        match spec.exchange_type() {
            ExchangeType::Range => {
                if range_bounds.len() + 1 != outputs.len() {
                    return Err(NexqError::Precondition(format!(
                        "range exchange with {} boundaries needs {} receiver workers, got {}",
                        range_bounds.len(),
                        range_bounds.len() + 1,
                        outputs.len()
                    )));
                }
            }
            _ if !range_bounds.is_empty() => {
                return Err(NexqError::Precondition(format!(
                    "{:?} exchange does not take range boundaries",
                    spec.exchange_type()
                )));
            }
            _ => {}
        }

        let head = &outputs[0];
        let request_id = head.id().request_id;
        let sender_stage_id = head.id().sender_stage_id;
        Ok(Self {
            spec,
            outputs,
            range_bounds,
            round_robin: 0,
            request_id,
            sender_stage_id,
        })
    }

    pub fn receiver_worker_count(&self) -> usize {
        self.outputs.len()
    }

    /// Compute `(destination worker index, batch)` pairs without touching
    /// the channels.
    ///
    /// Hash and range exchanges regroup rows per destination; broadcast
    /// replicates the batch; singleton and round-robin forward it whole.
    pub fn route(&mut self, batch: &RecordBatch) -> Result<Vec<(usize, RecordBatch)>> {
        let routed = match self.spec.exchange_type() {
            ExchangeType::Singleton => vec![(0, batch.clone())],
            ExchangeType::Broadcast => (0..self.outputs.len())
                .map(|worker| (worker, batch.clone()))
                .collect(),
            ExchangeType::RoundRobin => {
                let worker = self.round_robin;
                self.round_robin = (self.round_robin + 1) % self.outputs.len();
                vec![(worker, batch.clone())]
            }
            ExchangeType::HashPartitioned | ExchangeType::Range => self.split_keyed(batch)?,
        };
        Ok(routed)
    }

    /// Route one batch and push the pieces into the addressed channels,
    /// suspending under backpressure.
    pub async fn send(&mut self, batch: RecordBatch) -> Result<()> {
        let routed = self.route(&batch)?;
        let batches = routed.len() as u64;
        let rows: u64 = routed.iter().map(|(_, b)| b.num_rows() as u64).sum();
        for (worker, piece) in routed {
            self.outputs[worker].push(piece).await?;
        }
        global_metrics().record_route(self.request_id.0, self.sender_stage_id.0, batches, rows);
        Ok(())
    }

    /// Deliver end-of-stream to every destination and release the channels.
    pub async fn finish(self) -> Result<()> {
        debug!(
            request_id = %self.request_id,
            sender_stage_id = %self.sender_stage_id,
            "fan-out finished, closing mailboxes"
        );
        for output in self.outputs {
            output.finish().await?;
        }
        Ok(())
    }

    /// Fan a sender failure out to every destination so each receiving
    /// worker observes the cause.
    pub async fn fail(self, cause: String) -> Result<()> {
        debug!(
            request_id = %self.request_id,
            sender_stage_id = %self.sender_stage_id,
            cause = %cause,
            "fan-out failing, propagating to mailboxes"
        );
        for output in self.outputs {
            output.fail(cause.clone()).await?;
        }
        Ok(())
    }

    fn split_keyed(&self, batch: &RecordBatch) -> Result<Vec<(usize, RecordBatch)>> {
        let selector = self.spec.key_selector().ok_or_else(|| {
            NexqError::Execution("keyed exchange without a partition key selector".to_string())
        })?;
        let workers = self.outputs.len();

        let mut assignments: Vec<Vec<u32>> = vec![Vec::new(); workers];
        for row in 0..batch.num_rows() {
            let worker = match self.spec.exchange_type() {
                ExchangeType::HashPartitioned => {
                    (hash_row_key(batch, &selector.columns, row)? as usize) % workers
                }
                ExchangeType::Range => {
                    let key_column = selector.columns.first().copied().ok_or_else(|| {
                        NexqError::Execution("range exchange with empty key selector".to_string())
                    })?;
                    range_destination(batch, key_column, row, &self.range_bounds)?
                }
                // split_keyed is only reached for keyed types
                _ => 0,
            };
            assignments[worker].push(row as u32);
        }

        let mut routed = Vec::new();
        for (worker, row_indices) in assignments.into_iter().enumerate() {
            if row_indices.is_empty() {
                continue;
            }
            let indices = UInt32Array::from(row_indices);
            let columns = batch
                .columns()
                .iter()
                .map(|column| take(column.as_ref(), &indices, None))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| NexqError::Execution(format!("take kernel failed: {e}")))?;
            let piece = RecordBatch::try_new(batch.schema(), columns)
                .map_err(|e| NexqError::Execution(format!("partitioned batch rebuild: {e}")))?;
            routed.push((worker, piece));
        }
        Ok(routed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MailboxId;
    use crate::registry::MailboxRegistry;
    use arrow::array::{Array, Int64Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};
    use nexq_common::{RequestId, StageId, WorkerId};
    use nexq_planner::KeySelector;

    fn open_outputs(
        registry: &MailboxRegistry,
        request: u64,
        workers: i32,
    ) -> (Vec<MailboxSender>, Vec<crate::channel::MailboxReceiver>) {
        let mut senders = Vec::new();
        let mut receivers = Vec::new();
        for worker in 0..workers {
            let id = MailboxId::new(
                RequestId(request),
                StageId(1),
                WorkerId(0),
                StageId(0),
                WorkerId(worker),
            );
            let (tx, rx) = registry.open(id, 8).expect("open");
            senders.push(tx);
            receivers.push(rx);
        }
        (senders, receivers)
    }

    fn batch(ids: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(ids))]).expect("batch")
    }

    fn keyed_batch(ids: Vec<i64>, names: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .expect("batch")
    }

    #[tokio::test]
    async fn singleton_always_targets_worker_zero() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 1, 1);
        let mut router =
            FanOutRouter::try_new(Arc::new(ExchangeSpec::singleton()), senders, vec![])
                .expect("router");

        let routed = router.route(&batch(vec![1, 2, 3])).expect("route");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, 0);
        assert_eq!(routed[0].1.num_rows(), 3);
    }

    #[tokio::test]
    async fn singleton_rejects_multiple_destinations() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 2, 3);
        let err = FanOutRouter::try_new(Arc::new(ExchangeSpec::singleton()), senders, vec![])
            .expect_err("singleton with 3 workers");
        assert!(matches!(err, NexqError::Precondition(_)));
    }

    #[tokio::test]
    async fn broadcast_replicates_per_receiver_worker() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 3, 4);
        let mut router =
            FanOutRouter::try_new(Arc::new(ExchangeSpec::broadcast()), senders, vec![])
                .expect("router");

        let routed = router.route(&batch(vec![1, 2])).expect("route");
        assert_eq!(routed.len(), 4);
        let copies: u64 = routed.iter().map(|(_, b)| b.num_rows() as u64).sum();
        assert_eq!(copies, 4 * 2);
        let workers: Vec<usize> = routed.iter().map(|(w, _)| *w).collect();
        assert_eq!(workers, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn round_robin_cycles_per_batch() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 4, 3);
        let mut router =
            FanOutRouter::try_new(Arc::new(ExchangeSpec::round_robin()), senders, vec![])
                .expect("router");

        let mut destinations = Vec::new();
        for i in 0..6 {
            let routed = router.route(&batch(vec![i])).expect("route");
            assert_eq!(routed.len(), 1);
            destinations.push(routed[0].0);
        }
        assert_eq!(destinations, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn hash_routing_is_deterministic_and_groups_keys() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 5, 3);
        let spec = Arc::new(ExchangeSpec::hash_partitioned(KeySelector::new(vec![1])));
        let mut router = FanOutRouter::try_new(spec, senders, vec![]).expect("router");

        let input = keyed_batch(vec![1, 2, 3, 4], vec!["a", "b", "a", "b"]);
        let first = router.route(&input).expect("route");
        let second = router.route(&input).expect("route");

        let dest_of = |routed: &[(usize, RecordBatch)], key: &str| -> Vec<usize> {
            routed
                .iter()
                .filter_map(|(worker, b)| {
                    let names = b
                        .column(1)
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .expect("names");
                    (0..names.len()).any(|i| names.value(i) == key).then_some(*worker)
                })
                .collect()
        };

        // Each key lands on exactly one worker, the same one every time.
        for key in ["a", "b"] {
            let d1 = dest_of(&first, key);
            let d2 = dest_of(&second, key);
            assert_eq!(d1.len(), 1, "key {key} split across workers");
            assert_eq!(d1, d2, "key {key} moved between invocations");
        }
        let rows: usize = first.iter().map(|(_, b)| b.num_rows()).sum();
        assert_eq!(rows, 4);
    }

    #[tokio::test]
    async fn range_routing_respects_boundaries() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 6, 3);
        let spec = Arc::new(ExchangeSpec::range(KeySelector::new(vec![0])));
        let bounds = vec![RangeBoundary::Int64(10), RangeBoundary::Int64(20)];
        let mut router = FanOutRouter::try_new(spec, senders, bounds).expect("router");

        let routed = router.route(&batch(vec![5, 15, 25, 7])).expect("route");
        let rows_of = |worker: usize| -> Vec<i64> {
            routed
                .iter()
                .filter(|(w, _)| *w == worker)
                .flat_map(|(_, b)| {
                    let ids = b
                        .column(0)
                        .as_any()
                        .downcast_ref::<Int64Array>()
                        .expect("ids");
                    ids.values().to_vec()
                })
                .collect()
        };
        assert_eq!(rows_of(0), vec![5, 7]);
        assert_eq!(rows_of(1), vec![15]);
        assert_eq!(rows_of(2), vec![25]);
    }

    #[tokio::test]
    async fn range_boundary_count_must_match_workers() {
        let registry = MailboxRegistry::new();
        let (senders, _receivers) = open_outputs(&registry, 7, 3);
        let spec = Arc::new(ExchangeSpec::range(KeySelector::new(vec![0])));
        let err = FanOutRouter::try_new(spec, senders, vec![RangeBoundary::Int64(10)])
            .expect_err("2 ranges for 3 workers");
        assert!(matches!(err, NexqError::Precondition(_)));
    }
}

//! K-way ordered merge across inbound mailboxes.
//!
//! Correctness contract: every input stream must individually satisfy the
//! collation. The merge never re-sorts; with sort-on-send unimplemented,
//! upstream ordering has to be arranged by other means, and unordered
//! inputs produce unordered output.

use std::cmp::Ordering;

use arrow::array::{new_empty_array, Array, ArrayRef};
use arrow::compute::interleave;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use nexq_common::{NexqError, Result};
use nexq_planner::CollationKey;

use crate::channel::MailboxReceiver;
use crate::rows::compare_rows;

/// Per-input merge position.
enum Cursor {
    /// Needs the next frame before any more rows can be merged.
    Fetch,
    /// Holds unconsumed rows starting at `row`.
    Active { batch: RecordBatch, row: usize },
    /// Batch fully consumed this round; kept alive because the pending
    /// output still references its arrays.
    Drained { batch: RecordBatch },
    /// End-of-stream observed.
    Exhausted,
}

pub(crate) struct KWayMerge {
    schema: SchemaRef,
    collation: Vec<CollationKey>,
    batch_size_rows: usize,
    inputs: Vec<MailboxReceiver>,
    cursors: Vec<Cursor>,
    done: bool,
}

impl KWayMerge {
    pub(crate) fn new(
        schema: SchemaRef,
        collation: Vec<CollationKey>,
        batch_size_rows: usize,
        inputs: Vec<MailboxReceiver>,
    ) -> Self {
        let cursors = inputs.iter().map(|_| Cursor::Fetch).collect();
        Self {
            schema,
            collation,
            batch_size_rows: batch_size_rows.max(1),
            inputs,
            cursors,
            done: false,
        }
    }

    /// Next merged batch; `None` once every input delivered end-of-stream.
    ///
    /// The first input error (upstream failure, cancellation, vanished
    /// producer) terminates the merge immediately without draining the
    /// remaining channels.
    pub(crate) async fn next_batch(&mut self) -> Option<Result<RecordBatch>> {
        if self.done {
            return None;
        }
        match self.fill_and_select().await {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    async fn fill_and_select(&mut self) -> Result<Option<RecordBatch>> {
        // The global minimum is only known once every non-exhausted input
        // holds rows, so fetching blocks the round.
        for i in 0..self.inputs.len() {
            while matches!(self.cursors[i], Cursor::Fetch) {
                self.cursors[i] = match self.inputs[i].pop().await? {
                    Some(batch) if batch.num_rows() > 0 => Cursor::Active { batch, row: 0 },
                    Some(_) => Cursor::Fetch,
                    None => Cursor::Exhausted,
                };
            }
        }

        let mut selections: Vec<(usize, usize)> = Vec::new();
        while selections.len() < self.batch_size_rows {
            let Some(input) = self.min_input()? else {
                break;
            };
            let cursor = std::mem::replace(&mut self.cursors[input], Cursor::Fetch);
            let Cursor::Active { batch, row } = cursor else {
                return Err(NexqError::Execution(
                    "merge selected an input without rows".to_string(),
                ));
            };
            selections.push((input, row));
            if row + 1 < batch.num_rows() {
                self.cursors[input] = Cursor::Active { batch, row: row + 1 };
            } else {
                // This input's next value lives in a frame we have not
                // fetched; emit what we have before waiting on it.
                self.cursors[input] = Cursor::Drained { batch };
                break;
            }
        }

        if selections.is_empty() {
            return Ok(None);
        }
        let out = self.assemble(&selections)?;
        for cursor in self.cursors.iter_mut() {
            if matches!(cursor, Cursor::Drained { .. }) {
                *cursor = Cursor::Fetch;
            }
        }
        Ok(Some(out))
    }

    /// Index of the active input whose current row sorts first.
    fn min_input(&self) -> Result<Option<usize>> {
        let mut best: Option<(usize, &RecordBatch, usize)> = None;
        for (i, cursor) in self.cursors.iter().enumerate() {
            let Cursor::Active { batch, row } = cursor else {
                continue;
            };
            best = match best {
                None => Some((i, batch, *row)),
                Some((bi, bb, brow)) => {
                    if compare_rows(batch, *row, bb, brow, &self.collation)? == Ordering::Less {
                        Some((i, batch, *row))
                    } else {
                        Some((bi, bb, brow))
                    }
                }
            };
        }
        Ok(best.map(|(i, _, _)| i))
    }

    fn assemble(&self, selections: &[(usize, usize)]) -> Result<RecordBatch> {
        let width = self.schema.fields().len();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(width);
        for col in 0..width {
            let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.cursors.len());
            for cursor in &self.cursors {
                let array = match cursor {
                    Cursor::Active { batch, .. } | Cursor::Drained { batch } => {
                        if col >= batch.num_columns() {
                            return Err(NexqError::Execution(format!(
                                "merge input batch has {} columns, schema expects {width}",
                                batch.num_columns()
                            )));
                        }
                        batch.column(col).clone()
                    }
                    // Never referenced by `selections`; a placeholder keeps
                    // the interleave input aligned with input indices.
                    _ => new_empty_array(self.schema.field(col).data_type()),
                };
                arrays.push(array);
            }
            let refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
            let merged = interleave(&refs, selections)
                .map_err(|e| NexqError::Execution(format!("interleave kernel failed: {e}")))?;
            columns.push(merged);
        }
        RecordBatch::try_new(self.schema.clone(), columns)
            .map_err(|e| NexqError::Execution(format!("merged batch rebuild: {e}")))
    }
}

use serde::{Deserialize, Serialize};

/// Runtime knobs for the exchange layer, shared by all workers of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Bounded mailbox queue depth, in row batches.
    pub channel_capacity_batches: usize,
    /// Row budget per batch assembled by the ordered merge.
    pub merge_batch_size_rows: usize,
    /// Query-level deadline; exceeding it tears the exchange down the same
    /// way an explicit cancel does.
    pub query_deadline_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            channel_capacity_batches: 16,
            merge_batch_size_rows: 8192,
            query_deadline_ms: 10 * 60 * 1000,
        }
    }
}

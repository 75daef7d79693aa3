use nexq_common::{NexqError, Result};
use serde::{Deserialize, Serialize};

/// Fan-out policy governing how a sending stage distributes row batches
/// across the workers of the receiving stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeType {
    /// Every sender funnels into receiver worker 0.
    Singleton,
    /// Every receiver worker gets a copy of every batch.
    Broadcast,
    /// Per-row destination by deterministic hash of the partition key.
    HashPartitioned,
    /// Whole batches cycle across receiver workers for load balancing.
    RoundRobin,
    /// Contiguous key ranges map to contiguous worker indices.
    Range,
}

impl ExchangeType {
    /// Whether this policy routes rows by a partition key.
    pub fn is_keyed(&self) -> bool {
        matches!(self, ExchangeType::HashPartitioned | ExchangeType::Range)
    }
}

/// Sort direction of one collation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One field of a collation: input column index plus direction.
///
/// A collation is an ordered list of these; comparison is lexicographic in
/// list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollationKey {
    /// Input column index.
    pub field: usize,
    /// Per-field direction.
    pub direction: SortDirection,
}

impl CollationKey {
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: usize) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }
}

/// Partition key extraction contract: the input columns, in order, whose
/// values form the routing key of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySelector {
    /// Key column indices.
    pub columns: Vec<usize>,
}

impl KeySelector {
    pub fn new(columns: Vec<usize>) -> Self {
        Self { columns }
    }
}

/// A serializable boundary value for range routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeBoundary {
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

/// Declarative exchange description attached to a receive node at plan time.
///
/// Immutable once planning completes; all workers of the receiving stage
/// share it read-only. Construction goes through [`ExchangeSpec::try_new`]
/// (or the shape-specific helpers), which enforce the plan-time contracts:
/// sort-on-send is unimplemented, and only keyed exchange types carry a key
/// selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSpec {
    exchange_type: ExchangeType,
    key_selector: Option<KeySelector>,
    collation: Vec<CollationKey>,
    sort_on_sender: bool,
    sort_on_receiver: bool,
}

impl ExchangeSpec {
    /// General validated constructor.
    pub fn try_new(
        exchange_type: ExchangeType,
        key_selector: Option<KeySelector>,
        collation: Vec<CollationKey>,
        sort_on_sender: bool,
        sort_on_receiver: bool,
    ) -> Result<Self> {
        if sort_on_sender {
            return Err(NexqError::Precondition(
                "ordering on send is not implemented; specs must set sort_on_sender = false"
                    .to_string(),
            ));
        }
        if exchange_type.is_keyed() && key_selector.is_none() {
            return Err(NexqError::Precondition(format!(
                "{exchange_type:?} exchange requires a partition key selector"
            )));
        }
        if !exchange_type.is_keyed() && key_selector.is_some() {
            return Err(NexqError::Precondition(format!(
                "{exchange_type:?} exchange does not take a partition key selector"
            )));
        }
        Ok(Self {
            exchange_type,
            key_selector,
            collation,
            sort_on_sender,
            sort_on_receiver,
        })
    }

    pub fn singleton() -> Self {
        Self::plain(ExchangeType::Singleton)
    }

    pub fn broadcast() -> Self {
        Self::plain(ExchangeType::Broadcast)
    }

    pub fn round_robin() -> Self {
        Self::plain(ExchangeType::RoundRobin)
    }

    pub fn hash_partitioned(key_selector: KeySelector) -> Self {
        Self {
            exchange_type: ExchangeType::HashPartitioned,
            key_selector: Some(key_selector),
            collation: Vec::new(),
            sort_on_sender: false,
            sort_on_receiver: false,
        }
    }

    pub fn range(key_selector: KeySelector) -> Self {
        Self {
            exchange_type: ExchangeType::Range,
            key_selector: Some(key_selector),
            collation: Vec::new(),
            sort_on_sender: false,
            sort_on_receiver: false,
        }
    }

    /// Request an ordered merge on the receiver using `collation`.
    ///
    /// The merge is only correct when every sender stream already satisfies
    /// the collation; with sort-on-send unimplemented that ordering has to
    /// be arranged upstream.
    pub fn with_receiver_sort(mut self, collation: Vec<CollationKey>) -> Self {
        self.collation = collation;
        self.sort_on_receiver = true;
        self
    }

    fn plain(exchange_type: ExchangeType) -> Self {
        Self {
            exchange_type,
            key_selector: None,
            collation: Vec::new(),
            sort_on_sender: false,
            sort_on_receiver: false,
        }
    }

    pub fn exchange_type(&self) -> ExchangeType {
        self.exchange_type
    }

    pub fn key_selector(&self) -> Option<&KeySelector> {
        self.key_selector.as_ref()
    }

    pub fn collation(&self) -> &[CollationKey] {
        &self.collation
    }

    pub fn sort_on_sender(&self) -> bool {
        self.sort_on_sender
    }

    pub fn sort_on_receiver(&self) -> bool {
        self.sort_on_receiver
    }
}

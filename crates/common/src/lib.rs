//! Shared configuration, error types, IDs, and observability primitives for nexq crates.
//!
//! Architecture role:
//! - defines the exchange-layer configuration passed across crates
//! - provides common [`NexqError`] / [`Result`] contracts
//! - hosts the typed ids naming requests, stages, workers, and operator chains
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::ExchangeConfig;
pub use error::{NexqError, Result};
pub use ids::{ChainId, RequestId, StageId, WorkerId};
pub use metrics::{global_metrics, MetricsRegistry};

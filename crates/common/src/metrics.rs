use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Exchange-layer metrics registry.
///
/// Cheap to clone; all clones feed the same underlying registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    exchange_batches_routed: CounterVec,
    exchange_rows_routed: CounterVec,
    exchange_batches_delivered: CounterVec,
    exchange_rows_delivered: CounterVec,
    exchange_upstream_failures: CounterVec,
    exchange_cancellations: CounterVec,
    exchange_open_channels: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Sender side: batches/rows handed to the fan-out router and pushed
    /// toward a receiving stage.
    pub fn record_route(&self, request_id: u64, sender_stage_id: i32, batches: u64, rows: u64) {
        let request = request_id.to_string();
        let stage = sender_stage_id.to_string();
        let labels = [request.as_str(), stage.as_str()];
        self.inner
            .exchange_batches_routed
            .with_label_values(&labels)
            .inc_by(batches as f64);
        self.inner
            .exchange_rows_routed
            .with_label_values(&labels)
            .inc_by(rows as f64);
    }

    /// Receiver side: batches/rows surfaced by the fan-in multiplexer.
    pub fn record_delivery(&self, request_id: u64, receiver_stage_id: i32, batches: u64, rows: u64) {
        let request = request_id.to_string();
        let stage = receiver_stage_id.to_string();
        let labels = [request.as_str(), stage.as_str()];
        self.inner
            .exchange_batches_delivered
            .with_label_values(&labels)
            .inc_by(batches as f64);
        self.inner
            .exchange_rows_delivered
            .with_label_values(&labels)
            .inc_by(rows as f64);
    }

    pub fn record_upstream_failure(&self, request_id: u64, receiver_stage_id: i32) {
        let request = request_id.to_string();
        let stage = receiver_stage_id.to_string();
        let labels = [request.as_str(), stage.as_str()];
        self.inner
            .exchange_upstream_failures
            .with_label_values(&labels)
            .inc();
    }

    pub fn record_cancellation(&self, request_id: u64) {
        let label = request_id.to_string();
        self.inner
            .exchange_cancellations
            .with_label_values(&[label.as_str()])
            .inc();
    }

    pub fn channel_opened(&self, request_id: u64) {
        let label = request_id.to_string();
        self.inner
            .exchange_open_channels
            .with_label_values(&[label.as_str()])
            .inc();
    }

    pub fn channel_closed(&self, request_id: u64) {
        let label = request_id.to_string();
        self.inner
            .exchange_open_channels
            .with_label_values(&[label.as_str()])
            .dec();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let exchange_batches_routed = counter_vec(
            &registry,
            "nexq_exchange_batches_routed_total",
            "Batches routed by fan-out routers",
            &["request_id", "stage_id"],
        );
        let exchange_rows_routed = counter_vec(
            &registry,
            "nexq_exchange_rows_routed_total",
            "Rows routed by fan-out routers",
            &["request_id", "stage_id"],
        );
        let exchange_batches_delivered = counter_vec(
            &registry,
            "nexq_exchange_batches_delivered_total",
            "Batches delivered by fan-in multiplexers",
            &["request_id", "stage_id"],
        );
        let exchange_rows_delivered = counter_vec(
            &registry,
            "nexq_exchange_rows_delivered_total",
            "Rows delivered by fan-in multiplexers",
            &["request_id", "stage_id"],
        );
        let exchange_upstream_failures = counter_vec(
            &registry,
            "nexq_exchange_upstream_failures_total",
            "Upstream failures propagated into receiving stages",
            &["request_id", "stage_id"],
        );
        let exchange_cancellations = counter_vec(
            &registry,
            "nexq_exchange_cancellations_total",
            "Channel cancellations",
            &["request_id"],
        );
        let exchange_open_channels = gauge_vec(
            &registry,
            "nexq_exchange_open_channels",
            "Currently open exchange channels",
            &["request_id"],
        );

        Self {
            registry,
            exchange_batches_routed,
            exchange_rows_routed,
            exchange_batches_delivered,
            exchange_rows_delivered,
            exchange_upstream_failures,
            exchange_cancellations,
            exchange_open_channels,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

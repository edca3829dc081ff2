use std::sync::{Arc, OnceLock};

use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Process-wide counter registry with Prometheus text rendering.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    plans_materialized: CounterVec,
    planning_failures: CounterVec,
    shards_resolved: CounterVec,
    containers_allocated: Counter,
    records_finished: Counter,
}

impl MetricsRegistry {
    /// Create an empty registry with all pulse metric families registered.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Count one successful materialization for `dataset`.
    pub fn inc_plans_materialized(&self, dataset: &str) {
        self.inner
            .plans_materialized
            .with_label_values(&[dataset])
            .inc();
    }

    /// Count one rejected materialization, labeled by failure kind.
    pub fn inc_planning_failures(&self, dataset: &str, kind: &str) {
        self.inner
            .planning_failures
            .with_label_values(&[dataset, kind])
            .inc();
    }

    /// Count shards resolved for one leaf of `dataset`.
    pub fn add_shards_resolved(&self, dataset: &str, shards: u64) {
        self.inner
            .shards_resolved
            .with_label_values(&[dataset])
            .inc_by(shards as f64);
    }

    /// Count one container allocation by a record builder.
    pub fn inc_containers_allocated(&self) {
        self.inner.containers_allocated.inc();
    }

    /// Count one finalized record.
    pub fn inc_records_finished(&self) {
        self.inner.records_finished.inc();
    }

    /// Render all registered families in Prometheus text exposition format.
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

        let plans_materialized = counter_vec(
            &registry,
            "pulse_plans_materialized_total",
            "Exec plans successfully materialized",
            &["dataset"],
        );
        let planning_failures = counter_vec(
            &registry,
            "pulse_planning_failures_total",
            "Materializations rejected before dispatch",
            &["dataset", "kind"],
        );
        let shards_resolved = counter_vec(
            &registry,
            "pulse_shards_resolved_total",
            "Shards resolved from shard-key filters",
            &["dataset"],
        );
        let containers_allocated = counter(
            &registry,
            "pulse_record_containers_allocated_total",
            "Record containers allocated by builders",
        );
        let records_finished = counter(
            &registry,
            "pulse_records_finished_total",
            "Records finalized by builders",
        );

        Self {
            registry,
            plans_materialized,
            planning_failures,
            shards_resolved,
            containers_allocated,
            records_finished,
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

fn counter(registry: &Registry, name: &str, help: &str) -> Counter {
    let c = Counter::with_opts(Opts::new(name, help)).expect("counter");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Lazily initialized process-wide registry.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

//! Observability for the placement controller
//!
//! Provides:
//! - Prometheus self-metrics (sampling latency, per-node utilization,
//!   migration outcomes, admission state)
//! - Structured JSON events through tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for a sampling pass (in seconds)
const SAMPLING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    sampling_latency_seconds: Histogram,
    nodes_sampled: IntGauge,
    nodes_absent: IntGauge,
    node_utilization_percent: GaugeVec,
    migrations_completed: IntCounter,
    migrations_aborted: IntCounterVec,
    migrations_suppressed: IntCounter,
    teardowns: IntCounter,
    admission_active: IntGauge,
    scaler_requests: IntCounterVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            sampling_latency_seconds: register_histogram!(
                "edge_placer_sampling_latency_seconds",
                "Time spent on one utilization sampling pass",
                SAMPLING_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            nodes_sampled: register_int_gauge!(
                "edge_placer_nodes_sampled",
                "Nodes with a utilization sample in the latest pass"
            )
            .expect("Failed to register nodes_sampled"),

            nodes_absent: register_int_gauge!(
                "edge_placer_nodes_absent",
                "Configured nodes missing from the latest pass"
            )
            .expect("Failed to register nodes_absent"),

            node_utilization_percent: register_gauge_vec!(
                "edge_placer_node_utilization_percent",
                "Latest sampled utilization per node",
                &["node"]
            )
            .expect("Failed to register node_utilization_percent"),

            migrations_completed: register_int_counter!(
                "edge_placer_migrations_completed_total",
                "Migrations that reached the complete phase"
            )
            .expect("Failed to register migrations_completed"),

            migrations_aborted: register_int_counter_vec!(
                "edge_placer_migrations_aborted_total",
                "Migrations aborted for the current cycle",
                &["reason"]
            )
            .expect("Failed to register migrations_aborted"),

            migrations_suppressed: register_int_counter!(
                "edge_placer_migrations_suppressed_total",
                "Cycles skipped because the destination matched the last stable node"
            )
            .expect("Failed to register migrations_suppressed"),

            teardowns: register_int_counter!(
                "edge_placer_teardowns_total",
                "Bulk teardowns triggered by loss of capacity"
            )
            .expect("Failed to register teardowns"),

            admission_active: register_int_gauge!(
                "edge_placer_admission_active",
                "1 when at least one node accepts new instances"
            )
            .expect("Failed to register admission_active"),

            scaler_requests: register_int_counter_vec!(
                "edge_placer_scaler_requests_total",
                "External scaler RPCs served",
                &["method"]
            )
            .expect("Failed to register scaler_requests"),
        }
    }
}

/// Handle to the process-wide controller metrics.
///
/// Clones share the same underlying registry entries.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    /// Record the outcome of a sampling pass
    pub fn observe_sampling(&self, duration_secs: f64, sampled: usize, configured: usize) {
        let inner = self.inner();
        inner.sampling_latency_seconds.observe(duration_secs);
        inner.nodes_sampled.set(sampled as i64);
        inner
            .nodes_absent
            .set(configured.saturating_sub(sampled) as i64);
    }

    pub fn set_node_utilization(&self, node: &str, percent: f64) {
        self.inner()
            .node_utilization_percent
            .with_label_values(&[node])
            .set(percent);
    }

    pub fn inc_migrations_completed(&self) {
        self.inner().migrations_completed.inc();
    }

    pub fn inc_migrations_aborted(&self, reason: &str) {
        self.inner()
            .migrations_aborted
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_migrations_suppressed(&self) {
        self.inner().migrations_suppressed.inc();
    }

    pub fn inc_teardowns(&self) {
        self.inner().teardowns.inc();
    }

    pub fn set_admission_active(&self, active: bool) {
        self.inner().admission_active.set(i64::from(active));
    }

    pub fn inc_scaler_request(&self, method: &str) {
        self.inner()
            .scaler_requests
            .with_label_values(&[method])
            .inc();
    }
}

/// Emits controller events with a stable `event` field
#[derive(Clone)]
pub struct StructuredLogger {
    controller: String,
}

impl StructuredLogger {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
        }
    }

    pub fn log_startup(&self, version: &str, nodes: usize, groups: usize) {
        info!(
            event = "controller_started",
            controller = %self.controller,
            version = %version,
            nodes = nodes,
            groups = groups,
            "Placement controller started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            controller = %self.controller,
            reason = %reason,
            "Placement controller shutting down"
        );
    }

    pub fn log_classification(&self, underloaded: &[String], overloaded: &[String]) {
        info!(
            event = "nodes_classified",
            controller = %self.controller,
            underloaded = ?underloaded,
            overloaded = ?overloaded,
            "Classified nodes"
        );
    }

    pub fn log_no_action(&self, reason: &str) {
        info!(
            event = "rebalance_no_action",
            controller = %self.controller,
            reason = %reason,
            "No migration this cycle"
        );
    }

    pub fn log_suppressed(&self, destination: &str) {
        info!(
            event = "migration_suppressed",
            controller = %self.controller,
            destination = %destination,
            "Best node unchanged since last migration"
        );
    }

    pub fn log_migration_started(&self, group: &str, from: &str, to: &str) {
        info!(
            event = "migration_started",
            controller = %self.controller,
            group = %group,
            from = %from,
            to = %to,
            "Migrating one instance"
        );
    }

    pub fn log_migration_step(&self, group: &str, phase: &str, affected: usize) {
        info!(
            event = "migration_step",
            controller = %self.controller,
            group = %group,
            phase = %phase,
            affected = affected,
            "Migration step applied"
        );
    }

    pub fn log_migration_completed(&self, group: &str, from: &str, to: &str) {
        info!(
            event = "migration_completed",
            controller = %self.controller,
            group = %group,
            from = %from,
            to = %to,
            "Migration complete"
        );
    }

    pub fn log_migration_aborted(&self, group: &str, phase: &str, error: &str) {
        warn!(
            event = "migration_aborted",
            controller = %self.controller,
            group = %group,
            phase = %phase,
            error = %error,
            "Migration aborted, will retry from live state next cycle"
        );
    }

    pub fn log_admission(&self, active: bool, admissible: usize) {
        if active {
            info!(
                event = "admission_changed",
                controller = %self.controller,
                active = true,
                admissible_nodes = admissible,
                "Capacity available, admitting new instances"
            );
        } else {
            warn!(
                event = "admission_changed",
                controller = %self.controller,
                active = false,
                admissible_nodes = admissible,
                "No node has capacity, tearing down workloads"
            );
        }
    }

    pub fn log_teardown(&self, groups: usize, jobs: usize, pods: usize) {
        warn!(
            event = "teardown_completed",
            controller = %self.controller,
            groups = groups,
            jobs_deleted = jobs,
            pods_deleted = pods,
            "Bulk teardown complete"
        );
    }

    pub fn log_overloaded(&self, overloaded: &[String], window_secs: u64) {
        if overloaded.is_empty() {
            info!(
                event = "overload_check",
                controller = %self.controller,
                window_secs = window_secs,
                "No overloaded nodes over the long window"
            );
        } else {
            warn!(
                event = "overload_check",
                controller = %self.controller,
                window_secs = window_secs,
                overloaded = ?overloaded,
                "Overloaded nodes over the long window"
            );
        }
    }
}

//! Observability infrastructure for the Tarema scheduler
//!
//! Provides:
//! - Prometheus metrics (observations, relabels, placements, pass latency)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Buckets for the number of feasible nodes a placement was chosen among
const CANDIDATE_BUCKETS: &[f64] = &[1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    observations_accepted: IntCounter,
    observations_duplicate: IntCounter,
    trace_errors: IntCounter,
    node_relabels: IntCounter,
    task_relabels: IntCounter,
    estimator_not_ready: IntCounter,
    placements: IntCounterVec,
    unschedulable: IntCounter,
    placement_candidates: Histogram,
    relabel_latency_seconds: Histogram,
    pass_latency_seconds: Histogram,
    labelled_nodes: IntGauge,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            observations_accepted: register_int_counter!(
                "tarema_observations_total",
                "Task terminations accepted into the observation store"
            )
            .expect("Failed to register observations_total"),

            observations_duplicate: register_int_counter!(
                "tarema_duplicate_observations_total",
                "Task terminations ignored because the instance was already recorded"
            )
            .expect("Failed to register duplicate_observations_total"),

            trace_errors: register_int_counter!(
                "tarema_trace_errors_total",
                "Task terminations rejected because the trace record was invalid"
            )
            .expect("Failed to register trace_errors_total"),

            node_relabels: register_int_counter!(
                "tarema_node_relabels_total",
                "Node labellings published"
            )
            .expect("Failed to register node_relabels_total"),

            task_relabels: register_int_counter!(
                "tarema_task_relabels_total",
                "Task labellings published"
            )
            .expect("Failed to register task_relabels_total"),

            estimator_not_ready: register_int_counter!(
                "tarema_estimator_not_ready_total",
                "Relabel attempts skipped because the estimator was not ready"
            )
            .expect("Failed to register estimator_not_ready_total"),

            placements: register_int_counter_vec!(
                "tarema_placements_total",
                "Tasks assigned a node, by placement mode",
                &["mode"]
            )
            .expect("Failed to register placements_total"),

            unschedulable: register_int_counter!(
                "tarema_unschedulable_total",
                "Tasks left unscheduled because no node had room"
            )
            .expect("Failed to register unschedulable_total"),

            placement_candidates: register_histogram!(
                "tarema_placement_candidates",
                "Feasible nodes considered per placement decision",
                CANDIDATE_BUCKETS.to_vec()
            )
            .expect("Failed to register placement_candidates"),

            relabel_latency_seconds: register_histogram!(
                "tarema_relabel_latency_seconds",
                "Time spent handling one termination, relabelling included",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register relabel_latency_seconds"),

            pass_latency_seconds: register_histogram!(
                "tarema_scheduling_pass_latency_seconds",
                "Time spent planning one scheduling pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register scheduling_pass_latency_seconds"),

            labelled_nodes: register_int_gauge!(
                "tarema_labelled_nodes",
                "Nodes in the current node labelling"
            )
            .expect("Failed to register labelled_nodes"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn inc_observations(&self) {
        self.inner().observations_accepted.inc();
    }

    pub fn inc_duplicates(&self) {
        self.inner().observations_duplicate.inc();
    }

    pub fn inc_trace_errors(&self) {
        self.inner().trace_errors.inc();
    }

    pub fn inc_node_relabels(&self) {
        self.inner().node_relabels.inc();
    }

    pub fn inc_task_relabels(&self) {
        self.inner().task_relabels.inc();
    }

    pub fn inc_estimator_not_ready(&self) {
        self.inner().estimator_not_ready.inc();
    }

    /// Record one placement and the number of nodes it was chosen among
    pub fn record_placement(&self, mode: &str, candidates: usize) {
        let inner = self.inner();
        inner.placements.with_label_values(&[mode]).inc();
        inner.placement_candidates.observe(candidates as f64);
    }

    pub fn inc_unschedulable(&self, count: usize) {
        self.inner().unschedulable.inc_by(count as u64);
    }

    pub fn observe_relabel_latency(&self, duration_secs: f64) {
        self.inner().relabel_latency_seconds.observe(duration_secs);
    }

    pub fn observe_pass_latency(&self, duration_secs: f64) {
        self.inner().pass_latency_seconds.observe(duration_secs);
    }

    pub fn set_labelled_nodes(&self, count: usize) {
        self.inner().labelled_nodes.set(count as i64);
    }
}

/// Structured logger for scheduler events
///
/// Every event carries an `event` field and the workflow execution it
/// belongs to.
#[derive(Clone)]
pub struct StructuredLogger {
    execution: String,
}

impl StructuredLogger {
    pub fn new(execution: impl Into<String>) -> Self {
        Self {
            execution: execution.into(),
        }
    }

    pub fn log_startup(&self, version: &str, estimator: &str, mode: &str) {
        info!(
            event = "scheduler_started",
            execution = %self.execution,
            version = %version,
            estimator = %estimator,
            labelling_mode = %mode,
            "Tarema scheduler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            execution = %self.execution,
            reason = %reason,
            "Tarema scheduler shutting down"
        );
    }

    pub fn log_node_labels(&self, revision: u64, nodes: usize, max_label: &str) {
        info!(
            event = "node_labels_recomputed",
            execution = %self.execution,
            revision = revision,
            nodes = nodes,
            max_label = %max_label,
            "Node labels recomputed"
        );
    }

    pub fn log_task_labels(&self, revision: u64, tasks: usize) {
        info!(
            event = "task_labels_recomputed",
            execution = %self.execution,
            revision = revision,
            tasks = tasks,
            "Task labels recomputed"
        );
    }

    pub fn log_estimator_not_ready(&self, estimator: &str) {
        warn!(
            event = "estimator_not_ready",
            execution = %self.execution,
            estimator = %estimator,
            "Estimator not ready, keeping previous node labels"
        );
    }

    pub fn log_placement(
        &self,
        task_id: &str,
        task: &str,
        node: &str,
        mode: &str,
        candidates: usize,
        distance: Option<u32>,
    ) {
        info!(
            event = "task_placed",
            execution = %self.execution,
            task_id = %task_id,
            task = %task,
            node = %node,
            mode = %mode,
            candidates = candidates,
            distance = ?distance,
            "Placed task"
        );
    }

    pub fn log_unschedulable(&self, task_id: &str) {
        warn!(
            event = "task_unschedulable",
            execution = %self.execution,
            task_id = %task_id,
            "No node has room for task"
        );
    }

    pub fn log_estimator_fault(&self, estimator: &str) {
        error!(
            event = "estimator_fault",
            execution = %self.execution,
            estimator = %estimator,
            "Estimator faulted, node labels will no longer change"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_metrics_creation() {
        let metrics = SchedulerMetrics::new();

        metrics.inc_observations();
        metrics.inc_duplicates();
        metrics.inc_trace_errors();
        metrics.inc_node_relabels();
        metrics.inc_task_relabels();
        metrics.inc_estimator_not_ready();
        metrics.record_placement("warm", 3);
        metrics.inc_unschedulable(2);
        metrics.observe_relabel_latency(0.001);
        metrics.observe_pass_latency(0.002);
        metrics.set_labelled_nodes(4);

        // A second handle shares the same registration
        let again = SchedulerMetrics::new();
        again.record_placement("cold", 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("run-1");
        assert_eq!(logger.execution, "run-1");
    }
}

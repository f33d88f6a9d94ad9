//! Tarema engine
//!
//! One engine serves one workflow execution. Each task termination flows
//! into the observation store, then the node labeller, then the task
//! labeller. Scheduling passes read whatever labellings were last
//! published.

use crate::clustering::Clusterer;
use crate::config::TaremaConfig;
use crate::error::{Result, TaremaError};
use crate::estimator::{build_estimator, TaskSpecificEstimations};
use crate::export::CsvExporter;
use crate::health::{components, ComponentHealth};
use crate::labels::{
    load_benchmarks, LabellingMode, NodeLabeller, NodeLabels, NodeRelabel, TaskLabeller,
    TaskLabels,
};
use crate::models::{NodeState, PendingTask, ResourceObservation, TaskTermination};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::orchestrator::Orchestrator;
use crate::placement::{PlacementMode, PlacementPolicy, SchedulingPlan};
use crate::store::ObservationStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What handling one termination changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminationOutcome {
    /// False when the task instance had already been recorded
    pub accepted: bool,
    /// Revision of the node labelling published in response, if any
    pub node_labels_revision: Option<u64>,
    /// True when the estimator could not produce a ranking
    pub estimator_not_ready: bool,
    /// Revision of the task labelling published in response, if any
    pub task_labels_revision: Option<u64>,
}

/// Point-in-time summary of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub execution: String,
    pub labelling_mode: LabellingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimator: Option<String>,
    pub estimator_faulted: bool,
    pub observations: usize,
    pub placement_mode: PlacementMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_labels_revision: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_labels_revision: Option<u64>,
}

/// Online labelling and placement for one workflow execution
pub struct Tarema {
    execution: String,
    config: TaremaConfig,
    store: ObservationStore,
    node_labeller: NodeLabeller,
    task_labeller: TaskLabeller,
    placement: PlacementPolicy,
    exporter: Option<Mutex<CsvExporter>>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
    fault_reported: AtomicBool,
}

impl Tarema {
    /// Build an engine from configuration
    ///
    /// With a benchmark file nodes are labelled once from it; otherwise
    /// the configured estimator drives online labelling.
    pub fn new(execution: impl Into<String>, config: TaremaConfig) -> Result<Self> {
        let clusterer = Clusterer::new(config.clustering.clone());
        let node_labeller = match &config.benchmark_file {
            Some(path) => {
                let benchmarks = load_benchmarks(path)?;
                if benchmarks.is_empty() {
                    return Err(TaremaError::Config(format!(
                        "benchmark file {} lists no nodes",
                        path.display()
                    )));
                }
                NodeLabeller::from_benchmarks(&benchmarks, clusterer)
            }
            None => NodeLabeller::online(build_estimator(&config)?, clusterer),
        };
        let node_labeller = node_labeller.with_node_weights(config.node_weights.clone());
        Ok(Self::with_node_labeller(execution, config, node_labeller))
    }

    /// Build an engine around an existing node labeller
    pub fn with_node_labeller(
        execution: impl Into<String>,
        config: TaremaConfig,
        node_labeller: NodeLabeller,
    ) -> Self {
        let execution = execution.into();
        let metrics = SchedulerMetrics::new();
        if let Some(labels) = node_labeller.current() {
            metrics.set_labelled_nodes(labels.labels.len());
        }
        Self {
            logger: StructuredLogger::new(execution.clone()),
            execution,
            store: ObservationStore::new(),
            task_labeller: TaskLabeller::new(config.task_labels.clone()),
            placement: PlacementPolicy::new(config.speed_derivation),
            node_labeller,
            config,
            exporter: None,
            metrics,
            fault_reported: AtomicBool::new(false),
        }
    }

    /// Append labelling history to CSV files
    ///
    /// Labels published before this call (benchmark mode) are written
    /// right away.
    pub fn with_exporter(mut self, mut exporter: CsvExporter) -> Self {
        if let Some(labels) = self.node_labeller.current() {
            if let Err(e) = exporter.record_node_labels(&labels) {
                warn!(error = %e, "Failed to export node labels");
            }
        }
        self.exporter = Some(Mutex::new(exporter));
        self
    }

    pub fn config(&self) -> &TaremaConfig {
        &self.config
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    pub fn node_labels(&self) -> Option<Arc<NodeLabels>> {
        self.node_labeller.current()
    }

    pub fn task_labels(&self) -> Option<Arc<TaskLabels>> {
        self.task_labeller.current()
    }

    /// General and per-task-type node rankings (online mode only)
    pub fn estimations(&self) -> Option<TaskSpecificEstimations> {
        self.node_labeller.task_specific_estimations()
    }

    /// Record a finished task instance and relabel
    ///
    /// Invalid trace records are rejected before anything is stored.
    /// A repeated task instance is accepted silently and changes nothing.
    pub fn on_task_terminated(&self, termination: &TaskTermination) -> Result<TerminationOutcome> {
        let start = Instant::now();

        let observation = ResourceObservation::from_trace(
            termination.task_instance_id.clone(),
            termination.node.clone(),
            termination.task.clone(),
            &termination.trace,
        )
        .map_err(|e| {
            self.metrics.inc_trace_errors();
            warn!(
                task_instance = %termination.task_instance_id,
                error = %e,
                "Rejected task termination"
            );
            TaremaError::Trace(e)
        })?;

        if !self.store.save(observation.clone()) {
            self.metrics.inc_duplicates();
            return Ok(TerminationOutcome::default());
        }
        self.metrics.inc_observations();

        let mut outcome = TerminationOutcome {
            accepted: true,
            ..Default::default()
        };

        match self.node_labeller.add_observation(&observation.to_observation()) {
            NodeRelabel::Relabelled(labels) => {
                outcome.node_labels_revision = Some(labels.revision);
                self.publish_node_labels(&labels);
            }
            NodeRelabel::NotReady => {
                outcome.estimator_not_ready = true;
                self.metrics.inc_estimator_not_ready();
                self.check_estimator_fault();
            }
            NodeRelabel::Unchanged => {}
        }

        if let Some(node_labels) = self.node_labeller.current() {
            if let Some(task_labels) = self.task_labeller.recompute(&self.store, &node_labels) {
                outcome.task_labels_revision = Some(task_labels.revision);
                self.publish_task_labels(&task_labels);
            }
        }

        self.metrics
            .observe_relabel_latency(start.elapsed().as_secs_f64());
        debug!(
            task_instance = %termination.task_instance_id,
            node = %termination.node,
            task = %termination.task,
            ?outcome,
            "Handled task termination"
        );
        Ok(outcome)
    }

    fn publish_node_labels(&self, labels: &NodeLabels) {
        self.metrics.inc_node_relabels();
        self.metrics.set_labelled_nodes(labels.labels.len());
        self.logger.log_node_labels(
            labels.revision,
            labels.labels.len(),
            &labels.max_label.to_string(),
        );
        self.export(|exporter| exporter.record_node_labels(labels));
    }

    fn publish_task_labels(&self, labels: &TaskLabels) {
        self.metrics.inc_task_relabels();
        self.logger
            .log_task_labels(labels.revision, labels.labels.len());
        self.export(|exporter| exporter.record_task_labels(labels));
    }

    fn export(&self, write: impl FnOnce(&mut CsvExporter) -> anyhow::Result<()>) {
        if let Some(exporter) = &self.exporter {
            let mut exporter = exporter.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = write(&mut exporter) {
                warn!(error = %e, "Failed to export labelling");
            }
        }
    }

    fn check_estimator_fault(&self) {
        let Some(estimator) = self.node_labeller.estimator() else {
            return;
        };
        if estimator.is_faulted() {
            if !self.fault_reported.swap(true, Ordering::SeqCst) {
                self.logger.log_estimator_fault(estimator.name());
            }
        } else {
            self.logger.log_estimator_not_ready(estimator.name());
        }
    }

    /// Decide placements for pending tasks without binding anything
    pub fn plan(&self, nodes: &[NodeState], pending: &[PendingTask]) -> SchedulingPlan {
        let start = Instant::now();
        let node_labels = self.node_labeller.current();
        let task_labels = self.task_labeller.current();

        let plan = self
            .placement
            .plan(nodes, pending, node_labels.as_deref(), task_labels.as_deref());

        for alignment in &plan.assignments {
            self.metrics
                .record_placement(alignment.mode.as_str(), alignment.candidates);
            self.logger.log_placement(
                &alignment.task_id,
                &alignment.task,
                &alignment.node,
                alignment.mode.as_str(),
                alignment.candidates,
                alignment.distance,
            );
        }
        for task_id in &plan.unscheduled {
            self.logger.log_unschedulable(task_id);
        }
        self.metrics.inc_unschedulable(plan.unscheduled.len());
        self.metrics
            .observe_pass_latency(start.elapsed().as_secs_f64());
        plan
    }

    /// List, plan and bind once against an orchestrator
    ///
    /// A failed bind moves the task back to the unscheduled list; it will
    /// be retried on the next pass.
    pub async fn run_pass(&self, orchestrator: &dyn Orchestrator) -> Result<SchedulingPlan> {
        let nodes = orchestrator.list_nodes().await?;
        let pending = orchestrator.list_unscheduled().await?;
        if pending.is_empty() {
            return Ok(SchedulingPlan {
                mode: self.placement_mode(),
                assignments: Vec::new(),
                unscheduled: Vec::new(),
            });
        }

        let mut plan = self.plan(&nodes, &pending);
        let mut bound = Vec::with_capacity(plan.assignments.len());
        for alignment in plan.assignments.drain(..) {
            match orchestrator.bind(&alignment.task_id, &alignment.node).await {
                Ok(()) => bound.push(alignment),
                Err(e) => {
                    warn!(
                        task_id = %alignment.task_id,
                        node = %alignment.node,
                        error = %e,
                        "Bind failed"
                    );
                    plan.unscheduled.push(alignment.task_id);
                }
            }
        }
        plan.assignments = bound;

        info!(
            mode = %plan.mode,
            bound = plan.assignments.len(),
            unscheduled = plan.unscheduled.len(),
            "Scheduling pass complete"
        );
        Ok(plan)
    }

    fn placement_mode(&self) -> PlacementMode {
        match self.node_labeller.current() {
            Some(labels) if !labels.is_empty() => PlacementMode::Warm,
            _ => PlacementMode::Cold,
        }
    }

    pub fn status(&self) -> EngineStatus {
        let estimator = self.node_labeller.estimator();
        EngineStatus {
            execution: self.execution.clone(),
            labelling_mode: self.node_labeller.mode(),
            estimator: estimator.map(|e| e.name().to_string()),
            estimator_faulted: estimator.map_or(false, |e| e.is_faulted()),
            observations: self.store.len(),
            placement_mode: self.placement_mode(),
            node_labels_revision: self.node_labels().map(|l| l.revision),
            task_labels_revision: self.task_labels().map(|l| l.revision),
        }
    }

    /// Health of each engine component
    pub fn component_health(&self) -> Vec<(&'static str, ComponentHealth)> {
        let status = self.status();

        let estimator = if status.labelling_mode == LabellingMode::Benchmark {
            ComponentHealth::healthy()
        } else if status.estimator_faulted {
            ComponentHealth::unhealthy("estimator faulted")
        } else if status.node_labels_revision.is_none() {
            ComponentHealth::degraded(format!(
                "waiting for estimations covering {} nodes",
                self.config.expected_nodes
            ))
        } else {
            ComponentHealth::healthy()
        };

        let node_labeller = match status.node_labels_revision {
            Some(_) => ComponentHealth::healthy(),
            None => ComponentHealth::degraded("no node labels yet"),
        };

        let task_labeller = match status.task_labels_revision {
            Some(_) => ComponentHealth::healthy(),
            None => ComponentHealth::degraded("no task labels yet"),
        };

        vec![
            (components::ESTIMATOR, estimator),
            (components::NODE_LABELLER, node_labeller),
            (components::TASK_LABELLER, task_labeller),
            (components::PLACEMENT, ComponentHealth::healthy()),
        ]
    }
}

//! Node labelling
//!
//! Benchmark mode labels nodes once from fixed per-dimension benchmark
//! values. Online mode relabels from a node speed estimator after every
//! observation and keeps the previous labels while the estimator is not
//! ready. Either way the result is published as one immutable snapshot.

use super::GroupWeights;
use crate::clustering::{ClusterPoint, Clusterer};
use crate::config::SpeedDerivation;
use crate::error::Result;
use crate::estimator::{NodeEstimations, NodeSpeedEstimator, TaskSpecificEstimations};
use crate::models::{Dimension, LabelVector, Observation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// Benchmark results of one node, higher meaning faster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkScores {
    pub cpu: f64,
    pub mem: f64,
    pub read: f64,
    pub write: f64,
}

impl BenchmarkScores {
    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Mem => self.mem,
            Dimension::Read => self.read,
            Dimension::Write => self.write,
        }
    }
}

/// Load a JSON map of node name to benchmark scores
pub fn load_benchmarks(path: &Path) -> Result<BTreeMap<String, BenchmarkScores>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabellingMode {
    Benchmark,
    Online,
}

impl LabellingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LabellingMode::Benchmark => "benchmark",
            LabellingMode::Online => "online",
        }
    }
}

impl std::fmt::Display for LabellingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete node labelling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLabels {
    pub mode: LabellingMode,
    /// Increases with every published labelling
    pub revision: u64,
    pub labels: BTreeMap<String, LabelVector>,
    /// Highest label in use per dimension
    pub max_label: LabelVector,
    /// Estimator scores the labels were derived from (online mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimations: Option<NodeEstimations>,
    pub group_weights: BTreeMap<Dimension, GroupWeights>,
    /// Mean silhouette of the chosen clustering per dimension
    pub silhouette: BTreeMap<Dimension, f64>,
}

impl NodeLabels {
    pub fn label(&self, node: &str) -> Option<LabelVector> {
        self.labels.get(node).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn group_weights(&self, dimension: Dimension) -> Option<&GroupWeights> {
        self.group_weights.get(&dimension)
    }

    /// Single speed scalar of a node for placement tie-breaks
    pub fn speed(&self, node: &str, derivation: SpeedDerivation) -> Option<f64> {
        let label = self.label(node)?;
        let speed = match derivation {
            SpeedDerivation::Sum => label.sum() as f64,
            SpeedDerivation::Estimation => self
                .estimations
                .as_ref()
                .and_then(|e| e.get(node).copied())
                .unwrap_or(label.sum() as f64),
            SpeedDerivation::Dimension(dimension) => label.get(dimension) as f64,
        };
        Some(speed)
    }
}

/// Result of asking the labeller to recompute
#[derive(Debug, Clone)]
pub enum NodeRelabel {
    /// A new labelling was published
    Relabelled(Arc<NodeLabels>),
    /// The estimator is not ready; the previous labelling stays
    NotReady,
    /// Benchmark labels never change
    Unchanged,
}

enum LabelSource {
    Benchmark,
    Online(Box<dyn NodeSpeedEstimator>),
}

/// Produces and publishes node label snapshots
pub struct NodeLabeller {
    source: LabelSource,
    clusterer: Clusterer,
    node_weights: BTreeMap<String, f64>,
    current: RwLock<Option<Arc<NodeLabels>>>,
    recompute_lock: Mutex<()>,
    revision: AtomicU64,
}

impl NodeLabeller {
    /// Label nodes once from benchmark scores
    pub fn from_benchmarks(
        benchmarks: &BTreeMap<String, BenchmarkScores>,
        clusterer: Clusterer,
    ) -> Self {
        let labeller = Self::with_source(LabelSource::Benchmark, clusterer);

        let mut labels: BTreeMap<String, LabelVector> = benchmarks
            .keys()
            .map(|node| (node.clone(), LabelVector::default()))
            .collect();
        let mut max_label = LabelVector::default();
        let mut group_weights = BTreeMap::new();
        let mut silhouette = BTreeMap::new();

        for dimension in Dimension::ALL {
            let points: Vec<ClusterPoint> = benchmarks
                .iter()
                .map(|(node, scores)| ClusterPoint::new(node.clone(), scores.get(dimension)))
                .collect();
            let clustering = labeller.clusterer.best_clustering(&points);
            let dimension_labels = clustering.labels();
            let dimension_max = clustering.max_label().unwrap_or(0);

            for (node, label) in &dimension_labels {
                if let Some(vector) = labels.get_mut(node) {
                    set_dimension(vector, dimension, *label);
                }
            }
            set_dimension(&mut max_label, dimension, dimension_max);
            if let Some(weights) = labeller.group_weights_for(dimension_max, &dimension_labels) {
                group_weights.insert(dimension, weights);
            }
            if let Some(score) = clustering.score {
                silhouette.insert(dimension, score);
            }
        }

        if !labels.is_empty() {
            info!(nodes = labels.len(), max_label = %max_label, "Labelled nodes from benchmarks");
            labeller.publish(NodeLabels {
                mode: LabellingMode::Benchmark,
                revision: 0,
                labels,
                max_label,
                estimations: None,
                group_weights,
                silhouette,
            });
        }
        labeller
    }

    /// Relabel nodes from an estimator as observations arrive
    pub fn online(estimator: Box<dyn NodeSpeedEstimator>, clusterer: Clusterer) -> Self {
        Self::with_source(LabelSource::Online(estimator), clusterer)
    }

    fn with_source(source: LabelSource, clusterer: Clusterer) -> Self {
        Self {
            source,
            clusterer,
            node_weights: BTreeMap::new(),
            current: RwLock::new(None),
            recompute_lock: Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    /// Size label groups by per-node weight instead of node count
    ///
    /// A labelling already published (benchmark mode) gets its group
    /// weights recomputed in place, keeping its revision.
    pub fn with_node_weights(mut self, node_weights: BTreeMap<String, f64>) -> Self {
        self.node_weights = node_weights;
        if let Some(current) = self.current() {
            let mut labels = NodeLabels::clone(&current);
            labels.group_weights = Dimension::ALL
                .iter()
                .filter_map(|d| {
                    let per_node = labels
                        .labels
                        .iter()
                        .map(|(node, vector)| (node.clone(), vector.get(*d)))
                        .collect();
                    self.group_weights_for(labels.max_label.get(*d), &per_node)
                        .map(|w| (*d, w))
                })
                .collect();
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(labels));
        }
        self
    }

    fn group_weights_for(
        &self,
        max_label: u32,
        labels: &BTreeMap<String, u32>,
    ) -> Option<GroupWeights> {
        if self.node_weights.is_empty() {
            GroupWeights::for_labels(max_label, labels)
        } else {
            GroupWeights::for_labels_weighted(max_label, labels, |node| {
                self.node_weights.get(node).copied().unwrap_or(1.0)
            })
        }
    }

    pub fn mode(&self) -> LabellingMode {
        match self.source {
            LabelSource::Benchmark => LabellingMode::Benchmark,
            LabelSource::Online(_) => LabellingMode::Online,
        }
    }

    pub fn estimator(&self) -> Option<&dyn NodeSpeedEstimator> {
        match &self.source {
            LabelSource::Benchmark => None,
            LabelSource::Online(estimator) => Some(estimator.as_ref()),
        }
    }

    /// Latest published labelling
    pub fn current(&self) -> Option<Arc<NodeLabels>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    pub fn task_specific_estimations(&self) -> Option<TaskSpecificEstimations> {
        self.estimator()?.task_specific_estimations()
    }

    /// Feed one observation to the estimator and relabel
    pub fn add_observation(&self, observation: &Observation) -> NodeRelabel {
        let _guard = self
            .recompute_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &self.source {
            LabelSource::Benchmark => NodeRelabel::Unchanged,
            LabelSource::Online(estimator) => {
                estimator.add_data_point(observation);
                self.relabel_from(estimator.as_ref())
            }
        }
    }

    /// Relabel from the current estimator state
    pub fn recompute(&self) -> NodeRelabel {
        let _guard = self
            .recompute_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &self.source {
            LabelSource::Benchmark => NodeRelabel::Unchanged,
            LabelSource::Online(estimator) => self.relabel_from(estimator.as_ref()),
        }
    }

    fn relabel_from(&self, estimator: &dyn NodeSpeedEstimator) -> NodeRelabel {
        let Some(estimations) = estimator.estimations() else {
            debug!(estimator = estimator.name(), "Estimator not ready, keeping node labels");
            return NodeRelabel::NotReady;
        };

        let points: Vec<ClusterPoint> = estimations
            .iter()
            .map(|(node, score)| ClusterPoint::new(node.clone(), *score))
            .collect();
        let clustering = self.clusterer.best_clustering(&points);
        let node_labels = clustering.labels();
        let max = clustering.max_label().unwrap_or(0);

        let weights = self.group_weights_for(max, &node_labels);
        let group_weights = Dimension::ALL
            .iter()
            .filter_map(|d| weights.clone().map(|w| (*d, w)))
            .collect();
        let silhouette = clustering
            .score
            .map(|score| Dimension::ALL.iter().map(|d| (*d, score)).collect())
            .unwrap_or_default();

        let labels = node_labels
            .into_iter()
            .map(|(node, label)| (node, LabelVector::uniform(label)))
            .collect();

        let snapshot = self.publish(NodeLabels {
            mode: LabellingMode::Online,
            revision: 0,
            labels,
            max_label: LabelVector::uniform(max),
            estimations: Some(estimations),
            group_weights,
            silhouette,
        });
        NodeRelabel::Relabelled(snapshot)
    }

    fn publish(&self, mut labels: NodeLabels) -> Arc<NodeLabels> {
        labels.revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(labels);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        debug!(revision = snapshot.revision, "Published node labels");
        snapshot
    }
}

fn set_dimension(vector: &mut LabelVector, dimension: Dimension, label: u32) {
    match dimension {
        Dimension::Cpu => vector.cpu = label,
        Dimension::Mem => vector.mem = label,
        Dimension::Read => vector.read = label,
        Dimension::Write => vector.write = label,
    }
}

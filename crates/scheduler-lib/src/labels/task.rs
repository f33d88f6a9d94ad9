//! Task labelling by weighted percentile buckets
//!
//! Along each dimension the range of a metric over all recorded task
//! instances is split into buckets sized by the node group weights, so a
//! label group holding half the nodes also spans half the metric range.
//! A task type's label is the bucket its mean falls into. Labels are
//! 0-based (bucket number minus one) and bucket upper bounds are inclusive.

use super::{GroupWeights, NodeLabels};
use crate::config::{MetricTransform, TaskLabelConfig};
use crate::models::{Dimension, LabelVector, ResourceObservation};
use crate::store::ObservationStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// 1-based bucket whose inclusive upper boundary first covers `value`
///
/// Values below `min` clamp to bucket 1 and values above the last
/// boundary clamp to the last bucket, both with a warning.
pub fn bucket(value: f64, min: f64, boundaries: &[f64]) -> usize {
    if boundaries.is_empty() {
        return 1;
    }
    if value < min {
        warn!(value, min, "Value below the observed minimum, clamping to first bucket");
        return 1;
    }
    match boundaries.iter().position(|b| value <= *b) {
        Some(index) => index + 1,
        None => {
            warn!(
                value,
                max = boundaries[boundaries.len() - 1],
                "Value above the last boundary, clamping to last bucket"
            );
            boundaries.len()
        }
    }
}

/// Label every task type along one dimension
///
/// Task types with fewer than `min_observations` observations stay
/// unlabelled.
pub fn percentile_labels(
    by_task: &BTreeMap<String, Vec<ResourceObservation>>,
    dimension: Dimension,
    transform: MetricTransform,
    weights: &GroupWeights,
    min_observations: usize,
) -> BTreeMap<String, u32> {
    let values = by_task
        .values()
        .flatten()
        .map(|o| transform.apply(o.metric(dimension)));
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return BTreeMap::new();
    }

    let boundaries = weights.boundaries(min, max);
    by_task
        .iter()
        .filter(|(_, observations)| {
            !observations.is_empty() && observations.len() >= min_observations
        })
        .map(|(task, observations)| {
            let mean = observations.iter().map(|o| o.metric(dimension)).sum::<f64>()
                / observations.len() as f64;
            let label = bucket(transform.apply(mean), min, &boundaries) - 1;
            (task.clone(), label as u32)
        })
        .collect()
}

/// One complete task labelling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLabels {
    pub revision: u64,
    /// Node labelling revision the buckets were sized from
    pub node_revision: u64,
    pub labels: BTreeMap<String, LabelVector>,
    pub max_label: LabelVector,
}

impl TaskLabels {
    pub fn label(&self, task: &str) -> Option<LabelVector> {
        self.labels.get(task).copied()
    }
}

/// Produces and publishes task label snapshots
pub struct TaskLabeller {
    config: TaskLabelConfig,
    current: RwLock<Option<Arc<TaskLabels>>>,
    recompute_lock: Mutex<()>,
    revision: AtomicU64,
}

impl TaskLabeller {
    pub fn new(config: TaskLabelConfig) -> Self {
        Self {
            config,
            current: RwLock::new(None),
            recompute_lock: Mutex::new(()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Option<Arc<TaskLabels>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Relabel all task types from the store using the node group weights
    ///
    /// Returns `None`, keeping the previous labelling, when the store is
    /// empty, the node labelling lacks weights for some dimension, or it is
    /// older than the one the current task labels were built from.
    pub fn recompute(
        &self,
        store: &ObservationStore,
        node_labels: &NodeLabels,
    ) -> Option<Arc<TaskLabels>> {
        let _guard = self
            .recompute_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = self.current() {
            if node_labels.revision < current.node_revision {
                debug!(
                    node_revision = node_labels.revision,
                    current = current.node_revision,
                    "Stale node labels, keeping task labels"
                );
                return None;
            }
        }

        let by_task = store.by_task();
        if by_task.is_empty() {
            return None;
        }

        let mut per_dimension = BTreeMap::new();
        for dimension in Dimension::ALL {
            let Some(weights) = node_labels.group_weights(dimension) else {
                debug!(dimension = %dimension, "No group weights, skipping task labelling");
                return None;
            };
            per_dimension.insert(
                dimension,
                percentile_labels(
                    &by_task,
                    dimension,
                    self.config.transform(dimension),
                    weights,
                    self.config.min_observations,
                ),
            );
        }

        // Only task types labelled along every dimension get a vector
        let labels: BTreeMap<String, LabelVector> = by_task
            .keys()
            .filter_map(|task| {
                let mut complete = true;
                let vector = LabelVector::from_fn(|d| match per_dimension[&d].get(task) {
                    Some(label) => *label,
                    None => {
                        complete = false;
                        0
                    }
                });
                complete.then(|| (task.clone(), vector))
            })
            .collect();

        let snapshot = Arc::new(TaskLabels {
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            node_revision: node_labels.revision,
            labels,
            max_label: node_labels.max_label,
        });
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabellingMode;

    fn observation(id: &str, task: &str, cpu: f64, read_bytes: u64) -> ResourceObservation {
        ResourceObservation {
            task_instance_id: id.to_string(),
            node: "n".to_string(),
            task: task.to_string(),
            cpu_percent: cpu,
            rss_bytes: 100,
            read_bytes,
            write_bytes: 0,
            rchar: 1,
            realtime_ms: 1,
        }
    }

    fn two_group_node_labels() -> NodeLabels {
        let weights = GroupWeights::uniform(2).unwrap();
        NodeLabels {
            mode: LabellingMode::Online,
            revision: 7,
            labels: BTreeMap::new(),
            max_label: LabelVector::uniform(1),
            estimations: None,
            group_weights: Dimension::ALL.iter().map(|d| (*d, weights.clone())).collect(),
            silhouette: BTreeMap::new(),
        }
    }

    #[test]
    fn test_bucket_boundary_is_inclusive() {
        let boundaries = GroupWeights::uniform(2).unwrap().boundaries(0.0, 100.0);
        assert_eq!(bucket(50.0, 0.0, &boundaries), 1);
        assert_eq!(bucket(50.001, 0.0, &boundaries), 2);
        assert_eq!(bucket(0.0, 0.0, &boundaries), 1);
        assert_eq!(bucket(100.0, 0.0, &boundaries), 2);
    }

    #[test]
    fn test_bucket_clamps() {
        let boundaries = vec![10.0, 20.0, 30.0];
        assert_eq!(bucket(-5.0, 0.0, &boundaries), 1);
        assert_eq!(bucket(31.0, 0.0, &boundaries), 3);
    }

    #[test]
    fn test_percentile_labels_from_task_means() {
        let by_task = BTreeMap::from([
            (
                "half".to_string(),
                vec![observation("1", "half", 0.0, 0), observation("2", "half", 100.0, 0)],
            ),
            ("above".to_string(), vec![observation("3", "above", 50.001, 0)]),
        ]);
        let weights = GroupWeights::uniform(2).unwrap();
        let labels =
            percentile_labels(&by_task, Dimension::Cpu, MetricTransform::Linear, &weights, 1);

        assert_eq!(labels["half"], 0);
        assert_eq!(labels["above"], 1);

        let strict =
            percentile_labels(&by_task, Dimension::Cpu, MetricTransform::Linear, &weights, 2);
        assert!(strict.contains_key("half"));
        assert!(!strict.contains_key("above"));
    }

    #[test]
    fn test_log_transform_reduces_skew() {
        let by_task = BTreeMap::from([
            ("tiny".to_string(), vec![observation("1", "tiny", 0.0, 10)]),
            ("medium".to_string(), vec![observation("2", "medium", 0.0, 100_000)]),
            ("huge".to_string(), vec![observation("3", "huge", 0.0, 10_000_000)]),
        ]);
        let weights = GroupWeights::uniform(2).unwrap();

        let linear =
            percentile_labels(&by_task, Dimension::Read, MetricTransform::Linear, &weights, 1);
        assert_eq!(linear["medium"], 0);

        let log = percentile_labels(&by_task, Dimension::Read, MetricTransform::Log, &weights, 1);
        assert_eq!(log["tiny"], 0);
        assert_eq!(log["medium"], 1);
        assert_eq!(log["huge"], 1);
    }

    #[test]
    fn test_recompute_publishes_snapshot() {
        let store = ObservationStore::new();
        let labeller = TaskLabeller::new(TaskLabelConfig::default());
        let node_labels = two_group_node_labels();
        assert!(labeller.recompute(&store, &node_labels).is_none());

        store.save(observation("1", "light", 10.0, 0));
        store.save(observation("2", "heavy", 90.0, 0));
        let labels = labeller.recompute(&store, &node_labels).unwrap();

        assert_eq!(labels.revision, 1);
        assert_eq!(labels.node_revision, 7);
        assert_eq!(labels.label("light").unwrap().cpu, 0);
        assert_eq!(labels.label("heavy").unwrap().cpu, 1);
        assert_eq!(labeller.current().unwrap().revision, 1);
    }

    #[test]
    fn test_stale_node_labels_do_not_replace_newer_snapshot() {
        let store = ObservationStore::new();
        store.save(observation("1", "light", 10.0, 0));
        store.save(observation("2", "heavy", 90.0, 0));
        let labeller = TaskLabeller::new(TaskLabelConfig::default());

        let newer = two_group_node_labels();
        let mut older = two_group_node_labels();
        older.revision = 6;

        assert_eq!(labeller.recompute(&store, &newer).unwrap().node_revision, 7);
        assert!(labeller.recompute(&store, &older).is_none());
        assert_eq!(labeller.current().unwrap().node_revision, 7);
        assert_eq!(labeller.current().unwrap().revision, 1);

        // Same node revision still relabels as new observations arrive
        assert_eq!(labeller.recompute(&store, &newer).unwrap().revision, 2);
    }

    #[test]
    fn test_concurrent_recomputes_publish_in_revision_order() {
        let store = Arc::new(ObservationStore::new());
        store.save(observation("1", "light", 10.0, 0));
        store.save(observation("2", "heavy", 90.0, 0));
        let labeller = Arc::new(TaskLabeller::new(TaskLabelConfig::default()));
        let node_labels = Arc::new(two_group_node_labels());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (store, labeller, node_labels) =
                    (Arc::clone(&store), Arc::clone(&labeller), Arc::clone(&node_labels));
                std::thread::spawn(move || labeller.recompute(&store, &node_labels))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }

        assert_eq!(labeller.current().unwrap().revision, 8);
    }

    #[test]
    fn test_recompute_requires_group_weights() {
        let store = ObservationStore::new();
        store.save(observation("1", "light", 10.0, 0));
        let mut node_labels = two_group_node_labels();
        node_labels.group_weights.remove(&Dimension::Write);

        let labeller = TaskLabeller::new(TaskLabelConfig::default());
        assert!(labeller.recompute(&store, &node_labels).is_none());
        assert!(labeller.current().is_none());
    }
}

//! Label-distance placement policy
//!
//! Until node labels exist the policy runs in cold mode and spreads tasks
//! round-robin over nodes with room for them. Once labelled, each task goes
//! to the feasible node whose label vector is closest to the task's.
//! Within one pass tasks are placed one after the other and every placement
//! is subtracted from the node's free capacity before the next decision.

mod scoring;

pub use scoring::{compare_candidates, headroom, Candidate};

use crate::config::SpeedDerivation;
use crate::labels::{NodeLabels, TaskLabels};
use crate::models::{NodeState, PendingTask};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    Cold,
    Warm,
}

impl PlacementMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlacementMode::Cold => "cold",
            PlacementMode::Warm => "warm",
        }
    }
}

impl fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One placement decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    pub task_id: String,
    pub task: String,
    pub node: String,
    /// Number of feasible nodes the decision was made among
    pub candidates: usize,
    /// Label distance to the chosen node, for labelled tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<u32>,
    pub mode: PlacementMode,
}

/// Outcome of one scheduling pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingPlan {
    pub mode: PlacementMode,
    pub assignments: Vec<Alignment>,
    /// Ids of tasks no node had room for
    pub unscheduled: Vec<String>,
}

/// Greedy placement over label distance
#[derive(Debug, Default)]
pub struct PlacementPolicy {
    speed_derivation: SpeedDerivation,
    cursor: AtomicUsize,
}

impl PlacementPolicy {
    pub fn new(speed_derivation: SpeedDerivation) -> Self {
        Self {
            speed_derivation,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Decide a node for each pending task
    ///
    /// `nodes` carry the free capacity at the start of the pass. Warm mode
    /// applies when a non-empty node labelling is given.
    pub fn plan(
        &self,
        nodes: &[NodeState],
        pending: &[PendingTask],
        node_labels: Option<&NodeLabels>,
        task_labels: Option<&TaskLabels>,
    ) -> SchedulingPlan {
        let mut nodes = nodes.to_vec();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        match node_labels.filter(|labels| !labels.is_empty()) {
            Some(node_labels) => self.plan_warm(nodes, pending, node_labels, task_labels),
            None => self.plan_cold(nodes, pending),
        }
    }

    fn plan_cold(&self, mut nodes: Vec<NodeState>, pending: &[PendingTask]) -> SchedulingPlan {
        let mut ordered: Vec<&PendingTask> = pending.iter().collect();
        ordered.sort_by(|a, b| {
            a.unresolved_inputs
                .cmp(&b.unresolved_inputs)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut plan = SchedulingPlan {
            mode: PlacementMode::Cold,
            assignments: Vec::new(),
            unscheduled: Vec::new(),
        };

        for task in ordered {
            let feasible: Vec<usize> = (0..nodes.len())
                .filter(|i| nodes[*i].available.fits(&task.request))
                .collect();
            if feasible.is_empty() {
                plan.unscheduled.push(task.id.clone());
                continue;
            }

            let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
            let chosen = feasible[turn % feasible.len()];
            plan.assignments
                .push(assign(&mut nodes[chosen], task, feasible.len(), None, PlacementMode::Cold));
        }
        plan
    }

    fn plan_warm(
        &self,
        mut nodes: Vec<NodeState>,
        pending: &[PendingTask],
        node_labels: &NodeLabels,
        task_labels: Option<&TaskLabels>,
    ) -> SchedulingPlan {
        let task_label = |task: &PendingTask| task_labels.and_then(|labels| labels.label(&task.task));

        // Lightest expected tasks first; unlabelled ones last
        let mut ordered: Vec<&PendingTask> = pending.iter().collect();
        ordered.sort_by(|a, b| {
            let rank = |t: &PendingTask| task_label(t).map_or(u32::MAX, |l| l.min());
            rank(a).cmp(&rank(b)).then_with(|| a.id.cmp(&b.id))
        });

        let mut plan = SchedulingPlan {
            mode: PlacementMode::Warm,
            assignments: Vec::new(),
            unscheduled: Vec::new(),
        };

        for task in ordered {
            let feasible: Vec<usize> = (0..nodes.len())
                .filter(|i| nodes[*i].available.fits(&task.request))
                .collect();
            if feasible.is_empty() {
                plan.unscheduled.push(task.id.clone());
                continue;
            }

            let (chosen, distance) = match task_label(task) {
                Some(label) => {
                    let best = feasible
                        .iter()
                        .map(|i| {
                            let node = &nodes[*i];
                            let candidate = Candidate {
                                node: &node.name,
                                distance: node_labels
                                    .label(&node.name)
                                    .map_or(u32::MAX, |l| l.distance(&label)),
                                speed: node_labels
                                    .speed(&node.name, self.speed_derivation)
                                    .unwrap_or(f64::NEG_INFINITY),
                                headroom: headroom(node, &task.request),
                            };
                            (*i, candidate)
                        })
                        .min_by(|(_, a), (_, b)| compare_candidates(a, b));
                    match best {
                        Some((index, candidate)) => (index, Some(candidate.distance)),
                        None => continue,
                    }
                }
                None => {
                    let best = feasible.iter().copied().max_by(|a, b| {
                        headroom(&nodes[*a], &task.request)
                            .total_cmp(&headroom(&nodes[*b], &task.request))
                            .then_with(|| nodes[*b].name.cmp(&nodes[*a].name))
                    });
                    match best {
                        Some(index) => (index, None),
                        None => continue,
                    }
                }
            };

            plan.assignments.push(assign(
                &mut nodes[chosen],
                task,
                feasible.len(),
                distance,
                PlacementMode::Warm,
            ));
        }
        plan
    }
}

fn assign(
    node: &mut NodeState,
    task: &PendingTask,
    candidates: usize,
    distance: Option<u32>,
    mode: PlacementMode,
) -> Alignment {
    node.available = node.available.saturating_sub(&task.request);
    debug!(
        task_id = %task.id,
        task = %task.task,
        node = %node.name,
        candidates,
        mode = %mode,
        "Aligned task"
    );
    Alignment {
        task_id: task.id.clone(),
        task: task.task.clone(),
        node: node.name.clone(),
        candidates,
        distance,
        mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{GroupWeights, LabellingMode};
    use crate::models::{Dimension, LabelVector, Resources};
    use std::collections::BTreeMap;

    fn node(name: &str, cpu: u64, mem: u64) -> NodeState {
        NodeState::new(name, Resources::new(cpu, mem), Resources::new(4000, 4000))
    }

    fn task(id: &str, kind: &str, cpu: u64, mem: u64) -> PendingTask {
        PendingTask::new(id, kind, Resources::new(cpu, mem))
    }

    fn node_labels(entries: &[(&str, LabelVector)]) -> NodeLabels {
        let labels: BTreeMap<String, LabelVector> =
            entries.iter().map(|(n, l)| (n.to_string(), *l)).collect();
        NodeLabels {
            mode: LabellingMode::Benchmark,
            revision: 1,
            labels,
            max_label: LabelVector::uniform(2),
            estimations: None,
            group_weights: Dimension::ALL
                .iter()
                .filter_map(|d| GroupWeights::uniform(3).map(|w| (*d, w)))
                .collect(),
            silhouette: BTreeMap::new(),
        }
    }

    fn task_labels(entries: &[(&str, LabelVector)]) -> TaskLabels {
        TaskLabels {
            revision: 1,
            node_revision: 1,
            labels: entries.iter().map(|(n, l)| (n.to_string(), *l)).collect(),
            max_label: LabelVector::uniform(2),
        }
    }

    fn placed_on(plan: &SchedulingPlan, task_id: &str) -> Option<String> {
        plan.assignments
            .iter()
            .find(|a| a.task_id == task_id)
            .map(|a| a.node.clone())
    }

    #[test]
    fn test_cold_round_robin_by_priority() {
        let policy = PlacementPolicy::default();
        let nodes = vec![node("n2", 4000, 4000), node("n1", 4000, 4000)];
        let pending = vec![
            task("t-late", "sort", 100, 100).with_unresolved_inputs(3),
            task("t-first", "align", 100, 100),
            task("t-second", "align", 100, 100).with_unresolved_inputs(1),
        ];

        let plan = policy.plan(&nodes, &pending, None, None);
        assert_eq!(plan.mode, PlacementMode::Cold);
        let order: Vec<(&str, &str)> = plan
            .assignments
            .iter()
            .map(|a| (a.task_id.as_str(), a.node.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("t-first", "n1"), ("t-second", "n2"), ("t-late", "n1")]
        );
        assert!(plan.assignments.iter().all(|a| a.candidates == 2));
    }

    #[test]
    fn test_cold_skips_full_nodes() {
        let policy = PlacementPolicy::default();
        let nodes = vec![node("n1", 100, 100), node("n2", 4000, 4000)];
        let plan = policy.plan(&nodes, &[task("t1", "align", 500, 500)], None, None);

        assert_eq!(placed_on(&plan, "t1").as_deref(), Some("n2"));
        assert_eq!(plan.assignments[0].candidates, 1);
    }

    #[test]
    fn test_empty_node_labels_stay_cold() {
        let policy = PlacementPolicy::default();
        let labels = node_labels(&[]);
        let plan = policy.plan(
            &[node("n1", 4000, 4000)],
            &[task("t1", "align", 1, 1)],
            Some(&labels),
            None,
        );
        assert_eq!(plan.mode, PlacementMode::Cold);
    }

    #[test]
    fn test_warm_unknown_task_picks_most_headroom() {
        let policy = PlacementPolicy::default();
        let labels = node_labels(&[
            ("n1", LabelVector::uniform(0)),
            ("n2", LabelVector::uniform(2)),
        ]);
        let nodes = vec![node("n1", 4000, 3000), node("n2", 2000, 4000)];

        let plan = policy.plan(&nodes, &[task("t1", "new", 1000, 1000)], Some(&labels), None);
        assert_eq!(plan.mode, PlacementMode::Warm);
        assert_eq!(placed_on(&plan, "t1").as_deref(), Some("n1"));
        assert_eq!(plan.assignments[0].distance, None);
    }

    #[test]
    fn test_warm_distance_beats_speed_and_headroom() {
        let policy = PlacementPolicy::default();
        let labels = node_labels(&[
            ("close", LabelVector::uniform(0)),
            ("far", LabelVector::uniform(2)),
        ]);
        let tasks = task_labels(&[("light", LabelVector::uniform(0))]);
        let nodes = vec![node("close", 1000, 1000), node("far", 4000, 4000)];

        let plan = policy.plan(&nodes, &[task("t1", "light", 500, 500)], Some(&labels), Some(&tasks));
        assert_eq!(placed_on(&plan, "t1").as_deref(), Some("close"));
        assert_eq!(plan.assignments[0].distance, Some(0));
    }

    #[test]
    fn test_warm_equal_distance_prefers_speed() {
        let policy = PlacementPolicy::new(SpeedDerivation::Sum);
        let labels = node_labels(&[
            ("fast", LabelVector::new(2, 1, 0, 0)),
            ("slow", LabelVector::new(0, 1, 0, 0)),
        ]);
        let tasks = task_labels(&[("align", LabelVector::new(1, 1, 0, 0))]);
        // The slower node has more room; speed decides first
        let nodes = vec![node("fast", 1000, 1000), node("slow", 4000, 4000)];

        let plan = policy.plan(&nodes, &[task("t1", "align", 500, 500)], Some(&labels), Some(&tasks));
        assert_eq!(placed_on(&plan, "t1").as_deref(), Some("fast"));
        assert_eq!(plan.assignments[0].distance, Some(1));
    }

    #[test]
    fn test_warm_equal_speed_prefers_headroom() {
        let policy = PlacementPolicy::new(SpeedDerivation::Sum);
        let labels = node_labels(&[
            ("a", LabelVector::new(1, 1, 0, 0)),
            ("b", LabelVector::new(1, 1, 0, 0)),
        ]);
        let tasks = task_labels(&[("align", LabelVector::new(1, 1, 0, 0))]);
        let nodes = vec![node("a", 1000, 1000), node("b", 3000, 3000)];

        let plan = policy.plan(&nodes, &[task("t1", "align", 500, 500)], Some(&labels), Some(&tasks));
        assert_eq!(placed_on(&plan, "t1").as_deref(), Some("b"));
    }

    #[test]
    fn test_unlabelled_node_ranks_last() {
        let policy = PlacementPolicy::default();
        let labels = node_labels(&[("labelled", LabelVector::uniform(2))]);
        let tasks = task_labels(&[("align", LabelVector::uniform(0))]);
        let nodes = vec![node("labelled", 500, 500), node("new", 4000, 4000)];

        let plan = policy.plan(&nodes, &[task("t1", "align", 100, 100)], Some(&labels), Some(&tasks));
        assert_eq!(placed_on(&plan, "t1").as_deref(), Some("labelled"));
    }

    #[test]
    fn test_capacity_is_consumed_within_batch() {
        let policy = PlacementPolicy::default();
        let pending = vec![task("t1", "align", 2400, 2400), task("t2", "align", 2400, 2400)];

        let cold = policy.plan(&[node("only", 4000, 4000)], &pending, None, None);
        assert_eq!(cold.assignments.len(), 1);
        assert_eq!(cold.unscheduled.len(), 1);

        let labels = node_labels(&[("only", LabelVector::uniform(1))]);
        let tasks = task_labels(&[("align", LabelVector::uniform(1))]);
        let warm = policy.plan(&[node("only", 4000, 4000)], &pending, Some(&labels), Some(&tasks));
        assert_eq!(warm.assignments.len(), 1);
        assert_eq!(warm.unscheduled, vec!["t2".to_string()]);
    }

    #[test]
    fn test_warm_orders_light_tasks_first() {
        let policy = PlacementPolicy::default();
        let labels = node_labels(&[("only", LabelVector::uniform(1))]);
        let tasks = task_labels(&[
            ("heavy", LabelVector::new(2, 2, 1, 2)),
            ("light", LabelVector::new(0, 1, 1, 1)),
        ]);
        let pending = vec![
            task("a-unknown", "new", 3000, 3000),
            task("b-heavy", "heavy", 3000, 3000),
            task("c-light", "light", 3000, 3000),
        ];

        let plan = policy.plan(&[node("only", 4000, 4000)], &pending, Some(&labels), Some(&tasks));
        assert_eq!(placed_on(&plan, "c-light").as_deref(), Some("only"));
        assert_eq!(plan.unscheduled, vec!["b-heavy".to_string(), "a-unknown".to_string()]);
    }
}

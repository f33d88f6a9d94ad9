//! Node speed estimation from pairwise runtime ratios
//!
//! For every (task type, node) pair a regression line of runtime over
//! input size is fitted. Two nodes that ran the same task type on
//! overlapping input sizes are compared by the ratio of their lines'
//! averages over the overlap. Ratios from all task types are merged by
//! weight, gaps are bridged through chains of known ratios, and each
//! node's score is its geometric-mean speed relative to all nodes.

use super::matrix::{speed_scores, ClosedMatrix, RatioMatrix};
use super::regression::{Range, RegressionLine};
use super::{NodeEstimations, NodeSpeedEstimator, TaskSpecificEstimations};
use crate::models::Observation;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// Samples and fitted model of one admitted (task type, node) pair
#[derive(Debug, Clone, Default)]
struct PairModel {
    samples: Vec<(f64, f64)>,
    line: Option<RegressionLine>,
    range: Option<Range>,
}

impl PairModel {
    fn refit(&mut self) {
        self.line = RegressionLine::fit(&self.samples);
        self.range = Range::of(&self.samples);
    }

    fn count(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Debug, Clone, Default)]
struct TaskState {
    ratios: RatioMatrix,
    samples: usize,
}

#[derive(Debug, Default)]
struct EstimatorState {
    nodes: Vec<String>,
    node_index: HashMap<String, usize>,
    tasks: Vec<String>,
    task_index: HashMap<String, usize>,
    task_states: Vec<TaskState>,
    /// Keyed by (task index, node index)
    pairs: HashMap<(usize, usize), PairModel>,
    /// Samples of pairs not yet admitted, keyed by (task, node)
    pending: HashMap<(String, String), Vec<(f64, f64)>>,
    comparison_possible: Vec<Vec<bool>>,
}

impl EstimatorState {
    fn intern_node(&mut self, node: &str) -> usize {
        if let Some(index) = self.node_index.get(node) {
            return *index;
        }
        let index = self.nodes.len();
        self.nodes.push(node.to_string());
        self.node_index.insert(node.to_string(), index);

        let size = self.nodes.len();
        for task in self.task_states.iter_mut() {
            task.ratios.grow(size);
        }
        for row in self.comparison_possible.iter_mut() {
            row.resize(size, false);
        }
        self.comparison_possible.resize_with(size, || vec![false; size]);

        debug!(node = %node, index, "Discovered node");
        index
    }

    fn intern_task(&mut self, task: &str) -> usize {
        if let Some(index) = self.task_index.get(task) {
            return *index;
        }
        let index = self.tasks.len();
        self.tasks.push(task.to_string());
        self.task_index.insert(task.to_string(), index);
        self.task_states.push(TaskState {
            ratios: RatioMatrix::new(self.nodes.len()),
            samples: 0,
        });
        index
    }

    fn admitted_pair(&self, task: &str, node: &str) -> Option<(usize, usize)> {
        let t = *self.task_index.get(task)?;
        let n = *self.node_index.get(node)?;
        self.pairs.contains_key(&(t, n)).then_some((t, n))
    }

    /// Whether a pending pair may move into the regression-capable state
    fn may_admit(&self, task: &str, node: &str, samples: &[(f64, f64)]) -> bool {
        let first_target = samples[0].1;
        if samples.iter().all(|(_, y)| *y == first_target) {
            return false;
        }
        if !self.nodes.is_empty() {
            return true;
        }
        // Nothing known yet: wait for a second node on this task type
        self.pending
            .keys()
            .any(|(t, n)| t == task && n != node)
    }

    fn add(&mut self, observation: &Observation) {
        let sample = (observation.input_size, observation.target);

        if let Some((t, n)) = self.admitted_pair(&observation.task, &observation.node) {
            if let Some(pair) = self.pairs.get_mut(&(t, n)) {
                pair.samples.push(sample);
                pair.refit();
            }
            self.task_states[t].samples += 1;
            self.update_ratios(t, n);
            return;
        }

        let key = (observation.task.clone(), observation.node.clone());
        self.pending.entry(key.clone()).or_default().push(sample);

        let admit = self
            .pending
            .get(&key)
            .map(|samples| self.may_admit(&key.0, &key.1, samples))
            .unwrap_or(false);
        if !admit {
            debug!(
                node = %observation.node,
                task = %observation.task,
                "Buffering sample until the pair can be fitted"
            );
            return;
        }

        self.admit(key);
        self.flush_pending();
    }

    fn admit(&mut self, key: (String, String)) {
        let samples = self.pending.remove(&key).unwrap_or_default();
        let (task, node) = key;
        let n = self.intern_node(&node);
        let t = self.intern_task(&task);

        let mut pair = PairModel {
            samples,
            ..Default::default()
        };
        pair.refit();
        self.task_states[t].samples += pair.count();
        self.pairs.insert((t, n), pair);

        debug!(node = %node, task = %task, "Admitted pair");
        self.update_ratios(t, n);
    }

    /// Admit buffered pairs that were only waiting for a first known node
    fn flush_pending(&mut self) {
        let mut ready: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|((task, node), samples)| self.may_admit(task, node, samples))
            .map(|(key, _)| key.clone())
            .collect();
        ready.sort();
        for key in ready {
            self.admit(key);
        }
    }

    /// Recompute the ratio of node `n` against every comparable node for task `t`
    fn update_ratios(&mut self, t: usize, n: usize) {
        let Some(this) = self.pairs.get(&(t, n)) else {
            return;
        };
        let (Some(this_line), Some(this_range)) = (this.line, this.range) else {
            return;
        };
        let this_count = this.count() as u64;

        let others: Vec<(usize, RegressionLine, Range, u64)> = (0..self.nodes.len())
            .filter(|other| *other != n)
            .filter_map(|other| {
                let pair = self.pairs.get(&(t, other))?;
                Some((other, pair.line?, pair.range?, pair.count() as u64))
            })
            .collect();

        let ratios = &mut self.task_states[t].ratios;
        for (other, other_line, other_range, other_count) in others {
            let Some(overlap) = this_range.intersect(&other_range) else {
                ratios.clear(n, other);
                continue;
            };

            let this_avg = this_line.average_over(&overlap);
            let other_avg = other_line.average_over(&overlap);
            if this_avg == 0.0 || other_avg == 0.0 {
                ratios.clear(n, other);
                continue;
            }

            let log_ratio = (this_avg / other_avg).ln();
            if !log_ratio.is_finite() {
                ratios.clear(n, other);
                continue;
            }

            let weight = (this_count - 1) * (other_count - 1);
            ratios.set(n, other, log_ratio, weight);
            if weight > 0 {
                self.comparison_possible[n][other] = true;
                self.comparison_possible[other][n] = true;
            }
        }
    }

    fn accumulated(&self) -> Option<RatioMatrix> {
        match RatioMatrix::accumulate(
            self.task_states.iter().map(|t| &t.ratios),
            self.nodes.len(),
        ) {
            Ok(matrix) => Some(matrix),
            Err(e) => {
                error!(error = %e, "Accumulated ratio matrix is inconsistent");
                None
            }
        }
    }

    fn to_estimations(&self, closed: &ClosedMatrix) -> NodeEstimations {
        self.nodes
            .iter()
            .cloned()
            .zip(speed_scores(closed))
            .collect()
    }
}

/// In-process estimator built on transitive runtime ratios
pub struct TransitiveEstimator {
    expected_nodes: usize,
    task_threshold: usize,
    state: Mutex<EstimatorState>,
}

impl TransitiveEstimator {
    /// Create an estimator expecting `expected_nodes` distinct nodes
    pub fn new(expected_nodes: usize) -> Self {
        Self {
            expected_nodes,
            task_threshold: 3 * expected_nodes,
            state: Mutex::new(EstimatorState::default()),
        }
    }

    /// Override the sample count a task type needs for its own ranking
    pub fn with_task_threshold(mut self, threshold: usize) -> Self {
        self.task_threshold = threshold;
        self
    }

    fn state(&self) -> MutexGuard<'_, EstimatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Nodes admitted so far, in discovery order
    pub fn nodes(&self) -> Vec<String> {
        self.state().nodes.clone()
    }

    /// Task types admitted so far, in discovery order
    pub fn tasks(&self) -> Vec<String> {
        self.state().tasks.clone()
    }

    /// Whether two nodes were ever directly compared on some task type
    pub fn comparison_possible(&self, a: &str, b: &str) -> bool {
        let state = self.state();
        match (state.node_index.get(a), state.node_index.get(b)) {
            (Some(i), Some(j)) => state.comparison_possible[*i][*j],
            _ => false,
        }
    }

    /// Cross-task weighted average of all per-task ratio matrices
    pub fn accumulated_ratios(&self) -> Option<RatioMatrix> {
        self.state().accumulated()
    }

    /// Ratio matrix of a single task type
    pub fn task_ratios(&self, task: &str) -> Option<RatioMatrix> {
        let state = self.state();
        let t = *state.task_index.get(task)?;
        Some(state.task_states[t].ratios.clone())
    }
}

impl NodeSpeedEstimator for TransitiveEstimator {
    fn name(&self) -> &'static str {
        "transitive"
    }

    fn add_data_point(&self, observation: &Observation) {
        if !observation.input_size.is_finite() || !observation.target.is_finite() {
            warn!(
                node = %observation.node,
                task = %observation.task,
                "Ignoring non-finite observation"
            );
            return;
        }
        self.state().add(observation);
    }

    fn estimations(&self) -> Option<NodeEstimations> {
        let state = self.state();
        if state.nodes.len() < self.expected_nodes {
            debug!(
                known = state.nodes.len(),
                expected = self.expected_nodes,
                "Not all nodes reported yet"
            );
            return None;
        }
        let closed = state.accumulated()?.transitive_closure()?;
        Some(state.to_estimations(&closed))
    }

    fn task_specific_estimations(&self) -> Option<TaskSpecificEstimations> {
        let general = self.estimations()?;
        let state = self.state();

        let mut per_task = BTreeMap::new();
        for (task, task_state) in state.tasks.iter().zip(&state.task_states) {
            if task_state.samples < self.task_threshold {
                continue;
            }
            if let Some(closed) = task_state.ratios.transitive_closure() {
                per_task.insert(task.clone(), state.to_estimations(&closed));
            }
        }

        Some(TaskSpecificEstimations { general, per_task })
    }
}

use super::{NodeEstimations, NodeSpeedEstimator};
use crate::models::Observation;

/// Estimator that always reports a fixed, precomputed ranking
///
/// Observations are ignored. The ranking only counts as ready once it
/// covers the expected number of nodes.
#[derive(Debug, Clone)]
pub struct ConstantEstimator {
    estimations: NodeEstimations,
    expected_nodes: usize,
}

impl ConstantEstimator {
    pub fn new(estimations: NodeEstimations, expected_nodes: usize) -> Self {
        Self {
            estimations,
            expected_nodes,
        }
    }
}

impl NodeSpeedEstimator for ConstantEstimator {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn add_data_point(&self, _observation: &Observation) {}

    fn estimations(&self) -> Option<NodeEstimations> {
        if self.estimations.is_empty() || self.estimations.len() < self.expected_nodes {
            return None;
        }
        Some(self.estimations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(entries: &[(&str, f64)]) -> NodeEstimations {
        entries.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn test_ready_when_covering_expected_nodes() {
        let estimator = ConstantEstimator::new(scores(&[("a", 1.0), ("b", 2.0)]), 2);
        estimator.add_data_point(&Observation::new("c", "align", 1.0, 1.0));
        assert_eq!(estimator.estimations().unwrap().len(), 2);
    }

    #[test]
    fn test_not_ready_when_missing_nodes() {
        assert!(ConstantEstimator::new(scores(&[("a", 1.0)]), 3).estimations().is_none());
        assert!(ConstantEstimator::new(scores(&[]), 0).estimations().is_none());
    }
}

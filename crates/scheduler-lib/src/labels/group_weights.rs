use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share of total node weight held by each label group
///
/// Entry `i` is the summed weight of nodes labelled `i` divided by the
/// summed weight of all labelled nodes, so entries add up to one. Nodes
/// whose label exceeds `max_label` are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWeights(Vec<f64>);

impl GroupWeights {
    /// Weights with every node counting the same
    pub fn for_labels(max_label: u32, labels: &BTreeMap<String, u32>) -> Option<Self> {
        Self::for_labels_weighted(max_label, labels, |_| 1.0)
    }

    /// Weights with a per-node weight, e.g. its capacity
    ///
    /// Returns `None` if no node is labelled or the total weight is not
    /// positive.
    pub fn for_labels_weighted(
        max_label: u32,
        labels: &BTreeMap<String, u32>,
        node_weight: impl Fn(&str) -> f64,
    ) -> Option<Self> {
        if labels.is_empty() {
            return None;
        }

        let mut weights = vec![0.0; max_label as usize + 1];
        for (node, label) in labels {
            if let Some(slot) = weights.get_mut(*label as usize) {
                *slot += node_weight(node).max(0.0);
            }
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return None;
        }
        weights.iter_mut().for_each(|w| *w /= total);
        Some(Self(weights))
    }

    /// Equal share per group, used when no node labelling exists
    pub fn uniform(groups: usize) -> Option<Self> {
        (groups > 0).then(|| Self(vec![1.0 / groups as f64; groups]))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Upper bucket boundaries for values spanning `[min, max]`
    pub fn boundaries(&self, min: f64, max: f64) -> Vec<f64> {
        let mut cumulative = 0.0;
        self.0
            .iter()
            .map(|w| {
                cumulative += w;
                min + (max - min) * cumulative
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(entries: &[(&str, u32)]) -> BTreeMap<String, u32> {
        entries.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    #[test]
    fn test_uniform_node_weights() {
        let weights =
            GroupWeights::for_labels(2, &labels(&[("a", 0), ("b", 0), ("c", 1), ("d", 2)]))
                .unwrap();
        assert_eq!(weights.as_slice(), &[0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let weights = GroupWeights::for_labels_weighted(
            3,
            &labels(&[("a", 0), ("b", 1), ("c", 3), ("d", 3), ("e", 1)]),
            |node| node.len() as f64 * 3.7 + if node == "c" { 10.0 } else { 0.0 },
        )
        .unwrap();
        let sum: f64 = weights.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert_eq!(weights.as_slice()[2], 0.0);
    }

    #[test]
    fn test_no_labelling() {
        assert!(GroupWeights::for_labels(0, &BTreeMap::new()).is_none());
        assert!(GroupWeights::for_labels_weighted(0, &labels(&[("a", 0)]), |_| 0.0).is_none());
    }

    #[test]
    fn test_boundaries() {
        let weights = GroupWeights::uniform(2).unwrap();
        assert_eq!(weights.boundaries(0.0, 100.0), vec![50.0, 100.0]);
        assert!(GroupWeights::uniform(0).is_none());
    }
}

//! Silhouette-optimal bucketing of scalar values
//!
//! Values are grouped by k-means for every k in `2..n`, each grouping is
//! scored by its mean silhouette, and the best one wins. Groups are handed
//! out in ascending centroid order, so group 0 always holds the lowest
//! values. When nothing scores above zero (or the values barely spread at
//! all) every point lands in a single group.

mod kmeans;
mod silhouette;

pub use kmeans::{kmeans, KmeansResult};
pub use silhouette::{point_silhouette, silhouette_score};

use crate::config::ClusteringConfig;
use std::collections::BTreeMap;
use tracing::debug;

/// A scalar value tagged with the identity it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPoint {
    pub label: String,
    pub value: f64,
}

impl ClusterPoint {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// One group of the chosen partition
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub centroid: f64,
    pub members: Vec<ClusterPoint>,
}

/// Ordered partition produced by [`Clusterer::best_clustering`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clustering {
    /// Groups by ascending centroid
    pub clusters: Vec<Cluster>,
    /// Best mean silhouette seen, if any k was evaluated
    pub score: Option<f64>,
}

impl Clustering {
    pub fn k(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Highest group index in use
    pub fn max_label(&self) -> Option<u32> {
        self.clusters.len().checked_sub(1).map(|m| m as u32)
    }

    /// Group index per point label
    pub fn labels(&self) -> BTreeMap<String, u32> {
        self.clusters
            .iter()
            .enumerate()
            .flat_map(|(index, cluster)| {
                cluster
                    .members
                    .iter()
                    .map(move |p| (p.label.clone(), index as u32))
            })
            .collect()
    }

    fn single(points: &[ClusterPoint], score: Option<f64>) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let centroid = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;
        Self {
            clusters: vec![Cluster {
                centroid,
                members: points.to_vec(),
            }],
            score,
        }
    }
}

/// Finds the silhouette-optimal k-means partition of scalar values
#[derive(Debug, Clone, Default)]
pub struct Clusterer {
    config: ClusteringConfig,
}

impl Clusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    pub fn best_clustering(&self, points: &[ClusterPoint]) -> Clustering {
        if points.len() <= 1 {
            return Clustering::single(points, None);
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();

        let mut best: Option<(f64, KmeansResult)> = None;
        for k in 2..points.len() {
            let Some(result) = kmeans(&values, k, self.config.max_iterations) else {
                continue;
            };
            let score = silhouette_score(
                &values,
                &result.assignments,
                result.k(),
                self.config.one_point_cluster_score,
            );
            debug!(k, effective_k = result.k(), score, "Scored clustering");
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, result));
            }
        }

        match best {
            Some((score, _))
                if score < self.config.confident_silhouette && self.below_spread(&values) =>
            {
                debug!(score, "Weak clustering of values too close together, using one group");
                Clustering::single(points, Some(score))
            }
            Some((score, result)) if score > 0.0 => {
                let mut clusters: Vec<Cluster> = result
                    .centroids
                    .iter()
                    .map(|centroid| Cluster {
                        centroid: *centroid,
                        members: Vec::new(),
                    })
                    .collect();
                for (point, cluster) in points.iter().zip(&result.assignments) {
                    clusters[*cluster].members.push(point.clone());
                }
                Clustering {
                    clusters,
                    score: Some(score),
                }
            }
            Some((score, _)) => Clustering::single(points, Some(score)),
            None => Clustering::single(points, None),
        }
    }

    fn below_spread(&self, values: &[f64]) -> bool {
        if self.config.min_relative_spread <= 0.0 {
            return false;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        if mean.abs() < f64::EPSILON {
            return false;
        }
        (max - min) / mean.abs() < self.config.min_relative_spread
    }
}

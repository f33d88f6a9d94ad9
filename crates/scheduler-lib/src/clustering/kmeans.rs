//! One-dimensional Lloyd's k-means
//!
//! Initialization is deterministic: centroids start on evenly spaced
//! distinct values, so repeated runs over the same data agree.

/// Result of a single k-means run
#[derive(Debug, Clone, PartialEq)]
pub struct KmeansResult {
    /// Cluster index per input point, ordered by ascending centroid
    pub assignments: Vec<usize>,
    /// Centroids of the non-empty clusters, ascending
    pub centroids: Vec<f64>,
    /// Number of Lloyd's iterations performed
    pub iterations: usize,
}

impl KmeansResult {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }
}

/// Run k-means over scalar values
///
/// Returns `None` when there are fewer distinct values than `k`, since at
/// least one cluster would necessarily be empty. Clusters that empty out
/// during iteration are dropped from the result.
pub fn kmeans(values: &[f64], k: usize, max_iterations: usize) -> Option<KmeansResult> {
    if k == 0 || values.is_empty() {
        return None;
    }

    let mut distinct: Vec<f64> = values.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < k {
        return None;
    }

    let mut centroids: Vec<f64> = if k == 1 {
        vec![distinct[0]]
    } else {
        (0..k)
            .map(|i| distinct[i * (distinct.len() - 1) / (k - 1)])
            .collect()
    };

    let mut assignments = vec![usize::MAX; values.len()];
    let mut iterations = 0;

    for _ in 0..max_iterations.max(1) {
        iterations += 1;

        let mut changed = false;
        for (i, value) in values.iter().enumerate() {
            let nearest = nearest_centroid(*value, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (value, cluster) in values.iter().zip(&assignments) {
            sums[*cluster] += value;
            counts[*cluster] += 1;
        }
        for c in 0..k {
            // Empty cluster keeps its previous centroid.
            if counts[c] > 0 {
                centroids[c] = sums[c] / counts[c] as f64;
            }
        }
    }

    Some(compact(values, &assignments, k, iterations))
}

/// Drop empty clusters and renumber the rest by ascending centroid
fn compact(values: &[f64], assignments: &[usize], k: usize, iterations: usize) -> KmeansResult {
    let mut sums = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (value, cluster) in values.iter().zip(assignments) {
        sums[*cluster] += value;
        counts[*cluster] += 1;
    }

    let mut live: Vec<(usize, f64)> = (0..k)
        .filter(|c| counts[*c] > 0)
        .map(|c| (c, sums[c] / counts[c] as f64))
        .collect();
    live.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut remap = vec![0usize; k];
    for (new_index, (old_index, _)) in live.iter().enumerate() {
        remap[*old_index] = new_index;
    }

    KmeansResult {
        assignments: assignments.iter().map(|c| remap[*c]).collect(),
        centroids: live.into_iter().map(|(_, centroid)| centroid).collect(),
        iterations,
    }
}

fn nearest_centroid(value: f64, centroids: &[f64]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f64::MAX;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = (value - centroid).abs();
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

//! Silhouette scoring for scalar clusterings
//!
//! Separation `b` is the smallest *sum* of distances from a point to the
//! members of another cluster, not the mean. Cohesion `a` is the mean
//! distance to the other members of the point's own cluster.

/// Silhouette of one point
///
/// `assignments[i]` is the cluster of `values[i]`; clusters are numbered
/// `0..k`.
pub fn point_silhouette(
    index: usize,
    values: &[f64],
    assignments: &[usize],
    k: usize,
    one_point_cluster_score: f64,
) -> f64 {
    let own = assignments[index];
    let value = values[index];

    let mut own_sum = 0.0;
    let mut own_count = 0usize;
    let mut other_sums = vec![0.0; k];
    let mut other_counts = vec![0usize; k];

    for (j, (other_value, cluster)) in values.iter().zip(assignments).enumerate() {
        if j == index {
            continue;
        }
        let dist = (value - other_value).abs();
        if *cluster == own {
            own_sum += dist;
            own_count += 1;
        } else {
            other_sums[*cluster] += dist;
            other_counts[*cluster] += 1;
        }
    }

    if own_count == 0 {
        return one_point_cluster_score;
    }

    let a = own_sum / own_count as f64;
    let b = (0..k)
        .filter(|c| *c != own && other_counts[*c] > 0)
        .map(|c| other_sums[c])
        .fold(f64::INFINITY, f64::min);

    if !b.is_finite() {
        return 0.0;
    }

    let max_ab = a.max(b);
    if max_ab > 0.0 {
        (b - a) / max_ab
    } else {
        0.0
    }
}

/// Mean silhouette over all points
pub fn silhouette_score(
    values: &[f64],
    assignments: &[usize],
    k: usize,
    one_point_cluster_score: f64,
) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let total: f64 = (0..values.len())
        .map(|i| point_silhouette(i, values, assignments, k, one_point_cluster_score))
        .sum();
    total / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_separation_scores_one() {
        let values = [1.0, 1.0, 1.0, 50.0, 50.0, 50.0];
        let assignments = [0, 0, 0, 1, 1, 1];
        let score = silhouette_score(&values, &assignments, 2, 0.0);
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_separation_uses_sum_of_distances() {
        // Point 0.0: a = 1.0, b = |0-10| + |0-12| = 22 (mean would be 11)
        let values = [0.0, 1.0, 10.0, 12.0];
        let assignments = [0, 0, 1, 1];
        let s = point_silhouette(0, &values, &assignments, 2, 0.0);
        assert!((s - (22.0 - 1.0) / 22.0).abs() < 1e-12);
    }

    #[test]
    fn test_one_point_cluster_score() {
        let values = [1.0, 2.0, 3.0];
        let assignments = [0, 0, 1];
        assert_eq!(point_silhouette(2, &values, &assignments, 2, -1.0), -1.0);
        assert_eq!(point_silhouette(2, &values, &assignments, 2, 0.0), 0.0);
        // Point 2.0: a = 1, b = 1
        assert_eq!(point_silhouette(1, &values, &assignments, 2, 0.0), 0.0);
    }
}

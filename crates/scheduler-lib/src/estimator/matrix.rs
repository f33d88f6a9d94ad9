//! Growable antisymmetric log-ratio matrices
//!
//! Rows and columns are indexed by the order in which nodes were first
//! seen. Growing the matrix appends rows and columns and never touches
//! existing cells. Cell `(i, j)` holds `ln(t_i / t_j)` where `t` is the
//! target metric (runtime) of node `i` and `j` on comparable input, and
//! `weight(i, j)` is the statistical weight behind it. A cell is defined
//! exactly when its weight is positive. The diagonal is always zero.

use crate::error::EstimatorError;

/// Fully defined matrix produced by [`RatioMatrix::transitive_closure`]
pub type ClosedMatrix = Vec<Vec<f64>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RatioMatrix {
    ratios: Vec<Vec<Option<f64>>>,
    weights: Vec<Vec<u64>>,
}

impl RatioMatrix {
    pub fn new(size: usize) -> Self {
        let mut matrix = Self::default();
        matrix.grow(size);
        matrix
    }

    pub fn size(&self) -> usize {
        self.ratios.len()
    }

    /// Extend to `size` rows and columns, keeping every existing cell
    pub fn grow(&mut self, size: usize) {
        if size <= self.size() {
            return;
        }
        for row in self.ratios.iter_mut() {
            row.resize(size, None);
        }
        for row in self.weights.iter_mut() {
            row.resize(size, 0);
        }
        self.ratios.resize_with(size, || vec![None; size]);
        self.weights.resize_with(size, || vec![0; size]);
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i == j {
            return (i < self.size()).then_some(0.0);
        }
        self.ratios.get(i).and_then(|row| row.get(j).copied().flatten())
    }

    pub fn weight(&self, i: usize, j: usize) -> u64 {
        if i == j {
            return 0;
        }
        self.weights
            .get(i)
            .and_then(|row| row.get(j).copied())
            .unwrap_or(0)
    }

    /// Store `log_ratio` at `(i, j)` and its negation at `(j, i)`
    ///
    /// A zero weight clears the pair instead.
    pub fn set(&mut self, i: usize, j: usize, log_ratio: f64, weight: u64) {
        if i == j {
            return;
        }
        self.grow(i.max(j) + 1);
        if weight == 0 {
            self.clear(i, j);
            return;
        }
        self.ratios[i][j] = Some(log_ratio);
        self.ratios[j][i] = Some(-log_ratio);
        self.weights[i][j] = weight;
        self.weights[j][i] = weight;
    }

    pub fn clear(&mut self, i: usize, j: usize) {
        if i == j || i.max(j) >= self.size() {
            return;
        }
        self.ratios[i][j] = None;
        self.ratios[j][i] = None;
        self.weights[i][j] = 0;
        self.weights[j][i] = 0;
    }

    /// Number of defined off-diagonal cells
    pub fn defined_cells(&self) -> usize {
        self.ratios
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(j, cell)| *j != i && cell.is_some())
                    .count()
            })
            .sum()
    }

    /// Check that weights are positive exactly where ratios are defined
    /// and that defined pairs are antisymmetric
    pub fn check_invariants(&self) -> Result<(), EstimatorError> {
        let n = self.size();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let ratio = self.ratios[i][j];
                let weight = self.weights[i][j];
                if ratio.is_some() != (weight > 0) {
                    return Err(EstimatorError::InvariantViolation {
                        row: i,
                        col: j,
                        detail: format!("ratio {ratio:?} with weight {weight}"),
                    });
                }
                if let (Some(a), Some(b)) = (ratio, self.ratios[j][i]) {
                    if (a + b).abs() > 1e-9 {
                        return Err(EstimatorError::InvariantViolation {
                            row: i,
                            col: j,
                            detail: format!("not antisymmetric: {a} vs {b}"),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Merge matrices cell by cell as a weighted average of their ratios
    pub fn accumulate<'a>(
        matrices: impl IntoIterator<Item = &'a RatioMatrix>,
        size: usize,
    ) -> Result<RatioMatrix, EstimatorError> {
        let mut weighted_sums = vec![vec![0.0; size]; size];
        let mut total_weights = vec![vec![0u64; size]; size];

        for matrix in matrices {
            let n = matrix.size().min(size);
            for i in 0..n {
                for j in 0..n {
                    if let Some(ratio) = matrix.ratios[i][j] {
                        let weight = matrix.weights[i][j];
                        weighted_sums[i][j] += weight as f64 * ratio;
                        total_weights[i][j] += weight;
                    }
                }
            }
        }

        let mut accumulated = RatioMatrix::new(size);
        for i in 0..size {
            for j in 0..size {
                if i == j || total_weights[i][j] == 0 {
                    continue;
                }
                accumulated.ratios[i][j] = Some(weighted_sums[i][j] / total_weights[i][j] as f64);
                accumulated.weights[i][j] = total_weights[i][j];
            }
        }

        accumulated.check_invariants()?;
        Ok(accumulated)
    }

    /// Fill every undefined cell by summing log-ratios along the shortest
    /// chain of defined cells
    ///
    /// Chains are shortest by hop count (Floyd-Warshall), so direct ratios
    /// are always kept. Returns `None` if any pair stays unreachable.
    pub fn transitive_closure(&self) -> Option<ClosedMatrix> {
        let n = self.size();
        let mut hops = vec![vec![usize::MAX; n]; n];
        let mut values = vec![vec![0.0; n]; n];

        for i in 0..n {
            hops[i][i] = 0;
            for j in 0..n {
                if i != j {
                    if let Some(ratio) = self.ratios[i][j] {
                        hops[i][j] = 1;
                        values[i][j] = ratio;
                    }
                }
            }
        }

        for k in 0..n {
            for i in 0..n {
                if hops[i][k] == usize::MAX {
                    continue;
                }
                for j in 0..n {
                    if hops[k][j] == usize::MAX {
                        continue;
                    }
                    let through = hops[i][k] + hops[k][j];
                    if through < hops[i][j] {
                        hops[i][j] = through;
                        values[i][j] = values[i][k] + values[k][j];
                    }
                }
            }
        }

        if hops.iter().flatten().any(|h| *h == usize::MAX) {
            return None;
        }

        // Equal-length chains may disagree; keep the upper triangle's choice
        for i in 0..n {
            for j in (i + 1)..n {
                values[j][i] = -values[i][j];
            }
        }

        Some(values)
    }
}

/// Speed score per row of a closed matrix
///
/// Each row holds `ln(t_i / t_j)`; the score is `exp(-mean(row))`, the
/// geometric mean of how much faster node `i` is than every node
/// (itself included). Scores multiply to one.
pub fn speed_scores(closed: &ClosedMatrix) -> Vec<f64> {
    let n = closed.len();
    closed
        .iter()
        .map(|row| (-row.iter().sum::<f64>() / n as f64).exp())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LN2: f64 = std::f64::consts::LN_2;

    #[test]
    fn test_set_is_antisymmetric() {
        let mut m = RatioMatrix::new(2);
        m.set(0, 1, LN2, 4);
        assert_eq!(m.get(0, 1), Some(LN2));
        assert_eq!(m.get(1, 0), Some(-LN2));
        assert_eq!(m.weight(1, 0), 4);
        assert_eq!(m.get(0, 0), Some(0.0));
        assert!(m.check_invariants().is_ok());
    }

    #[test]
    fn test_grow_preserves_cells() {
        let mut m = RatioMatrix::new(2);
        m.set(0, 1, 0.5, 1);
        m.grow(4);

        assert_eq!(m.size(), 4);
        assert_eq!(m.get(0, 1), Some(0.5));
        assert_eq!(m.get(2, 3), None);
        assert_eq!(m.get(3, 3), Some(0.0));
        assert_eq!(m.weight(0, 3), 0);
        assert!(m.check_invariants().is_ok());

        m.grow(3);
        assert_eq!(m.size(), 4);
    }

    #[test]
    fn test_zero_weight_clears() {
        let mut m = RatioMatrix::new(2);
        m.set(0, 1, 0.5, 1);
        m.set(0, 1, 0.7, 0);
        assert_eq!(m.get(0, 1), None);
        assert_eq!(m.get(1, 0), None);
        assert_eq!(m.defined_cells(), 0);
    }

    #[test]
    fn test_invariant_violation_detected() {
        let mut m = RatioMatrix::new(2);
        m.set(0, 1, 0.5, 1);
        m.weights[0][1] = 0;
        assert!(matches!(
            m.check_invariants(),
            Err(EstimatorError::InvariantViolation { row: 0, col: 1, .. })
        ));
    }

    #[test]
    fn test_accumulate_weighted_average() {
        let mut a = RatioMatrix::new(2);
        a.set(0, 1, 1.0, 1);
        let mut b = RatioMatrix::new(3);
        b.set(0, 1, 4.0, 3);
        b.set(1, 2, 2.0, 2);

        let acc = RatioMatrix::accumulate([&a, &b], 3).unwrap();
        assert!((acc.get(0, 1).unwrap() - 3.25).abs() < 1e-12);
        assert!((acc.get(1, 0).unwrap() + 3.25).abs() < 1e-12);
        assert_eq!(acc.weight(0, 1), 4);
        assert_eq!(acc.get(1, 2), Some(2.0));
        assert_eq!(acc.get(0, 2), None);
        assert_eq!(acc.weight(0, 2), 0);
    }

    #[test]
    fn test_transitive_closure_composes_chain() {
        let mut m = RatioMatrix::new(3);
        m.set(0, 1, LN2, 1);
        m.set(1, 2, 3f64.ln(), 1);

        let closed = m.transitive_closure().unwrap();
        assert!((closed[0][2] - 6f64.ln()).abs() < 1e-12);
        assert!((closed[2][0] + 6f64.ln()).abs() < 1e-12);
        assert_eq!(closed[0][1], LN2);
    }

    #[test]
    fn test_transitive_closure_prefers_direct_ratio() {
        let mut m = RatioMatrix::new(3);
        m.set(0, 1, LN2, 1);
        m.set(1, 2, LN2, 1);
        m.set(0, 2, 1.0, 1);

        let closed = m.transitive_closure().unwrap();
        assert_eq!(closed[0][2], 1.0);
    }

    #[test]
    fn test_transitive_closure_disconnected() {
        let mut m = RatioMatrix::new(4);
        m.set(0, 1, LN2, 1);
        m.set(2, 3, LN2, 1);
        assert!(m.transitive_closure().is_none());
    }

    #[test]
    fn test_speed_scores_proportional() {
        let mut m = RatioMatrix::new(3);
        // runtime(A) = 2 runtime(B), runtime(B) = 3 runtime(C)
        m.set(0, 1, LN2, 1);
        m.set(1, 2, 3f64.ln(), 1);
        let scores = speed_scores(&m.transitive_closure().unwrap());

        assert!((scores[1] / scores[0] - 2.0).abs() < 1e-9);
        assert!((scores[2] / scores[0] - 6.0).abs() < 1e-9);
        assert!((scores.iter().product::<f64>() - 1.0).abs() < 1e-9);
    }
}

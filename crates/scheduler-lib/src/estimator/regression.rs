//! Least-squares lines over (input size, target) samples

/// Closed interval of observed input sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Smallest range covering every sample's input size
    pub fn of(samples: &[(f64, f64)]) -> Option<Self> {
        let mut iter = samples.iter().map(|(x, _)| *x);
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), x| (lo.min(x), hi.max(x)));
        Some(Self { min, max })
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Overlap of two ranges; `None` unless it has positive width
    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let overlap = Range::new(self.min.max(other.min), self.max.min(other.max));
        (overlap.width() > 0.0).then_some(overlap)
    }
}

/// `target = slope * input_size + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionLine {
    pub slope: f64,
    pub intercept: f64,
}

impl RegressionLine {
    /// Fit by ordinary least squares; needs at least two samples
    ///
    /// Samples sharing a single input size yield a flat line through their
    /// mean target.
    pub fn fit(samples: &[(f64, f64)]) -> Option<Self> {
        let n = samples.len() as f64;
        if samples.len() < 2 {
            return None;
        }

        // Center x to avoid precision loss on large byte counts
        let x0 = samples[0].0;

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_xx = 0.0;
        for (x, y) in samples {
            let x = x - x0;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
        }

        let denominator = n * sum_xx - sum_x * sum_x;
        let slope = if denominator.abs() < f64::EPSILON {
            0.0
        } else {
            (n * sum_xy - sum_x * sum_y) / denominator
        };
        let intercept_centered = (sum_y - slope * sum_x) / n;
        let line = Self {
            slope,
            intercept: intercept_centered - slope * x0,
        };

        (line.slope.is_finite() && line.intercept.is_finite()).then_some(line)
    }

    pub fn value_at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Mean of the line over a range
    pub fn average_over(&self, range: &Range) -> f64 {
        self.value_at((range.min + range.max) / 2.0)
    }
}

//! Weighted 1D histogram with under/overflow sentinels.

use serde::{Deserialize, Serialize};

use crate::error::{HistError, Result};

/// A uniform-axis histogram accumulating weight sums and weight² sums.
///
/// Bin `0` is underflow, bins `1..=n_bins` cover `[x_min, x_max)`, bin
/// `n_bins + 1` is overflow. `sumw2[i]` is the variance of bin `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedHistogram {
    /// Number of in-range bins.
    pub n_bins: usize,
    /// Lower edge of bin 1.
    pub x_min: f64,
    /// Upper edge of bin `n_bins`.
    pub x_max: f64,
    /// Weight sums, length `n_bins + 2`.
    pub content: Vec<f64>,
    /// Weight² sums, length `n_bins + 2`.
    pub sumw2: Vec<f64>,
    /// Number of fills.
    pub entries: u64,
}

impl WeightedHistogram {
    /// Empty histogram with `n_bins` uniform bins over `[x_min, x_max)`.
    pub fn new(n_bins: usize, x_min: f64, x_max: f64) -> Self {
        Self {
            n_bins,
            x_min,
            x_max,
            content: vec![0.0; n_bins + 2],
            sumw2: vec![0.0; n_bins + 2],
            entries: 0,
        }
    }

    /// Build from contents and variances including both sentinels.
    pub fn from_contents(x_min: f64, x_max: f64, content: Vec<f64>, sumw2: Vec<f64>) -> Result<Self> {
        let h = Self {
            n_bins: content.len().saturating_sub(2),
            x_min,
            x_max,
            content,
            sumw2,
            entries: 0,
        };
        h.validate()?;
        Ok(h)
    }

    /// Bin index of `x`, sentinels included. NaN lands in overflow.
    #[inline]
    pub fn find_bin(&self, x: f64) -> usize {
        if x < self.x_min {
            return 0;
        }
        if x.is_nan() || x >= self.x_max {
            return self.n_bins + 1;
        }
        let width = (self.x_max - self.x_min) / self.n_bins as f64;
        let bin = ((x - self.x_min) / width) as usize + 1;
        bin.min(self.n_bins)
    }

    /// Add weight `w` at `x`.
    #[inline]
    pub fn fill(&mut self, x: f64, w: f64) {
        let bin = self.find_bin(x);
        self.content[bin] += w;
        self.sumw2[bin] += w * w;
        self.entries += 1;
    }

    /// Content of bin `i`.
    pub fn content(&self, i: usize) -> f64 {
        self.content[i]
    }

    /// Statistical error of bin `i`.
    pub fn error(&self, i: usize) -> f64 {
        self.sumw2[i].sqrt()
    }

    /// Set the statistical error of bin `i`.
    pub fn set_error(&mut self, i: usize, error: f64) {
        self.sumw2[i] = error * error;
    }

    /// Variance of bin `i`.
    pub fn variance(&self, i: usize) -> f64 {
        self.sumw2[i]
    }

    /// Sum of in-range contents.
    pub fn integral(&self) -> f64 {
        self.content[1..=self.n_bins].iter().sum()
    }

    /// Sum of all contents, sentinels included.
    pub fn total(&self) -> f64 {
        self.content.iter().sum()
    }

    /// Lower edges of bins `1..=n_bins` plus the upper edge of the last bin.
    pub fn bin_edges(&self) -> Vec<f64> {
        let width = (self.x_max - self.x_min) / self.n_bins as f64;
        (0..=self.n_bins).map(|k| self.x_min + k as f64 * width).collect()
    }

    /// Bin-wise sum of `other` into `self`. Axes must match exactly.
    pub fn add(&mut self, other: &WeightedHistogram) -> Result<()> {
        if self.n_bins != other.n_bins || self.x_min != other.x_min || self.x_max != other.x_max {
            return Err(HistError::Store(format!(
                "axis mismatch: ({}, {}, {}) vs ({}, {}, {})",
                self.n_bins, self.x_min, self.x_max, other.n_bins, other.x_min, other.x_max
            )));
        }
        for (a, b) in self.content.iter_mut().zip(&other.content) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Check axis and array layout (after deserialization, for example).
    pub fn validate(&self) -> Result<()> {
        if self.n_bins == 0 {
            return Err(HistError::Store("histogram has no bins".into()));
        }
        if !(self.x_min.is_finite() && self.x_max.is_finite() && self.x_min < self.x_max) {
            return Err(HistError::Store(format!(
                "invalid histogram range ({}, {})",
                self.x_min, self.x_max
            )));
        }
        let expected = self.n_bins + 2;
        if self.content.len() != expected || self.sumw2.len() != expected {
            return Err(HistError::Store(format!(
                "histogram arrays have {} contents and {} variances, expected {expected}",
                self.content.len(),
                self.sumw2.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fill_uses_sentinels() {
        let mut h = WeightedHistogram::new(4, 0.0, 4.0);
        for x in [-0.5, 0.0, 1.5, 3.999, 4.0, f64::NAN] {
            h.fill(x, 1.0);
        }
        assert_eq!(h.content, vec![1.0, 1.0, 1.0, 0.0, 1.0, 2.0]);
        assert_eq!(h.entries, 6);
        assert_eq!(h.integral(), 3.0);
        assert_eq!(h.total(), 6.0);
    }

    #[test]
    fn weights_and_variances_accumulate() {
        let mut h = WeightedHistogram::new(2, 70.0, 130.0);
        h.fill(80.0, 2.0);
        h.fill(85.0, -0.5);
        assert_relative_eq!(h.content(1), 1.5);
        assert_relative_eq!(h.variance(1), 4.25);
        assert_relative_eq!(h.error(1), 4.25f64.sqrt());

        h.set_error(1, 3.0);
        assert_relative_eq!(h.variance(1), 9.0);
        assert_eq!(h.bin_edges(), vec![70.0, 100.0, 130.0]);
    }

    #[test]
    fn add_requires_same_axis() {
        let mut a = WeightedHistogram::new(2, 0.0, 1.0);
        let mut b = WeightedHistogram::new(2, 0.0, 1.0);
        a.fill(0.2, 1.0);
        b.fill(0.2, 2.0);
        b.fill(0.7, 1.0);
        a.add(&b).unwrap();
        assert_eq!(a.content, vec![0.0, 3.0, 1.0, 0.0]);
        assert_eq!(a.sumw2, vec![0.0, 5.0, 1.0, 0.0]);
        assert_eq!(a.entries, 3);

        let c = WeightedHistogram::new(3, 0.0, 1.0);
        assert!(matches!(a.add(&c), Err(HistError::Store(_))));
    }

    #[test]
    fn from_contents_checks_layout() {
        assert!(WeightedHistogram::from_contents(0.0, 1.0, vec![0.0; 4], vec![0.0; 3]).is_err());
        let h = WeightedHistogram::from_contents(0.0, 1.0, vec![0.0; 4], vec![0.0; 4]).unwrap();
        assert_eq!(h.n_bins, 2);
    }
}

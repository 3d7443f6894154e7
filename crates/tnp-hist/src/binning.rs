//! Multidimensional kinematic binning: values → flat bin id.

use tnp_core::BinSpec;

use crate::error::{HistError, Result};

/// Index of half-open intervals for a vector of binning dimensions.
///
/// Flat ids are row-major over the dimensions in declaration order: the last
/// dimension varies fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct BinningIndex {
    edges: Vec<Vec<f64>>,
    strides: Vec<usize>,
    n_bins: usize,
}

impl BinningIndex {
    /// Build the index, validating every dimension's edges.
    pub fn new(bins: &[BinSpec]) -> Result<Self> {
        for b in bins {
            b.validate().map_err(|e| HistError::Binning(e.to_string()))?;
        }
        let edges: Vec<Vec<f64>> = bins.iter().map(|b| b.bins.clone()).collect();

        let mut strides = vec![1usize; edges.len()];
        for d in (0..edges.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * (edges[d + 1].len() - 1);
        }
        let n_bins = edges.iter().map(|e| e.len() - 1).product();
        Ok(Self { edges, strides, n_bins })
    }

    /// Total number of flat bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Flat bin id for one value per dimension.
    ///
    /// Returns `None` if the value count is wrong or any value lies outside
    /// `[edges[0], edges[last])` of its dimension (NaN included).
    pub fn find_bin(&self, values: &[f64]) -> Option<usize> {
        if values.len() != self.edges.len() {
            return None;
        }
        let mut flat = 0;
        for ((edges, stride), &v) in self.edges.iter().zip(&self.strides).zip(values) {
            flat += find_interval(edges, v)? * stride;
        }
        Some(flat)
    }

    /// Per-dimension indices of a flat bin id.
    pub fn unravel(&self, flat: usize) -> Option<Vec<usize>> {
        if flat >= self.n_bins {
            return None;
        }
        Some(
            self.edges
                .iter()
                .zip(&self.strides)
                .map(|(edges, stride)| (flat / stride) % (edges.len() - 1))
                .collect(),
        )
    }

    /// `[lo, hi)` bounds of a flat bin along each dimension.
    pub fn bin_bounds(&self, flat: usize) -> Option<Vec<(f64, f64)>> {
        let idx = self.unravel(flat)?;
        Some(self.edges.iter().zip(idx).map(|(e, k)| (e[k], e[k + 1])).collect())
    }
}

/// Locate `v` in sorted `edges` such that `edges[k] <= v < edges[k + 1]`.
fn find_interval(edges: &[f64], v: f64) -> Option<usize> {
    let last = *edges.last()?;
    if !(v >= edges[0] && v < last) {
        return None;
    }
    Some(edges.partition_point(|e| *e <= v) - 1)
}

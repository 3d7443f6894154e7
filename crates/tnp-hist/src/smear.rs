//! Negative-bin repair.
//!
//! Negative-weight events can leave bins with negative content. A smearing
//! pass moves each negative bin's deficit onto the nearest positive
//! neighbours (proportionally to their content), conserving the sum of all
//! bins. Whatever survives [`SMEAR_PASSES`] passes is floored to zero.

use crate::histogram::WeightedHistogram;

/// Number of smearing passes before the floor.
pub const SMEAR_PASSES: usize = 10;

/// Largest neighbour distance searched for donors.
pub const MAX_NEIGHBOR_OFFSET: usize = 6;

const VARIANCE_TOLERANCE: f64 = 1e-6;

/// Content of bin `i`, reading anything outside the sentinel range as zero.
#[inline]
fn content_at(h: &WeightedHistogram, i: isize) -> f64 {
    if i < 0 {
        return 0.0;
    }
    h.content.get(i as usize).copied().unwrap_or(0.0)
}

/// Run one smearing pass over bins `1..=n_bins`, left to right.
///
/// Sentinel bins are only donors, never repaired here.
pub fn smear_negative_bins(h: &mut WeightedHistogram) {
    let mut targets: Vec<usize> = Vec::with_capacity(2);
    for i in 1..=h.n_bins {
        let c = h.content[i];
        if c.is_nan() || c >= 0.0 {
            continue;
        }
        let mut remain = -c;
        let mut remain_var = h.sumw2[i];

        targets.clear();
        for j in 1..=MAX_NEIGHBOR_OFFSET as isize {
            for k in [i as isize + j, i as isize - j] {
                if content_at(h, k) > 0.0 {
                    targets.push(k as usize);
                }
            }
            if !targets.is_empty() {
                break;
            }
        }
        if targets.is_empty() {
            continue;
        }

        let target_total: f64 = targets.iter().map(|&k| h.content[k]).sum();
        let moved = target_total.min(remain);
        let moved_var = remain_var * moved / remain;
        for &k in &targets {
            let share = h.content[k] / target_total;
            h.content[k] -= moved * share;
            h.sumw2[k] += moved_var * share;
        }

        remain -= moved;
        remain_var -= moved_var;
        if remain_var < 0.0 && remain_var.abs() < VARIANCE_TOLERANCE {
            remain_var = 0.0;
        }
        h.content[i] = -remain;
        h.sumw2[i] = remain_var;
    }
}

/// Zero the content and error of every negative bin, sentinels included.
pub fn remove_negative_bins(h: &mut WeightedHistogram) {
    for (c, v) in h.content.iter_mut().zip(h.sumw2.iter_mut()) {
        if *c < 0.0 {
            *c = 0.0;
            *v = 0.0;
        }
    }
}

/// Full repair: [`SMEAR_PASSES`] smearing passes, then the floor.
pub fn postprocess(h: &mut WeightedHistogram) {
    for _ in 0..SMEAR_PASSES {
        smear_negative_bins(h);
    }
    remove_negative_bins(h);
}

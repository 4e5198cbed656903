//! Descriptive statistics over a batch of per-candidate values.
//!
//! Percentiles use linear interpolation between order statistics at rank
//! `p / 100 * (n - 1)`, so `percentile(0)` is the minimum and
//! `percentile(100)` the maximum. statrs' own quantile estimator uses a
//! different rank rule, so only the moments come from it.

use serde::Serialize;
use statrs::statistics::Statistics;

/// Two-sided 95% normal quantile.
pub const CONFIDENCE_Z: f64 = 1.96;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().population_std_dev())
}

/// Half-width of the 95% confidence interval around the mean.
pub fn margin_of_error(values: &[f64]) -> Option<f64> {
    let sd = std_dev(values)?;
    Some(CONFIDENCE_Z * sd / (values.len() as f64).sqrt())
}

/// Interpolated percentile of an ascending slice. `p` is clamped to `[0, 100]`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Population summary for one metric over one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PopulationStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p5: f64,
    pub p10: f64,
    pub p90: f64,
    pub p95: f64,
}

impl PopulationStats {
    /// Summarises `values`. Returns `None` for an empty batch; NaNs are dropped.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        sorted.sort_by(f64::total_cmp);
        let first = *sorted.first()?;
        let last = *sorted.last()?;
        Some(Self {
            min: first,
            max: last,
            // Clamp collapses float drift in all-equal batches.
            mean: mean(&sorted)?.clamp(first, last),
            p5: percentile(&sorted, 5.0)?,
            p10: percentile(&sorted, 10.0)?,
            p90: percentile(&sorted, 90.0)?,
            p95: percentile(&sorted, 95.0)?,
        })
    }

    /// Multiplies every field by `factor`, e.g. to show rates as percentages.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
            mean: self.mean * factor,
            p5: self.p5 * factor,
            p10: self.p10 * factor,
            p90: self.p90 * factor,
            p95: self.p95 * factor,
        }
    }
}

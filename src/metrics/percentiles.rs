use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Percentile levels reported in every summary.
pub const PERCENTILE_LEVELS: [f64; 6] = [50.0, 75.0, 90.0, 95.0, 99.0, 99.9];

/// z-scores for the supported confidence levels (percent).
const Z_SCORES: [(f64, f64); 7] = [
    (80.0, 1.282),
    (85.0, 1.440),
    (90.0, 1.645),
    (95.0, 1.960),
    (99.0, 2.576),
    (99.5, 2.807),
    (99.9, 3.291),
];

/// Nearest-rank percentile of an already sorted slice.
///
/// `p` is in percent (0–100).
pub fn percentile(sorted_values: &[f64], p: f64) -> Result<f64> {
    let size = sorted_values.len();
    let idx = (p / 100.0) * size as f64 - 0.5;
    let insufficient = || Error::InsufficientData {
        samples: size,
        percentile: p,
    };
    if !p.is_finite() || idx < 0.0 || idx > size as f64 {
        return Err(insufficient());
    }
    sorted_values
        .get(idx.floor() as usize)
        .copied()
        .ok_or_else(insufficient)
}

/// Column-safe key for a percentile level: `99.9` becomes `99_9`.
///
/// The result store does not allow dots in column names.
pub fn percentile_key(p: f64) -> String {
    format!("{p}").replace('.', "_")
}

/// All [`PERCENTILE_LEVELS`] of a sorted slice, keyed by [`percentile_key`].
pub fn percentile_set(sorted_values: &[f64]) -> Result<BTreeMap<String, f64>> {
    PERCENTILE_LEVELS
        .iter()
        .map(|&p| Ok((percentile_key(p), percentile(sorted_values, p)?)))
        .collect()
}

/// Half-width of the confidence interval around the mean.
pub fn error_margin(confidence: f64, stdev: f64, n: usize) -> Result<f64> {
    let z = Z_SCORES
        .iter()
        .find(|(level, _)| (level - confidence).abs() < 1e-9)
        .map(|(_, z)| *z)
        .ok_or_else(|| {
            Error::config(format!(
                "unsupported confidence level {confidence}; use one of 80, 85, 90, 95, 99, 99.5, 99.9"
            ))
        })?;
    Ok(z * stdev / (n as f64).sqrt())
}

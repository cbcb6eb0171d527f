use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::percentiles::{error_margin, percentile_set};
use super::sampler::Sampler;
use crate::config::SampleMode;

// ─── Configuration ───────────────────────────────────────────────

/// Confidence level used for the error margin of every summary.
const SUMMARY_CONFIDENCE: f64 = 95.0;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe latency aggregator.
/// Request tasks call `measure()`, the runner calls `get()` once done.
#[derive(Debug)]
pub struct Stats {
    inner: Mutex<Sampler>,
}

/// Read-only statistics derived from the retained samples (milliseconds).
///
/// Only `n` is set for an empty run; a single sample yields a point
/// estimate without percentiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub n: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_margin: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<BTreeMap<String, f64>>,
    /// Raw samples in arrival order; only present when every sample was kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<f64>>,
}

// ─── Stats impl ──────────────────────────────────────────────────

impl Stats {
    pub fn new(sampler: Sampler) -> Self {
        Self {
            inner: Mutex::new(sampler),
        }
    }

    pub fn from_mode(mode: SampleMode) -> Self {
        Self::new(Sampler::from_mode(mode))
    }

    /// Record a single latency observation.
    pub fn measure(&self, value: f64) {
        self.inner.lock().add(value);
    }

    /// Number of observations offered so far.
    pub fn count(&self) -> u64 {
        self.inner.lock().count()
    }

    /// Compute the summary over the currently retained samples.
    pub fn get(&self) -> StatsSummary {
        let (mut values, keep_all) = {
            let sampler = self.inner.lock();
            (sampler.values().to_vec(), sampler.keeps_all())
        };
        let raw = keep_all.then(|| values.clone());
        values.sort_by(f64::total_cmp);
        summarize(&values, raw)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::from_mode(SampleMode::default())
    }
}

// ─── Summary math ────────────────────────────────────────────────

fn summarize(sorted: &[f64], samples: Option<Vec<f64>>) -> StatsSummary {
    let n = sorted.len();
    if n == 0 {
        return StatsSummary::default();
    }

    let min = sorted[0];
    let max = sorted[n - 1];
    let mean = sorted.iter().sum::<f64>() / n as f64;

    if n == 1 {
        return StatsSummary {
            n,
            min: Some(min),
            max: Some(max),
            mean: Some(mean),
            stdev: Some(0.0),
            samples,
            ..StatsSummary::default()
        };
    }

    let variance =
        sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let stdev = variance.sqrt();

    StatsSummary {
        n,
        min: Some(min),
        max: Some(max),
        mean: Some(mean),
        median: Some(median(sorted)),
        variance: Some(variance),
        stdev: Some(stdev),
        // Aggregation boundary: statistics that cannot be derived are left
        // out rather than failing the whole summary.
        error_margin: error_margin(SUMMARY_CONFIDENCE, stdev, n).ok(),
        percentile: percentile_set(sorted).ok(),
        samples,
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::sampler::UniformReservoir;

    fn round3(v: f64) -> f64 {
        (v * 1000.0).round() / 1000.0
    }

    #[test]
    fn summary_of_four_samples() {
        let stats = Stats::new(Sampler::Reservoir(UniformReservoir::with_seed(4, 1)));
        for v in [10.5, 38.1, 234.7, 50.2] {
            stats.measure(v);
        }

        let s = stats.get();
        assert_eq!(s.n, 4);
        assert_eq!(s.min, Some(10.5));
        assert_eq!(s.max, Some(234.7));
        assert_eq!(s.mean.map(round3), Some(83.375));
        assert_eq!(s.median.map(round3), Some(44.15));
        assert_eq!(s.variance.map(round3), Some(10453.476));
        assert_eq!(s.stdev.map(round3), Some(102.242));

        let p = s.percentile.expect("percentiles");
        assert_eq!(p["50"], 38.1);
        assert_eq!(p["75"], 50.2);
        assert_eq!(p["99"], 234.7);
        assert_eq!(p["99_9"], 234.7);
        assert!(s.samples.is_none());
    }

    #[test]
    fn empty_summary_only_has_n() {
        let s = Stats::default().get();
        assert_eq!(s, StatsSummary::default());
        assert_eq!(serde_json::to_value(&s).unwrap(), serde_json::json!({"n": 0}));
    }

    #[test]
    fn single_sample_has_no_percentiles() {
        let stats = Stats::default();
        stats.measure(23.4);
        let s = stats.get();
        assert_eq!(s.n, 1);
        assert_eq!(s.min, Some(23.4));
        assert_eq!(s.max, Some(23.4));
        assert_eq!(s.mean, Some(23.4));
        assert_eq!(s.stdev, Some(0.0));
        assert!(s.percentile.is_none());
        assert!(s.error_margin.is_none());
    }

    #[test]
    fn get_is_idempotent() {
        let stats = Stats::default();
        for v in [3.0, 9.0, 1.0, 4.0] {
            stats.measure(v);
        }
        assert_eq!(stats.get(), stats.get());
    }

    #[test]
    fn all_mode_exposes_raw_samples() {
        let stats = Stats::from_mode(SampleMode::All);
        for v in [3.0, 9.0, 1.0] {
            stats.measure(v);
        }
        let s = stats.get();
        assert_eq!(s.samples, Some(vec![3.0, 9.0, 1.0]));
        assert_eq!(s.min, Some(1.0));
    }

    #[test]
    fn error_margin_uses_95_percent() {
        let stats = Stats::from_mode(SampleMode::All);
        for v in [1.0, 2.0, 3.0, 4.0] {
            stats.measure(v);
        }
        let s = stats.get();
        let expected = 1.96 * s.stdev.unwrap() / 2.0;
        assert!((s.error_margin.unwrap() - expected).abs() < 1e-12);
    }
}

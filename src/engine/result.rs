use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::runner::TimedStats;
use crate::clients::VersionInfo;
use crate::config::OutputFormat;
use crate::error::Result;
use crate::metrics::StatsSummary;

/// Outcome of one measured statement, ready to be printed or stored.
#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    pub version_info: VersionInfo,
    pub statement: String,
    pub meta: Option<Value>,
    /// Epoch milliseconds
    pub started: i64,
    /// Epoch milliseconds
    pub ended: i64,
    pub runtime_stats: StatsSummary,
    pub concurrency: usize,
    pub bulk_size: Option<usize>,
}

impl BenchResult {
    pub fn new(
        version_info: VersionInfo,
        statement: impl Into<String>,
        meta: Option<Value>,
        timed_stats: &TimedStats,
        concurrency: usize,
        bulk_size: Option<usize>,
    ) -> Self {
        Self {
            version_info,
            statement: statement.into(),
            meta,
            started: timed_stats.started,
            ended: timed_stats.ended,
            runtime_stats: timed_stats.stats.get(),
            concurrency,
            bulk_size,
        }
    }

    /// The result as a JSON object with keys in sorted order.
    pub fn to_value(&self) -> Result<Value> {
        // serde_json's default map is ordered by key.
        Ok(serde_json::to_value(self)?)
    }

    /// Pretty JSON, sorted keys, four-space indent.
    pub fn to_json(&self) -> Result<String> {
        let value = self.to_value()?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Full => self.to_json(),
            OutputFormat::Short => Ok(short_output(&self.runtime_stats)),
        }
    }
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_output(&self.runtime_stats))
    }
}

/// Human-readable summary of a run. Spread and percentiles are left out
/// for fewer than two samples.
pub fn short_output(stats: &StatsSummary) -> String {
    if stats.n == 0 {
        return "Runtime (in ms):\n    No data received".to_owned();
    }
    let mut out = format!(
        "Runtime (in ms):\n    mean:    {:.3} ± {:.3}",
        stats.mean.unwrap_or_default(),
        stats.error_margin.unwrap_or_default(),
    );
    if stats.n > 1 {
        let p = |key: &str| {
            stats
                .percentile
                .as_ref()
                .and_then(|p| p.get(key).copied())
                .unwrap_or_default()
        };
        out.push_str(&format!(
            "\n    min/max: {:.3} → {:.3}\n\
             Percentile:\n    \
             50:   {:.3} ± {:.3} (stdev)\n    \
             95:   {:.3}\n    \
             99.9: {:.3}",
            stats.min.unwrap_or_default(),
            stats.max.unwrap_or_default(),
            p("50"),
            stats.stdev.unwrap_or_default(),
            p("95"),
            p("99_9"),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SampleMode;
    use crate::metrics::Stats;

    fn timed(values: &[f64]) -> TimedStats {
        let stats = Stats::from_mode(SampleMode::Reservoir(100));
        for v in values {
            stats.measure(*v);
        }
        TimedStats {
            started: 1_000,
            ended: 2_000,
            stats: Arc::new(stats),
        }
    }

    fn result(values: &[f64]) -> BenchResult {
        BenchResult::new(
            VersionInfo {
                number: "5.6.2".into(),
                hash: Some("abc".into()),
                date: None,
            },
            "select name from sys.cluster",
            Some(serde_json::json!({"name": "spec.json"})),
            &timed(values),
            4,
            None,
        )
    }

    #[test]
    fn json_has_sorted_keys_and_four_space_indent() {
        let json = result(&[1.0, 2.0, 3.0]).to_json().unwrap();
        let keys: Vec<&str> = json
            .lines()
            .filter(|l| l.starts_with("    \"") && !l.starts_with("     "))
            .map(|l| l.trim().split('"').nth(1).unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.contains(&"runtime_stats"));
        assert!(json.contains("\"99_9\""));
    }

    #[test]
    fn value_carries_all_fields() {
        let v = result(&[5.0, 7.0]).to_value().unwrap();
        assert_eq!(v["statement"], "select name from sys.cluster");
        assert_eq!(v["started"], 1_000);
        assert_eq!(v["ended"], 2_000);
        assert_eq!(v["concurrency"], 4);
        assert_eq!(v["bulk_size"], Value::Null);
        assert_eq!(v["runtime_stats"]["n"], 2);
        assert_eq!(v["version_info"]["number"], "5.6.2");
    }

    #[test]
    fn short_output_with_many_samples() {
        let text = result(&[10.0, 20.0, 30.0, 40.0]).render(OutputFormat::Short).unwrap();
        assert!(text.starts_with("Runtime (in ms):\n    mean:    25.000 ± "));
        assert!(text.contains("min/max: 10.000 → 40.000"));
        assert!(text.contains("50:   20.000 ± "));
        assert!(text.contains("99.9: 40.000"));
    }

    #[test]
    fn short_output_skips_spread_for_one_sample() {
        let text = short_output(&result(&[23.4]).runtime_stats);
        assert_eq!(text, "Runtime (in ms):\n    mean:    23.400 ± 0.000");
    }

    #[test]
    fn short_output_without_data() {
        let text = short_output(&StatsSummary::default());
        assert!(text.contains("No data received"));
    }
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::DEFAULT_RESERVOIR_SIZE;

// ─── Sample mode ─────────────────────────────────────────────────

/// Which samples a run keeps for its statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SampleMode {
    /// Every sample, unbounded.
    All,
    /// Uniform reservoir of the given size.
    Reservoir(usize),
}

impl Default for SampleMode {
    fn default() -> Self {
        Self::Reservoir(DEFAULT_RESERVOIR_SIZE)
    }
}

impl FromStr for SampleMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => return Ok(Self::All),
            "reservoir" => return Ok(Self::default()),
            _ => {}
        }
        let size = s
            .strip_prefix("reservoir:")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                Error::config(format!(
                    "invalid sample mode {s:?}; expected \"all\", \"reservoir\" or \"reservoir:<N>\""
                ))
            })?;
        Ok(Self::Reservoir(size))
    }
}

impl TryFrom<String> for SampleMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SampleMode> for String {
    fn from(mode: SampleMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for SampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Reservoir(size) => write!(f, "reservoir:{size}"),
        }
    }
}

// ─── Output format ───────────────────────────────────────────────

/// How results are rendered: full JSON or a short text block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Full,
    Short,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" | "json" => Ok(Self::Full),
            "short" | "text" => Ok(Self::Short),
            other => Err(Error::config(format!("invalid output format: {other}"))),
        }
    }
}

// ─── Run configuration ───────────────────────────────────────────

/// Knobs for a single measurement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Requests kept in flight at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Fixed number of requests; exclusive with `duration`
    #[serde(default)]
    pub iterations: Option<u64>,

    /// Wall-clock run time in seconds; exclusive with `iterations`
    #[serde(default)]
    pub duration: Option<f64>,

    #[serde(default)]
    pub sample_mode: SampleMode,

    /// Unmeasured sequential requests issued before the run
    #[serde(default)]
    pub warmup: u64,
}

fn default_concurrency() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            iterations: None,
            duration: None,
            sample_mode: SampleMode::default(),
            warmup: 0,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations.is_some() && self.duration.is_some() {
            return Err(Error::config(
                "iterations and duration are mutually exclusive",
            ));
        }
        if self.iterations == Some(0) {
            return Err(Error::config("iterations must be greater than 0"));
        }
        self.duration()?;
        Ok(())
    }

    pub fn duration(&self) -> Result<Option<Duration>> {
        self.duration.map(duration_from_secs).transpose()
    }
}

/// Converts a run time in seconds, rejecting values that are not positive
/// or do not fit a [`Duration`].
pub fn duration_from_secs(secs: f64) -> Result<Duration> {
    let invalid = || Error::config(format!("duration must be a positive number of seconds, got {secs}"));
    if secs <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_mode_round_trips_through_strings() {
        for mode in ["all", "reservoir:10"] {
            assert_eq!(mode.parse::<SampleMode>().unwrap().to_string(), mode);
        }
        assert_eq!(
            "reservoir".parse::<SampleMode>().unwrap(),
            SampleMode::Reservoir(1000)
        );
    }

    #[test]
    fn run_config_defaults_from_empty_object() {
        let cfg: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.sample_mode, SampleMode::Reservoir(1000));
    }

    #[test]
    fn run_config_rejects_bad_sample_mode() {
        let err = serde_json::from_str::<RunConfig>(r#"{"sample_mode": "most"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn iterations_and_duration_are_exclusive() {
        let cfg = RunConfig {
            iterations: Some(10),
            duration: Some(1.0),
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn non_positive_duration_is_rejected() {
        let cfg = RunConfig {
            duration: Some(0.0),
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = RunConfig {
            duration: Some(0.5),
            ..RunConfig::default()
        };
        assert_eq!(cfg.duration().unwrap(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn unrepresentable_duration_is_rejected() {
        for secs in [1e20, f64::INFINITY, f64::NAN, -1.0] {
            let cfg = RunConfig {
                duration: Some(secs),
                ..RunConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(Error::Configuration(_))), "{secs}");
            assert!(matches!(duration_from_secs(secs), Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn output_format_aliases() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Full);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Short);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}

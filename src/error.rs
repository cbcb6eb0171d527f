use thiserror::Error;

/// Everything that can go wrong while configuring, running or evaluating a
/// benchmark.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid sample mode, conflicting run options, bad spec file, ...
    /// Raised before any request is issued.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The database rejected a statement or the transport failed.
    #[error("Request failed: {0}")]
    Request(String),

    /// Transport-level failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A spawned request task panicked or was cancelled by the runtime.
    #[error("Request task aborted: {0}")]
    TaskPanicked(String),

    /// A percentile was requested from too few samples.
    #[error("Too few data points ({samples}) for {percentile}th percentile")]
    InsufficientData { samples: usize, percentile: f64 },

    /// A `fail-if` expression evaluated to true for a result.
    #[error("Benchmark failure: `{0}` evaluated to true")]
    BenchmarkFailure(String),

    /// The run was stopped by an external shutdown signal.
    #[error("Interrupted")]
    Interrupted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Shorthand for building a [`Error::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors that originate from an individual request against the
    /// database under test.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::Http(_) | Self::TaskPanicked(_)
        )
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskPanicked(err.to_string())
    }
}

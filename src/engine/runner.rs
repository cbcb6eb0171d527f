use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::clients::{Client, Response, VersionInfo};
use crate::config::SampleMode;
use crate::error::{Error, Result};
use crate::metrics::Stats;
use crate::scheduler::{Scheduler, Timeboxed};
use crate::timing::{epoch_ms, measure};

/// Requests issued when a workload sets neither iterations nor duration.
pub const DEFAULT_ITERATIONS: u64 = 100;

// ─── Workload ────────────────────────────────────────────────────

/// What to measure: one statement, its arguments, and how long to go on.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub statement: String,
    /// Arguments for single-row execution; exclusive with `bulk_args`
    pub args: Option<Vec<Value>>,
    /// Argument rows sent in one bulk request; exclusive with `args`
    pub bulk_args: Option<Vec<Vec<Value>>>,
    /// Fixed number of requests; exclusive with `duration`
    pub iterations: Option<u64>,
    /// Keep issuing requests until this much time has passed
    pub duration: Option<Duration>,
}

impl Workload {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            ..Self::default()
        }
    }

    pub fn iterations(mut self, n: u64) -> Self {
        self.iterations = Some(n);
        self
    }

    pub fn duration(mut self, d: Duration) -> Self {
        self.duration = Some(d);
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn bulk_args(mut self, bulk_args: Vec<Vec<Value>>) -> Self {
        self.bulk_args = Some(bulk_args);
        self
    }

    /// Rows per request when running in bulk mode.
    pub fn bulk_size(&self) -> Option<usize> {
        self.bulk_args.as_ref().map(Vec::len)
    }

    fn validate(&self) -> Result<()> {
        if self.args.is_some() && self.bulk_args.is_some() {
            return Err(Error::config("args and bulk_args are mutually exclusive"));
        }
        if self.iterations.is_some() && self.duration.is_some() {
            return Err(Error::config(
                "iterations and duration are mutually exclusive",
            ));
        }
        if self.iterations == Some(0) {
            return Err(Error::config("iterations must be greater than 0"));
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(Error::config("duration must be greater than 0"));
        }
        Ok(())
    }

    fn call(&self) -> Call {
        match &self.bulk_args {
            Some(rows) => Call::Bulk(Arc::new(rows.clone())),
            None => Call::Single(self.args.clone().map(Arc::new)),
        }
    }
}

/// A statement and the argument rows sent with it in one bulk request.
pub type BulkBatch = (String, Vec<Vec<Value>>);

/// Arguments for one request. Shared between all requests of a run.
#[derive(Debug, Clone)]
enum Call {
    Single(Option<Arc<Vec<Value>>>),
    Bulk(Arc<Vec<Vec<Value>>>),
}

type CallStream = Box<dyn Iterator<Item = (Arc<str>, Call)> + Send>;

async fn dispatch<C: Client + ?Sized>(client: &C, stmt: &str, call: &Call) -> Result<Response> {
    match call {
        Call::Single(args) => client.execute(stmt, args.as_deref().map(Vec::as_slice)).await,
        Call::Bulk(rows) => client.execute_many(stmt, rows).await,
    }
}

// ─── Timed stats ─────────────────────────────────────────────────

/// Statistics gathered by one run, bracketed by its start and end time
/// (epoch milliseconds).
#[derive(Debug, Clone)]
pub struct TimedStats {
    pub started: i64,
    pub ended: i64,
    pub stats: Arc<Stats>,
}

// ─── Runner ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    WarmingUp,
    Measuring,
    Closed,
}

/// Drives warmup and measurement of statements against one client.
pub struct Runner<C: Client> {
    client: Arc<C>,
    scheduler: Scheduler,
    concurrency: usize,
    sample_mode: SampleMode,
    state: RunnerState,
}

impl<C: Client> Runner<C> {
    pub fn new(client: Arc<C>, scheduler: Scheduler, concurrency: usize) -> Self {
        Self {
            client,
            scheduler,
            concurrency,
            sample_mode: SampleMode::default(),
            state: RunnerState::Created,
        }
    }

    pub fn with_sample_mode(mut self, mode: SampleMode) -> Self {
        self.sample_mode = mode;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == RunnerState::Closed {
            return Err(Error::config("runner is already closed"));
        }
        Ok(())
    }

    pub async fn server_version(&self) -> Result<VersionInfo> {
        self.ensure_open()?;
        self.client.get_server_version().await
    }

    /// Issues `n` unmeasured requests, one at a time.
    pub async fn warmup(&mut self, statement: &str, n: u64) -> Result<()> {
        self.ensure_open()?;
        if n == 0 {
            return Ok(());
        }
        self.state = RunnerState::WarmingUp;
        tracing::debug!(statement, n, "warming up");

        let stmt: Arc<str> = Arc::from(statement);
        let client = self.client.clone();
        let warm = move |_| {
            let client = client.clone();
            let stmt = stmt.clone();
            async move { client.execute(&stmt, None).await.map(|_| ()) }
        };
        self.scheduler.run_many(0..n, warm, 0, Some(n)).await?;
        Ok(())
    }

    /// Measures `workload` and returns the collected statistics.
    pub async fn run(&mut self, workload: &Workload) -> Result<TimedStats> {
        self.ensure_open()?;
        workload.validate()?;
        self.state = RunnerState::Measuring;

        let item: (Arc<str>, Call) = (Arc::from(workload.statement.as_str()), workload.call());
        let (items, total): (CallStream, _) = match workload.duration {
            Some(d) => (Box::new(Timeboxed::new(std::iter::repeat(item), d)), None),
            None => {
                let n = workload.iterations.unwrap_or(DEFAULT_ITERATIONS);
                (Box::new(std::iter::repeat(item).take(n as usize)), Some(n))
            }
        };

        tracing::info!(
            statement = %workload.statement,
            concurrency = self.concurrency,
            iterations = ?total,
            duration = ?workload.duration,
            "measuring"
        );
        self.measure_calls(items, total).await
    }

    /// Measures one bulk request per batch, in order. Used for insert
    /// benchmarks where every request carries different rows.
    pub async fn run_batches<I>(&mut self, batches: I, total: Option<u64>) -> Result<TimedStats>
    where
        I: IntoIterator<Item = BulkBatch>,
        I::IntoIter: Send + 'static,
    {
        self.ensure_open()?;
        self.state = RunnerState::Measuring;
        let items = batches
            .into_iter()
            .map(|(stmt, rows)| (Arc::<str>::from(stmt), Call::Bulk(Arc::new(rows))));

        tracing::info!(concurrency = self.concurrency, batches = ?total, "measuring bulk inserts");
        self.measure_calls(Box::new(items), total).await
    }

    async fn measure_calls(&self, items: CallStream, total: Option<u64>) -> Result<TimedStats> {
        let stats = Arc::new(Stats::from_mode(self.sample_mode));
        let client = self.client.clone();
        let sink = stats.clone();
        let timed = move |(stmt, call): (Arc<str>, Call)| {
            let client = client.clone();
            let stats = sink.clone();
            async move { measure(&stats, dispatch(client.as_ref(), &stmt, &call)).await }
        };

        let started = epoch_ms();
        self.scheduler
            .run_many(items, timed, self.concurrency, total)
            .await?;
        let ended = epoch_ms();

        Ok(TimedStats {
            started,
            ended,
            stats,
        })
    }

    /// Releases the client. The runner cannot be used afterwards.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == RunnerState::Closed {
            return Ok(());
        }
        self.state = RunnerState::Closed;
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_and_bulk_args_conflict() {
        let w = Workload::new("insert into t (x) values (?)")
            .args(vec![1.into()])
            .bulk_args(vec![vec![1.into()]]);
        assert!(matches!(w.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn iterations_and_duration_conflict() {
        let w = Workload::new("select 1")
            .iterations(3)
            .duration(Duration::from_secs(1));
        assert!(matches!(w.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn plain_workload_is_single_without_args() {
        let w = Workload::new("select 1");
        assert!(w.validate().is_ok());
        assert!(matches!(w.call(), Call::Single(None)));
        assert_eq!(w.bulk_size(), None);
    }

    #[test]
    fn bulk_size_counts_rows() {
        let w = Workload::new("insert").bulk_args(vec![vec![1.into()], vec![2.into()]]);
        assert_eq!(w.bulk_size(), Some(2));
        assert!(matches!(w.call(), Call::Bulk(_)));
    }
}

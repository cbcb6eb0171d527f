use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::clients::{Client, VersionInfo};
use crate::config::{OutputFormat, RunConfig};
use crate::engine::{BenchResult, BulkBatch, FailIf, Runner, Workload};
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

// ─── Spec file types ─────────────────────────────────────────────

/// A benchmark definition: setup, measured inserts and queries, teardown.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BenchSpec {
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub setup: Instructions,
    /// Measured bulk inserts, run before the queries
    #[serde(default)]
    pub load_data: Vec<DataFile>,
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
    #[serde(default)]
    pub teardown: Instructions,
}

/// Unmeasured statements, inline or read from `;`-separated SQL files,
/// plus JSON-lines files bulk loaded into tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub statement_files: Vec<PathBuf>,
    #[serde(default)]
    pub data_files: Vec<DataFile>,
}

/// Rows to insert into `target`, one JSON object per line of `source`.
#[derive(Debug, Clone, Deserialize)]
pub struct DataFile {
    pub target: String,
    pub source: PathBuf,
    /// Rows per bulk request
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default = "default_load_concurrency")]
    pub concurrency: usize,
    /// Rows to insert when measured; batches repeat if the file is shorter
    #[serde(default)]
    pub num_records: Option<u64>,
}

fn default_bulk_size() -> usize {
    5000
}

fn default_load_concurrency() -> usize {
    25
}

impl DataFile {
    /// Reads `source` (relative to `base`) into bulk insert batches.
    pub fn bulk_inserts(&self, base: &Path) -> Result<Vec<BulkBatch>> {
        if self.bulk_size == 0 {
            return Err(Error::config("bulk_size must be greater than 0"));
        }
        let path = base.join(&self.source);
        let mut inserts = Vec::new();
        for (i, line) in BufReader::new(File::open(&path)?).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(&line)
                .map_err(|e| Error::config(format!("{}:{}: {e}", path.display(), i + 1)))?;
            inserts.push(to_insert(&self.target, &record)?);
        }
        Ok(as_bulk_queries(inserts, self.bulk_size))
    }

    /// Number of measured bulk requests for `num_records`.
    fn requests(&self) -> Option<u64> {
        self.num_records
            .map(|n| (n / self.bulk_size as u64).max(1))
    }
}

/// Groups consecutive inserts that share a statement into batches of at
/// most `bulk_size` rows.
pub fn as_bulk_queries(
    inserts: impl IntoIterator<Item = (String, Vec<Value>)>,
    bulk_size: usize,
) -> Vec<BulkBatch> {
    let mut batches: Vec<BulkBatch> = Vec::new();
    for (stmt, args) in inserts {
        match batches.last_mut() {
            Some((last, rows)) if *last == stmt && rows.len() < bulk_size => rows.push(args),
            _ => batches.push((stmt, vec![args])),
        }
    }
    batches
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySpec {
    pub statement: String,
    #[serde(default)]
    pub args: Option<Vec<Value>>,
    #[serde(default)]
    pub bulk_args: Option<Vec<Vec<Value>>>,
    /// Skip the query on servers older than this (`major.minor.patch`)
    #[serde(default)]
    pub min_version: Option<String>,
    #[serde(flatten)]
    pub run: RunConfig,
}

impl QuerySpec {
    pub fn workload(&self) -> Result<Workload> {
        self.run.validate()?;
        Ok(Workload {
            statement: self.statement.clone(),
            args: self.args.clone(),
            bulk_args: self.bulk_args.clone(),
            iterations: self.run.iterations,
            duration: self.run.duration()?,
        })
    }
}

impl BenchSpec {
    /// Loads a `.json` or `.toml` spec; `meta.name` defaults to the file name.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let invalid = |e: &dyn std::fmt::Display| {
            Error::config(format!("invalid spec {}: {e}", path.display()))
        };
        let mut spec: BenchSpec = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| invalid(&e))?,
            Some("toml") => toml::from_str(&text).map_err(|e| invalid(&e))?,
            _ => {
                return Err(Error::config(format!(
                    "unsupported spec format {}; use .json or .toml",
                    path.display()
                )))
            }
        };
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            spec.meta
                .entry("name")
                .or_insert_with(|| Value::String(name.to_owned()));
        }
        Ok(spec)
    }
}

impl Instructions {
    /// All statements, file contents first, with paths relative to `base`.
    pub fn statements(&self, base: &Path) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for file in &self.statement_files {
            let text = std::fs::read_to_string(base.join(file))?;
            out.extend(split_statements(&text));
        }
        out.extend(self.statements.iter().cloned());
        Ok(out)
    }
}

/// Splits SQL text on `;`, dropping blank statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// `"5.6.2"` → `(5, 6, 2)`; missing parts count as 0.
pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.').map(|p| p.parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().unwrap_or(Ok(0)).ok()?;
    let patch = parts.next().unwrap_or(Ok(0)).ok()?;
    Some((major, minor, patch))
}

// ─── Actions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    Setup,
    #[value(name = "load_data", alias = "load-data")]
    LoadData,
    Queries,
    Teardown,
}

// ─── Result sinks ────────────────────────────────────────────────

const BENCHMARK_TABLE: &str = r#"
create table if not exists benchmarks (
    version_info object (strict) as (
        number string,
        hash string,
        date timestamp
    ),
    statement string,
    meta object as (
        name string
    ),
    started timestamp,
    ended timestamp,
    concurrency int,
    bulk_size int,
    runtime_stats object (strict) as (
        min double,
        max double,
        mean double,
        error_margin double,
        median double,
        percentile object as (
            "50" double,
            "75" double,
            "90" double,
            "95" double,
            "99" double,
            "99_9" double
        ),
        n integer,
        variance double,
        stdev double,
        samples array(double)
    )
) clustered into 8 shards with (number_of_replicas = '1-3', column_policy='strict')
"#;

/// Where finished results go.
pub enum ResultSink {
    /// Print to stdout.
    Print(OutputFormat),
    /// Insert into the `benchmarks` table of another cluster.
    Table {
        client: Arc<dyn Client>,
        table_created: bool,
    },
}

impl ResultSink {
    pub fn table(client: Arc<dyn Client>) -> Self {
        Self::Table {
            client,
            table_created: false,
        }
    }

    pub async fn process(&mut self, result: &BenchResult) -> Result<()> {
        match self {
            Self::Print(format) => {
                println!("{}", result.render(*format)?);
            }
            Self::Table {
                client,
                table_created,
            } => {
                if !*table_created {
                    client.execute(BENCHMARK_TABLE, None).await?;
                    *table_created = true;
                }
                let (stmt, args) = to_insert("benchmarks", &result.to_value()?)?;
                client.execute(&stmt, Some(args.as_slice())).await?;
                tracing::info!(statement = %result.statement, "result stored");
            }
        }
        Ok(())
    }
}

/// Insert statement and arguments for one JSON object row.
pub fn to_insert(table: &str, record: &Value) -> Result<(String, Vec<Value>)> {
    let Value::Object(fields) = record else {
        return Err(Error::config("only JSON objects can be inserted"));
    };
    let columns: Vec<String> = fields.keys().map(|k| format!("\"{k}\"")).collect();
    let placeholders = vec!["?"; fields.len()].join(", ");
    let stmt = format!(
        "insert into {table} ({}) values ({placeholders})",
        columns.join(", ")
    );
    Ok((stmt, fields.values().cloned().collect()))
}

// ─── Executor ────────────────────────────────────────────────────

/// Runs a [`BenchSpec`] against the benchmark cluster.
pub struct SpecExecutor<C: Client> {
    client: Arc<C>,
    scheduler: Scheduler,
    version_info: VersionInfo,
    sink: ResultSink,
    fail_if: Option<FailIf>,
}

impl<C: Client> SpecExecutor<C> {
    pub async fn new(client: Arc<C>, scheduler: Scheduler, sink: ResultSink) -> Result<Self> {
        let version_info = client.get_server_version().await?;
        Ok(Self {
            client,
            scheduler,
            version_info,
            sink,
            fail_if: None,
        })
    }

    pub fn with_fail_if(mut self, fail_if: Option<FailIf>) -> Self {
        self.fail_if = fail_if;
        self
    }

    /// Setup, load data, queries and teardown, or only the given `actions`.
    /// Teardown runs even when an earlier step failed; the first error is
    /// returned.
    pub async fn run(&mut self, spec: &BenchSpec, base: &Path, actions: &[Action]) -> Result<()> {
        let wants = |a: Action| actions.is_empty() || actions.contains(&a);
        let meta = (!spec.meta.is_empty()).then(|| Value::Object(spec.meta.clone()));

        let mut outcome = Ok(());
        if wants(Action::Setup) {
            tracing::info!("running setup");
            outcome = self.exec_instructions(&spec.setup, base).await;
        }
        if outcome.is_ok() && wants(Action::LoadData) {
            for data in &spec.load_data {
                outcome = self.run_load_data(data, base, &meta).await;
                if outcome.is_err() {
                    break;
                }
            }
        }
        if outcome.is_ok() && wants(Action::Queries) {
            tracing::info!("running benchmark");
            outcome = self.run_queries(&spec.queries, &meta).await;
        }
        if wants(Action::Teardown) {
            tracing::info!("running teardown");
            let teardown = self.exec_instructions(&spec.teardown, base).await;
            outcome = outcome.and(teardown);
        }
        outcome
    }

    async fn exec_instructions(&self, instructions: &Instructions, base: &Path) -> Result<()> {
        for stmt in instructions.statements(base)? {
            tracing::debug!(statement = %stmt, "executing");
            self.client.execute(&stmt, None).await?;
        }

        for data in &instructions.data_files {
            let batches = data.bulk_inserts(base)?;
            let total = batches.len() as u64;
            tracing::info!(table = %data.target, batches = total, "loading data");

            let client = self.client.clone();
            let insert = move |(stmt, rows): BulkBatch| {
                let client = client.clone();
                async move { client.execute_many(&stmt, &rows).await.map(|_| ()) }
            };
            self.scheduler
                .run_many(batches, insert, data.concurrency, Some(total))
                .await?;
            self.client
                .execute(&format!("refresh table {}", data.target), None)
                .await?;
        }
        Ok(())
    }

    async fn run_load_data(&mut self, data: &DataFile, base: &Path, meta: &Option<Value>) -> Result<()> {
        let batches = data.bulk_inserts(base)?;
        let Some(statement) = batches.first().map(|(stmt, _)| stmt.clone()) else {
            tracing::warn!(source = %data.source.display(), "no rows to load, skipping");
            return Ok(());
        };
        let (batches, total): (Box<dyn Iterator<Item = BulkBatch> + Send>, u64) =
            match data.requests() {
                Some(n) => (Box::new(batches.into_iter().cycle().take(n as usize)), n),
                None => {
                    let n = batches.len() as u64;
                    (Box::new(batches.into_iter()), n)
                }
            };
        tracing::info!(
            table = %data.target,
            bulk_size = data.bulk_size,
            concurrency = data.concurrency,
            requests = total,
            "running load data"
        );

        let mut runner = Runner::new(self.client.clone(), self.scheduler.clone(), data.concurrency);
        let timed = runner.run_batches(batches, Some(total)).await?;
        let result = BenchResult::new(
            self.version_info.clone(),
            statement,
            meta.clone(),
            &timed,
            data.concurrency,
            Some(data.bulk_size),
        );
        self.emit(&result).await
    }

    async fn emit(&mut self, result: &BenchResult) -> Result<()> {
        self.sink.process(result).await?;
        if let Some(gate) = &self.fail_if {
            gate.check(result)?;
        }
        Ok(())
    }

    fn should_skip(&self, query: &QuerySpec) -> bool {
        let (Some(min), Some(server)) = (
            query.min_version.as_deref().and_then(parse_version),
            parse_version(&self.version_info.number),
        ) else {
            return false;
        };
        min > server
    }

    async fn run_queries(&mut self, queries: &[QuerySpec], meta: &Option<Value>) -> Result<()> {
        for query in queries {
            if self.should_skip(query) {
                tracing::info!(
                    statement = %query.statement,
                    min_version = ?query.min_version,
                    server_version = %self.version_info.number,
                    "skipping query"
                );
                continue;
            }
            let workload = query.workload()?;
            tracing::info!(
                statement = %query.statement,
                concurrency = query.run.concurrency,
                iterations = ?query.run.iterations,
                duration = ?query.run.duration,
                "running query"
            );

            let mut runner = Runner::new(self.client.clone(), self.scheduler.clone(), query.run.concurrency)
                .with_sample_mode(query.run.sample_mode);
            runner.warmup(&query.statement, query.run.warmup).await?;
            let timed = runner.run(&workload).await?;

            let result = BenchResult::new(
                self.version_info.clone(),
                query.statement.clone(),
                meta.clone(),
                &timed,
                query.run.concurrency,
                workload.bulk_size(),
            );
            self.emit(&result).await?;
        }
        Ok(())
    }
}

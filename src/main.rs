use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cratedb_bench::clients::http::HttpOptions;
use cratedb_bench::clients::{Client, HttpClient};
use cratedb_bench::config::{duration_from_secs, OutputFormat, SampleMode};
use cratedb_bench::engine::{BenchResult, FailIf, Runner, Workload};
use cratedb_bench::scheduler::{Scheduler, Shutdown};
use cratedb_bench::spec::{Action, BenchSpec, ResultSink, SpecExecutor};
use cratedb_bench::{Error, Result};

/// How often progress is logged during a run.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "cratedb-bench", about = "Latency benchmarks for CrateDB clusters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run statements a number of times and print the runtime stats.
    Timeit(TimeitArgs),
    /// Run a benchmark file: setup, load data, queries, teardown.
    RunSpec(RunSpecArgs),
}

#[derive(clap::Args, Debug)]
struct TimeitArgs {
    /// Comma or space separated CrateDB hosts.
    #[arg(long, default_value = "localhost:4200")]
    hosts: String,

    /// Statement to measure; read line by line from stdin if omitted.
    #[arg(short, long)]
    stmt: Option<String>,

    /// Unmeasured requests issued before each statement.
    #[arg(short, long, default_value_t = 30)]
    warmup: u64,

    /// Measured requests per statement.
    #[arg(short, long, default_value_t = 30, conflicts_with = "duration")]
    repeat: u64,

    /// Measure for this many seconds instead of a fixed repeat count.
    #[arg(short, long)]
    duration: Option<f64>,

    /// Requests kept in flight at the same time.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// all | reservoir | reservoir:<N>
    #[arg(long, default_value = "reservoir")]
    sample_mode: SampleMode,

    /// full (JSON) | short (text)
    #[arg(long = "output-fmt", default_value = "full")]
    output_fmt: OutputFormat,

    /// Exit non-zero when this expression holds for a result.
    #[arg(long)]
    fail_if: Option<String>,
}

#[derive(clap::Args, Debug)]
struct RunSpecArgs {
    /// Path to a .json or .toml benchmark file.
    spec: PathBuf,

    /// CrateDB hosts the benchmark runs against.
    benchmark_hosts: String,

    /// Store results in these hosts' `benchmarks` table instead of printing.
    #[arg(long)]
    result_hosts: Option<String>,

    /// full (JSON) | short (text)
    #[arg(long = "output-fmt", default_value = "short")]
    output_fmt: OutputFormat,

    /// Only run these parts of the benchmark file; may be repeated.
    #[arg(long, value_enum)]
    action: Vec<Action>,

    /// Exit non-zero when this expression holds for a result.
    #[arg(long)]
    fail_if: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Results go to stdout; keep logs on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ── Ctrl-C stops the current run ─────────────────────────────
    let shutdown = Shutdown::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight requests");
            on_signal.trigger();
        }
    });
    let scheduler = Scheduler::new(shutdown).with_progress_interval(PROGRESS_INTERVAL);

    let outcome = match cli.command {
        Command::Timeit(args) => timeit(args, scheduler).await,
        Command::RunSpec(args) => run_spec(args, scheduler).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

// ─── timeit ──────────────────────────────────────────────────────

async fn timeit(args: TimeitArgs, scheduler: Scheduler) -> Result<()> {
    let fail_if = args.fail_if.as_deref().map(FailIf::parse).transpose()?;
    let statements = match &args.stmt {
        Some(stmt) => vec![stmt.clone()],
        None => read_stdin_statements()?,
    };
    if statements.is_empty() {
        return Err(Error::config(
            "No SQL statements provided. Use --stmt or provide statements via stdin",
        ));
    }

    let options = HttpOptions {
        pool_size: args.concurrency.max(1),
        ..HttpOptions::default()
    };

    for stmt in statements {
        let client = Arc::new(HttpClient::connect(&args.hosts, options.clone())?);
        let mut runner = Runner::new(client, scheduler.clone(), args.concurrency)
            .with_sample_mode(args.sample_mode);

        let measured = async {
            let workload = match args.duration {
                Some(secs) => Workload::new(stmt.as_str()).duration(duration_from_secs(secs)?),
                None => Workload::new(stmt.as_str()).iterations(args.repeat),
            };
            let version_info = runner.server_version().await?;
            runner.warmup(&stmt, args.warmup).await?;
            let timed = runner.run(&workload).await?;
            Ok::<_, Error>(BenchResult::new(
                version_info,
                stmt.as_str(),
                None,
                &timed,
                args.concurrency,
                None,
            ))
        }
        .await;
        runner.close().await?;

        let result = measured?;
        println!("{}", result.render(args.output_fmt)?);
        if let Some(gate) = &fail_if {
            gate.check(&result)?;
        }
    }
    Ok(())
}

fn read_stdin_statements() -> Result<Vec<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(Vec::new());
    }
    let mut statements = Vec::new();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim().trim_end_matches(';');
        if !line.is_empty() {
            statements.push(line.to_owned());
        }
    }
    Ok(statements)
}

// ─── run-spec ────────────────────────────────────────────────────

async fn run_spec(args: RunSpecArgs, scheduler: Scheduler) -> Result<()> {
    let fail_if = args.fail_if.as_deref().map(FailIf::parse).transpose()?;
    let spec = BenchSpec::from_file(&args.spec)?;
    let base = args
        .spec
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();

    let sink = match &args.result_hosts {
        Some(hosts) => {
            let client: Arc<dyn Client> = Arc::new(HttpClient::connect(hosts, HttpOptions::default())?);
            ResultSink::table(client)
        }
        None => ResultSink::Print(args.output_fmt),
    };

    let client = Arc::new(HttpClient::connect(&args.benchmark_hosts, HttpOptions::default())?);
    let mut executor = SpecExecutor::new(client.clone(), scheduler, sink)
        .await?
        .with_fail_if(fail_if);
    let outcome = executor.run(&spec, &base, &args.action).await;
    client.close().await?;
    outcome
}

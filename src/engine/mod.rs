pub mod fail_if;
pub mod result;
pub mod runner;

pub use fail_if::FailIf;
pub use result::{short_output, BenchResult};
pub use runner::{BulkBatch, Runner, RunnerState, TimedStats, Workload, DEFAULT_ITERATIONS};

//! Latency benchmarking for CrateDB clusters.
//!
//! A [`Runner`](engine::Runner) repeats a statement against a
//! [`Client`](clients::Client) with bounded concurrency through the
//! [`Scheduler`](scheduler::Scheduler), feeds every request duration into a
//! reservoir-sampled [`Stats`](metrics::Stats) aggregator and wraps the
//! outcome in a [`BenchResult`](engine::BenchResult).

pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod scheduler;
pub mod spec;
pub mod timing;

pub use error::{Error, Result};

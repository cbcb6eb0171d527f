#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use cratedb_bench::clients::{Client, Response, VersionInfo};
use cratedb_bench::{Error, Result};

/// In-process stand-in for a database: reports a fixed duration, can sleep
/// to simulate work, and tracks how many calls overlap.
pub struct FakeClient {
    pub duration: f64,
    pub delay: Option<Duration>,
    pub version: String,
    /// 0-based call numbers that fail
    pub fail_calls: HashSet<usize>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    closed: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub bulk_sizes: Mutex<Vec<usize>>,
}

impl FakeClient {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            delay: None,
            version: "5.6.2".into(),
            fail_calls: HashSet::new(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            bulk_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_calls = calls.iter().copied().collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call(&self, stmt: &str) -> Result<Response> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.executed.lock().push(stmt.to_owned());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_calls.contains(&n) {
            return Err(Error::Request(format!("call {n} failed")));
        }
        Ok(Response {
            duration: self.duration,
            rows: vec![],
        })
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn execute(&self, stmt: &str, _args: Option<&[Value]>) -> Result<Response> {
        self.call(stmt).await
    }

    async fn execute_many(&self, stmt: &str, bulk_args: &[Vec<Value>]) -> Result<Response> {
        self.bulk_sizes.lock().push(bulk_args.len());
        self.call(stmt).await
    }

    async fn get_server_version(&self) -> Result<VersionInfo> {
        Ok(VersionInfo {
            number: self.version.clone(),
            hash: Some("deadbeef".into()),
            date: None,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use http::HttpClient;

/// Outcome of one request against the database under test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    /// Time the request took, in milliseconds
    pub duration: f64,
    pub rows: Vec<Value>,
}

/// Build information reported by the database under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub number: String,
    pub hash: Option<String>,
    pub date: Option<String>,
}

/// The database a benchmark talks to.
///
/// One client is shared by every in-flight request of a run, so
/// implementations must allow concurrent calls. How many physical
/// connections they open is up to them.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Run one statement with optional positional arguments.
    async fn execute(&self, stmt: &str, args: Option<&[Value]>) -> Result<Response>;

    /// Run one statement once per argument row, in a single request.
    async fn execute_many(&self, stmt: &str, bulk_args: &[Vec<Value>]) -> Result<Response>;

    async fn get_server_version(&self) -> Result<VersionInfo>;

    /// Release connections. Called once the runner is done with the client.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

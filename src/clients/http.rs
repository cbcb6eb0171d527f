use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use super::{Client, Response, VersionInfo};
use crate::error::{Error, Result};
use crate::timing::elapsed_ms;

// ─── Configuration ───────────────────────────────────────────────

/// Used when no hosts are given.
pub const DEFAULT_HOSTS: &str = "localhost:4200";

/// Idle connections kept per host.
const DEFAULT_POOL_SIZE: usize = 25;

/// Options for [`HttpClient::connect`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Max idle connections per host; independent of benchmark concurrency
    pub pool_size: usize,
    /// `set <key>=<value>` statements issued before the first request
    pub session_settings: BTreeMap<String, String>,
    /// Per-request timeout; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            session_settings: BTreeMap::new(),
            timeout: None,
        }
    }
}

// ─── HttpClient ──────────────────────────────────────────────────

/// Talks to CrateDB's `/_sql` HTTP endpoint, round-robin across hosts.
///
/// `reqwest::Client` is cheaply shareable: every in-flight request goes
/// through the same connection pool.
pub struct HttpClient {
    http: reqwest::Client,
    hosts: Vec<Url>,
    sql_urls: Vec<Url>,
    next: AtomicUsize,
    session_settings: BTreeMap<String, String>,
    session_ready: OnceCell<()>,
}

impl HttpClient {
    /// Builds a client for a comma or whitespace separated host list.
    pub fn connect(hosts: &str, options: HttpOptions) -> Result<Self> {
        let hosts = to_http_hosts(if hosts.trim().is_empty() {
            DEFAULT_HOSTS
        } else {
            hosts
        })?;
        let sql_urls = hosts.iter().map(append_sql).collect();

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(options.pool_size)
            .danger_accept_invalid_certs(!verify_ssl_from_first(&hosts));
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            hosts,
            sql_urls,
            next: AtomicUsize::new(0),
            session_settings: options.session_settings,
            session_ready: OnceCell::new(),
        })
    }

    fn next_url(&self) -> &Url {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        &self.sql_urls[i % self.sql_urls.len()]
    }

    async fn ensure_session(&self) -> Result<()> {
        self.session_ready
            .get_or_try_init(|| async {
                for url in &self.sql_urls {
                    for (key, value) in &self.session_settings {
                        let stmt = format!("set {key}={value}");
                        self.post(url, &stmt, &json!({ "stmt": stmt })).await?;
                    }
                }
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }

    async fn post(&self, url: &Url, stmt: &str, payload: &Value) -> Result<Value> {
        let resp = self.http.post(url.clone()).json(payload).send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::Request(resp.text().await?));
        }
        let body: Value = resp.json().await?;
        if let Some(err) = body.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| err.to_string());
            return Err(Error::Request(format!("{message} occurred using: {stmt}")));
        }
        Ok(body)
    }

    async fn timed_post(&self, stmt: &str, payload: Value, rows_key: &str) -> Result<Response> {
        self.ensure_session().await?;
        let url = self.next_url();
        let t0 = Instant::now();
        let body = self.post(url, stmt, &payload).await?;
        let duration = elapsed_ms(t0);

        let rows = match body.get(rows_key) {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        Ok(Response { duration, rows })
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn execute(&self, stmt: &str, args: Option<&[Value]>) -> Result<Response> {
        let payload = match args {
            Some(args) if !args.is_empty() => json!({ "stmt": stmt, "args": args }),
            _ => json!({ "stmt": stmt }),
        };
        self.timed_post(stmt, payload, "rows").await
    }

    async fn execute_many(&self, stmt: &str, bulk_args: &[Vec<Value>]) -> Result<Response> {
        let payload = json!({ "stmt": stmt, "bulk_args": bulk_args });
        self.timed_post(stmt, payload, "results").await
    }

    async fn get_server_version(&self) -> Result<VersionInfo> {
        let mut root = self.hosts[0].clone();
        root.set_path("/");
        root.set_query(None);
        let body: Value = self.http.get(root).send().await?.json().await?;
        parse_version_info(&body)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Splits a comma or whitespace separated host list, adding `http://` where
/// no scheme is given.
pub fn to_http_hosts(hosts: &str) -> Result<Vec<Url>> {
    let hosts: Vec<Url> = hosts
        .replace(',', " ")
        .split_whitespace()
        .map(|h| {
            let uri = if h.starts_with("http://") || h.starts_with("https://") {
                h.to_owned()
            } else {
                format!("http://{h}")
            };
            Url::parse(&uri).map_err(|e| Error::config(format!("invalid host {h:?}: {e}")))
        })
        .collect::<Result<_>>()?;
    if hosts.is_empty() {
        return Err(Error::config("no hosts given"));
    }
    Ok(hosts)
}

/// `http://n1:4200/?x=y` → `http://n1:4200/_sql`
pub fn append_sql(host: &Url) -> Url {
    let mut url = host.clone();
    url.set_path("_sql");
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Value of the first `verify_ssl` query parameter found, defaulting to true.
pub fn verify_ssl_from_first(hosts: &[Url]) -> bool {
    hosts
        .iter()
        .find_map(|h| {
            h.query_pairs()
                .find(|(k, _)| k == "verify_ssl")
                .map(|(_, v)| !v.eq_ignore_ascii_case("false"))
        })
        .unwrap_or(true)
}

/// Keeps `d` only if it is a `YYYY-MM-DD` date.
pub fn date_or_none(d: &str) -> Option<String> {
    chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d")
        .ok()
        .map(|_| d.to_owned())
}

fn parse_version_info(body: &Value) -> Result<VersionInfo> {
    let version = body
        .get("version")
        .ok_or_else(|| Error::Request(format!("no version in server response: {body}")))?;
    let field = |name: &str| version.get(name).and_then(Value::as_str);
    Ok(VersionInfo {
        number: field("number").unwrap_or_default().to_owned(),
        hash: field("build_hash").map(str::to_owned),
        date: field("build_timestamp")
            .and_then(|ts| ts.get(..10))
            .and_then(date_or_none),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(s: &str) -> Vec<String> {
        to_http_hosts(s)
            .unwrap()
            .iter()
            .map(|u| u.to_string())
            .collect()
    }

    #[test]
    fn splits_and_prefixes_hosts() {
        assert_eq!(hosts("n1:4200,n2:4200"), ["http://n1:4200/", "http://n2:4200/"]);
        assert_eq!(hosts("n1:4200 n2:4200"), ["http://n1:4200/", "http://n2:4200/"]);
        assert_eq!(hosts("https://n1:4200"), ["https://n1:4200/"]);
    }

    #[test]
    fn empty_host_list_is_a_config_error() {
        assert!(matches!(to_http_hosts(" , "), Err(Error::Configuration(_))));
    }

    #[test]
    fn sql_url_drops_query() {
        let host = Url::parse("https://crate@n1:4200/?verify_ssl=false").unwrap();
        assert_eq!(append_sql(&host).as_str(), "https://crate@n1:4200/_sql");
    }

    #[test]
    fn verify_ssl_from_first_host_with_the_parameter() {
        let h = to_http_hosts("https://h1:4200/?verify_ssl=False https://h2:4200/?verify_ssl=True")
            .unwrap();
        assert!(!verify_ssl_from_first(&h));
        let h = to_http_hosts("https://myhost:4200/").unwrap();
        assert!(verify_ssl_from_first(&h));
    }

    #[test]
    fn dates_must_be_valid() {
        assert_eq!(date_or_none("2017-02-27").as_deref(), Some("2017-02-27"));
        assert_eq!(date_or_none("NA"), None);
    }

    #[test]
    fn parses_root_endpoint_version() {
        let body = json!({
            "ok": true,
            "version": {
                "number": "5.6.2",
                "build_hash": "abc123",
                "build_timestamp": "2024-01-15T10:00:00Z",
            }
        });
        let v = parse_version_info(&body).unwrap();
        assert_eq!(v.number, "5.6.2");
        assert_eq!(v.hash.as_deref(), Some("abc123"));
        assert_eq!(v.date.as_deref(), Some("2024-01-15"));
    }
}

use std::future::Future;
use std::time::{Duration, Instant};

use crate::clients::Response;
use crate::error::Result;
use crate::metrics::Stats;

/// Floor applied to every recorded latency (ms).
pub const MIN_DURATION_MS: f64 = 0.0001;

/// Milliseconds elapsed since `start`.
pub fn elapsed_ms(start: Instant) -> f64 {
    as_millis_f64(start.elapsed())
}

pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Awaits one request and records its duration into `stats`.
///
/// A failed request records nothing and hands the error back to the
/// scheduler.
pub async fn measure<Fut>(stats: &Stats, call: Fut) -> Result<()>
where
    Fut: Future<Output = Result<Response>>,
{
    let response = call.await?;
    stats.measure(response.duration.max(MIN_DURATION_MS));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn records_reported_duration() {
        let stats = Stats::default();
        measure(&stats, async {
            Ok(Response {
                duration: 12.5,
                rows: vec![],
            })
        })
        .await
        .unwrap();
        assert_eq!(stats.get().mean, Some(12.5));
    }

    #[tokio::test]
    async fn clamps_zero_durations() {
        let stats = Stats::default();
        measure(&stats, async { Ok(Response::default()) }).await.unwrap();
        assert_eq!(stats.get().min, Some(MIN_DURATION_MS));
    }

    #[tokio::test]
    async fn failures_record_nothing() {
        let stats = Stats::default();
        let err = measure(&stats, async { Err(Error::Request("nope".into())) })
            .await
            .unwrap_err();
        assert!(err.is_request_failure());
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn converts_durations_to_millis() {
        assert_eq!(as_millis_f64(Duration::from_micros(1500)), 1.5);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

/// Monotonic count of finished requests (successful or failed), plus the
/// expected total when it is known up front.
#[derive(Debug, Clone)]
pub struct Progress {
    completed: Arc<AtomicU64>,
    total: Option<u64>,
}

impl Progress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            completed: Arc::new(AtomicU64::new(0)),
            total,
        }
    }

    pub(crate) fn incr(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Spawns a task that logs the counter every `every` until aborted.
    pub(crate) fn spawn_reporter(&self, every: Duration) -> JoinHandle<()> {
        let progress = self.clone();
        let mut ticks = IntervalStream::new(tokio::time::interval(every));
        tokio::spawn(async move {
            // First tick fires immediately; nothing to report yet.
            ticks.next().await;
            while ticks.next().await.is_some() {
                match progress.total {
                    Some(total) => tracing::info!(
                        completed = progress.completed(),
                        total,
                        "progress"
                    ),
                    None => tracing::info!(completed = progress.completed(), "progress"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_counter() {
        let progress = Progress::new(Some(3));
        let other = progress.clone();
        progress.incr();
        other.incr();
        assert_eq!(progress.completed(), 2);
        assert_eq!(other.total(), Some(3));
    }

    #[tokio::test]
    async fn reporter_runs_until_aborted() {
        let progress = Progress::new(None);
        let handle = progress.spawn_reporter(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}

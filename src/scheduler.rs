use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::progress::Progress;

// ─── Shutdown signal ─────────────────────────────────────────────

/// Cloneable stop flag shared by every run started from one scheduler.
///
/// Once triggered it stays triggered; producers stop pulling work and any
/// producer parked on a full queue wakes up.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    fn listen(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `rx` observes a triggered shutdown.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    // The sender lives in an Arc held by the scheduler, so `Err` (all
    // senders dropped) cannot happen while a run is active.
    let _ = rx.wait_for(|stop| *stop).await;
}

// ─── Time-bounded work stream ────────────────────────────────────

/// Yields items from `inner` until `duration` has passed since the first
/// item was pulled.
#[derive(Debug)]
pub struct Timeboxed<I> {
    inner: I,
    duration: Duration,
    deadline: Option<Instant>,
}

impl<I> Timeboxed<I> {
    pub fn new(inner: I, duration: Duration) -> Self {
        Self {
            inner,
            duration,
            deadline: None,
        }
    }
}

impl<I: Iterator> Iterator for Timeboxed<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + self.duration);
        if Instant::now() >= deadline {
            return None;
        }
        self.inner.next()
    }
}

// ─── Scheduler ───────────────────────────────────────────────────

/// Scheduling context for measurement runs: owns the shutdown signal and
/// the progress-report cadence. Runners receive one instead of relying on
/// any global runtime state.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    shutdown: Shutdown,
    report_every: Option<Duration>,
}

impl Scheduler {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            report_every: None,
        }
    }

    /// Log progress every `every` while a run is active.
    pub fn with_progress_interval(mut self, every: Duration) -> Self {
        self.report_every = Some(every);
        self
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Runs `f` for every item with at most `concurrency` calls in flight.
    ///
    /// `concurrency` of 0 or 1 awaits each call before pulling the next item
    /// and stops at the first error. Above that, calls are spawned onto the
    /// runtime and awaited in submission order; a failing call does not stop
    /// its siblings, the whole stream is drained and the last error seen is
    /// returned afterwards.
    ///
    /// `total` is only used for progress reporting.
    pub async fn run_many<I, A, F, Fut>(
        &self,
        items: I,
        f: F,
        concurrency: usize,
        total: Option<u64>,
    ) -> Result<Progress>
    where
        I: IntoIterator<Item = A>,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let progress = Progress::new(total);
        let reporter = self
            .report_every
            .map(|every| progress.spawn_reporter(every));

        let outcome = if concurrency <= 1 {
            self.run_sequential(items, f, &progress).await
        } else {
            self.run_concurrent(items, f, concurrency, &progress).await
        };

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        tracing::debug!(completed = progress.completed(), "run finished");
        outcome.map(|()| progress)
    }

    async fn run_sequential<I, A, F, Fut>(
        &self,
        items: I,
        f: F,
        progress: &Progress,
    ) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        for args in items {
            if self.shutdown.is_triggered() {
                return Err(Error::Interrupted);
            }
            let outcome = f(args).await;
            progress.incr();
            outcome?;
        }
        Ok(())
    }

    async fn run_concurrent<I, A, F, Fut>(
        &self,
        items: I,
        f: F,
        concurrency: usize,
        progress: &Progress,
    ) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // The consumer holds one handle while awaiting it, so the queue keeps
        // `concurrency - 1` more; together that is the in-flight bound.
        let (tx, mut rx) = mpsc::channel::<JoinHandle<Result<()>>>(concurrency - 1);
        let mut stop = self.shutdown.listen();

        let producer = async move {
            let mut items = items.into_iter();
            loop {
                if *stop.borrow() {
                    return true;
                }
                let permit = tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => return true,
                    permit = tx.reserve() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return false,
                    },
                };
                let Some(args) = items.next() else {
                    return false;
                };
                permit.send(tokio::spawn(f(args)));
            }
            // `tx` drops on return, closing the queue for the consumer.
        };

        let consumer = async {
            let mut last_error = None;
            while let Some(handle) = rx.recv().await {
                let outcome = handle.await.map_err(Error::from).and_then(|r| r);
                if let Err(err) = outcome {
                    tracing::warn!(error = %err, "request failed, draining remaining requests");
                    last_error = Some(err);
                }
                progress.incr();
            }
            last_error
        };

        let (interrupted, last_error) = tokio::join!(producer, consumer);

        match last_error {
            Some(err) => Err(err),
            None if interrupted => Err(Error::Interrupted),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeboxed_stops_after_deadline() {
        let started = Instant::now();
        let mut items = Timeboxed::new(std::iter::repeat(()), Duration::from_millis(30));
        let mut pulled = 0u64;
        while items.next().is_some() {
            pulled += 1;
        }
        assert!(pulled > 0);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn timeboxed_ends_with_inner() {
        let items: Vec<_> = Timeboxed::new(0..3, Duration::from_secs(60)).collect();
        assert_eq!(items, [0, 1, 2]);
    }

    #[test]
    fn shutdown_is_sticky_and_shared() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_triggered());
        shutdown.trigger();
        assert!(clone.is_triggered());
    }
}

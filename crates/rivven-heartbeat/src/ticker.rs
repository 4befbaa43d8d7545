//! Periodic single-flight scheduler
//!
//! A [`Ticker`] owns one background task that sleeps for an interval, runs
//! the action to completion, and repeats. The action is awaited inline, so
//! two invocations never overlap: a slow action delays the next one, and the
//! ticks it overran are skipped rather than replayed.
//!
//! Stopping is cooperative: the shutdown signal is only observed between
//! invocations, and [`Ticker::stop`] waits for the task to exit.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct RunningTask {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Cancellable recurring timer
pub struct Ticker {
    interval: Duration,
    running: Option<RunningTask>,
}

impl Ticker {
    /// Create a stopped ticker firing every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: None,
        }
    }

    /// Tick interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a background task is currently scheduled
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start firing `action` every interval. No-op if already running.
    ///
    /// The first invocation happens one full interval after this call. A
    /// panicking action is logged and the next tick proceeds normally.
    pub fn start<F, Fut>(&mut self, action: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.running.is_some() {
            return;
        }

        let interval = self.interval;
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = signal.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                // Calling `action` inside the block also catches a panic
                // raised before the future is built.
                let run = AssertUnwindSafe(async { action().await });
                if run.catch_unwind().await.is_err() {
                    warn!("Periodic action panicked; continuing with next tick");
                }
            }
            debug!("Ticker loop exited");
        });

        self.running = Some(RunningTask { shutdown, handle });
    }

    /// Stop firing. Idempotent.
    ///
    /// An invocation already in progress runs to completion before this
    /// returns; no invocation starts afterwards.
    pub async fn stop(&mut self) {
        let Some(task) = self.running.take() else {
            return;
        };

        // notify_one stores a permit if the loop is busy running the action.
        task.shutdown.notify_one();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Ticker task terminated abnormally");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(task) = self.running.take() {
            task.handle.abort();
        }
    }
}

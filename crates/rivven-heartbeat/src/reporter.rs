//! Error reporting for the heartbeat writer
//!
//! Write failures repeat every tick while the database is unhealthy, so they
//! are logged through a [`ThrottledLogger`] (one line per cool-down window)
//! and counted in [`HeartbeatMetrics`]. Operators should alert on the
//! counters, not on log lines.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::error;

use crate::error::{Error, ErrorCategory};

/// Process-wide heartbeat write counters.
///
/// Created once by the host and injected into every writer. Counters are
/// monotonic and mirrored to the `metrics` facade.
#[derive(Debug, Default)]
pub struct HeartbeatMetrics {
    writes: AtomicU64,
    write_errors: AtomicU64,
}

/// Point-in-time copy of [`HeartbeatMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatMetricsSnapshot {
    /// Successful heartbeat writes (including the seed row)
    pub writes: u64,
    /// Failed heartbeat writes
    pub write_errors: u64,
}

impl HeartbeatMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful write
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rivven_heartbeat_writes_total").increment(1);
    }

    /// Record a failed write
    pub fn record_write_error(&self, category: ErrorCategory) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_heartbeat_write_errors_total",
            "category" => category.to_string()
        )
        .increment(1);
    }

    /// Successful writes so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Failed writes so far
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Snapshot both counters
    pub fn snapshot(&self) -> HeartbeatMetricsSnapshot {
        HeartbeatMetricsSnapshot {
            writes: self.writes(),
            write_errors: self.write_errors(),
        }
    }
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_emit: Option<Instant>,
    suppressed: u64,
}

/// Error logger that emits at most one line per cool-down window.
///
/// Messages arriving inside the window are dropped and counted; the count is
/// attached to the next line that gets through.
#[derive(Debug)]
pub struct ThrottledLogger {
    name: String,
    cooldown: Duration,
    state: Mutex<ThrottleState>,
    emitted: AtomicU64,
    suppressed_total: AtomicU64,
}

impl ThrottledLogger {
    /// Create a logger named `name` with the given cool-down window
    pub fn new(name: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            cooldown,
            state: Mutex::new(ThrottleState::default()),
            emitted: AtomicU64::new(0),
            suppressed_total: AtomicU64::new(0),
        }
    }

    /// Log `message` at error level unless the window is still closed.
    ///
    /// Returns whether the message was emitted.
    pub fn error(&self, message: impl fmt::Display) -> bool {
        let now = Instant::now();
        let skipped = {
            let mut state = self.state.lock();
            if let Some(last) = state.last_emit {
                if now.duration_since(last) < self.cooldown {
                    state.suppressed += 1;
                    self.suppressed_total.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
            state.last_emit = Some(now);
            std::mem::take(&mut state.suppressed)
        };

        self.emitted.fetch_add(1, Ordering::Relaxed);
        if skipped > 0 {
            error!(logger = %self.name, skipped, "{}", message);
        } else {
            error!(logger = %self.name, "{}", message);
        }
        true
    }

    /// Lines actually written
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Lines dropped by throttling
    pub fn suppressed(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }

    /// Cool-down window
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Sink for heartbeat write outcomes
#[derive(Debug)]
pub struct ErrorReporter {
    log: ThrottledLogger,
    metrics: Arc<HeartbeatMetrics>,
}

impl ErrorReporter {
    /// Create a reporter logging through a throttled logger with `cooldown`
    pub fn new(metrics: Arc<HeartbeatMetrics>, cooldown: Duration) -> Self {
        Self {
            log: ThrottledLogger::new("HeartbeatWriter", cooldown),
            metrics,
        }
    }

    /// Count and (rate-limited) log a failure
    pub fn record_error(&self, err: &Error) {
        self.metrics.record_write_error(err.category());
        self.log.error(err);
    }

    /// Count a successful write
    pub fn record_success(&self) {
        self.metrics.record_write();
    }

    /// Shared counters
    pub fn metrics(&self) -> &Arc<HeartbeatMetrics> {
        &self.metrics
    }

    /// Underlying throttled logger
    pub fn log(&self) -> &ThrottledLogger {
        &self.log
    }
}

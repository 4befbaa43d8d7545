//! Heartbeat writer lifecycle
//!
//! [`HeartbeatWriter`] runs on primary tablets and stamps the current time into
//! `<sidecar>.heartbeat` at a fixed interval. Replicas read the row to measure
//! replication lag.
//!
//! Lifecycle:
//! - `init(target)` records the shard identifier and, on a primary, creates the
//!   sidecar schema, the heartbeat table and the seed row
//! - `open()` starts the write pool and the ticker
//! - `close()` stops the ticker (waiting for an in-flight write) and the pool
//!
//! All transitions are serialized by one async mutex. The periodic write runs
//! outside that lock on the ticker task and never touches lifecycle state.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_heartbeat::prelude::*;
//!
//! let metrics = Arc::new(HeartbeatMetrics::new());
//! let writer = HeartbeatWriter::new(
//!     HeartbeatConfig::new(Duration::from_secs(1), 101),
//!     factory,
//!     metrics.clone(),
//! )?;
//!
//! writer.init(&Target::primary("commerce", "-80")).await?;
//! writer.open().await;
//! // ... on demotion or shutdown
//! writer.close().await;
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{Error, ErrorCategory, Result};
use crate::pool::{ConnectionPool, PoolStats, SimpleConnectionPool};
use crate::reporter::{ErrorReporter, HeartbeatMetrics};
use crate::template::{HeartbeatRow, HeartbeatTemplate};
use crate::ticker::Ticker;
use crate::types::{Clock, KeyspaceShard, SystemClock, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Closed,
    Open,
}

struct WriterState {
    lifecycle: Lifecycle,
    keyspace_shard: Option<KeyspaceShard>,
    pool: Option<Arc<SimpleConnectionPool>>,
    ticker: Ticker,
}

/// Writes heartbeats for one tablet
pub struct HeartbeatWriter {
    enabled: bool,
    config: HeartbeatConfig,
    template: HeartbeatTemplate,
    factory: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    reporter: Arc<ErrorReporter>,
    state: Mutex<WriterState>,
}

impl HeartbeatWriter {
    /// Create a writer.
    ///
    /// A zero interval yields a disabled writer on which every operation is a
    /// no-op. An enabled writer validates its configuration up front.
    pub fn new(
        config: HeartbeatConfig,
        factory: Arc<dyn ConnectionFactory>,
        metrics: Arc<HeartbeatMetrics>,
    ) -> Result<Self> {
        let enabled = config.is_enabled();
        let template = if enabled {
            config.check()?;
            HeartbeatTemplate::new(config.sidecar_schema.clone())?
        } else {
            HeartbeatTemplate::default()
        };

        Ok(Self {
            enabled,
            template,
            factory,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(ErrorReporter::new(metrics, config.error_log_cooldown)),
            state: Mutex::new(WriterState {
                lifecycle: Lifecycle::Closed,
                keyspace_shard: None,
                pool: None,
                ticker: Ticker::new(config.interval),
            }),
            config,
        })
    }

    /// Replace the wall clock used for heartbeat timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether this writer does anything at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write interval
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Shared write counters
    pub fn metrics(&self) -> &Arc<HeartbeatMetrics> {
        self.reporter.metrics()
    }

    /// Reporter used for write outcomes
    pub fn reporter(&self) -> &Arc<ErrorReporter> {
        &self.reporter
    }

    /// Whether periodic writes are currently scheduled
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.lifecycle == Lifecycle::Open
    }

    /// Shard identifier captured by the last `init`
    pub async fn keyspace_shard(&self) -> Option<KeyspaceShard> {
        self.state.lock().await.keyspace_shard.clone()
    }

    /// Statistics of the write pool while open
    pub async fn pool_stats(&self) -> Option<PoolStats> {
        self.state.lock().await.pool.as_ref().map(|pool| pool.stats())
    }

    /// Record the tablet's shard and prepare the heartbeat table.
    ///
    /// The shard identifier is captured for every role so a later promotion
    /// can `open` without another `init`. Table creation and the seed row only
    /// happen on a primary; failures there are reported and returned.
    pub async fn init(&self, target: &Target) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut state = self.state.lock().await;

        let keyspace_shard = target.keyspace_shard();
        info!(
            keyspace_shard = %keyspace_shard,
            tablet_type = %target.tablet_type,
            "Initializing heartbeat table"
        );
        state.keyspace_shard = Some(keyspace_shard.clone());

        if target.tablet_type.is_primary() {
            if let Err(e) = self.initialize_tables(&keyspace_shard).await {
                self.reporter.record_error(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Start the write pool and the periodic writes. No-op when already open.
    pub async fn open(&self) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Open {
            return;
        }

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            tablet_uid = self.config.tablet_uid,
            "Beginning heartbeat writes"
        );
        if state.keyspace_shard.is_none() {
            warn!("Heartbeat writer opened before init; writes will fail until reopened");
        }

        let pool = SimpleConnectionPool::open(self.config.pool_config(), self.factory.clone()).await;
        let task = Arc::new(WriteTask {
            pool: pool.clone(),
            template: self.template.clone(),
            keyspace_shard: state.keyspace_shard.clone(),
            tablet_uid: self.config.tablet_uid,
            interval: self.config.interval,
            clock: self.clock.clone(),
            reporter: self.reporter.clone(),
        });
        state.ticker.start(move || {
            let task = task.clone();
            async move { task.write_heartbeat().await }
        });

        state.pool = Some(pool);
        state.lifecycle = Lifecycle::Open;
    }

    /// Stop periodic writes and close the pool. No-op when already closed.
    ///
    /// A write in flight is allowed to finish (bounded by its deadline) and
    /// its outcome is recorded as usual.
    pub async fn close(&self) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Closed {
            return;
        }

        state.ticker.stop().await;
        if let Some(pool) = state.pool.take() {
            if let Err(e) = pool.close().await {
                warn!(error = %e, "Failed to close heartbeat write pool");
            }
        }
        info!("Stopped heartbeat writes");
        state.lifecycle = Lifecycle::Closed;
    }

    /// Create the sidecar schema and table and upsert the seed row over a
    /// dedicated connection.
    async fn initialize_tables(&self, keyspace_shard: &KeyspaceShard) -> Result<()> {
        let conn = self.factory.connect().await.map_err(|e| {
            Error::initialization("failed to create connection for heartbeat", e)
        })?;

        let result = self.seed_heartbeat(conn.as_ref(), keyspace_shard).await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close heartbeat init connection");
        }
        result?;

        self.reporter.record_success();
        Ok(())
    }

    async fn seed_heartbeat(&self, conn: &dyn Connection, keyspace_shard: &KeyspaceShard) -> Result<()> {
        let create_schema = self.template.create_schema_sql();
        let create_table = self.template.create_table_sql();
        conn.execute_batch(&[create_schema.as_str(), create_table.as_str()])
            .await
            .map_err(|e| Error::initialization("failed to execute heartbeat init query", e))?;

        let insert = HeartbeatRow::new(keyspace_shard, self.config.tablet_uid, self.clock.now())
            .and_then(|row| self.template.render_insert(&row))
            .map_err(|e| Error::initialization("failed to bind initial heartbeat insert", e))?;

        conn.execute(&insert)
            .await
            .map_err(|e| Error::initialization("failed to execute initial heartbeat insert", e))?;
        Ok(())
    }
}

/// Everything one periodic write needs, captured at `open`
struct WriteTask {
    pool: Arc<SimpleConnectionPool>,
    template: HeartbeatTemplate,
    keyspace_shard: Option<KeyspaceShard>,
    tablet_uid: u32,
    interval: Duration,
    clock: Arc<dyn Clock>,
    reporter: Arc<ErrorReporter>,
}

impl WriteTask {
    /// One tick: write, then count the outcome. Errors never escape.
    async fn write_heartbeat(&self) {
        let deadline = Instant::now() + self.interval;
        match self.write_once(deadline).await {
            Ok(()) => self.reporter.record_success(),
            Err(e) => self.reporter.record_error(&e),
        }
    }

    async fn write_once(&self, deadline: Instant) -> Result<()> {
        let keyspace_shard = self
            .keyspace_shard
            .as_ref()
            .ok_or_else(|| Error::template("no keyspace shard; writer was opened before init"))?;
        let row = HeartbeatRow::new(keyspace_shard, self.tablet_uid, self.clock.now())?;
        let update = self.template.render_update(&row)?;

        match tokio::time::timeout_at(deadline, self.exec(deadline, &update)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "heartbeat write exceeded deadline of {}ms",
                self.interval.as_millis()
            ))),
        }
    }

    async fn exec(&self, deadline: Instant, sql: &str) -> Result<()> {
        let conn = self.pool.get(deadline).await?;
        match conn.execute(sql).await {
            Ok(rows) => {
                debug!(rows, "Heartbeat written");
                conn.recycle().await;
                Ok(())
            }
            Err(e) => {
                if e.category() == ErrorCategory::Connection {
                    conn.discard().await;
                } else {
                    conn.recycle().await;
                }
                Err(e)
            }
        }
    }
}

//! Connection pool for the heartbeat writer
//!
//! A small semaphore-bounded pool:
//! - Lazy or eager connection creation (`min_size`)
//! - Deadline-bounded acquisition
//! - Health checking on borrow and idle-timeout recycling
//! - Return-to-pool on drop
//! - Graceful shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_heartbeat::pool::{ConnectionPool, PoolConfig, SimpleConnectionPool};
//!
//! let pool = SimpleConnectionPool::open(PoolConfig::default().with_max_size(1), factory).await;
//!
//! let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
//! let conn = pool.get(deadline).await?;
//! conn.execute("SELECT 1").await?;
//! conn.recycle().await;
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::connection::{Connection, ConnectionFactory};
use crate::error::{Error, Result};

/// Connection pool trait
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Get a connection from the pool, giving up at `deadline`
    async fn get(&self, deadline: Instant) -> Result<PooledConnection>;

    /// Return a connection to the pool
    async fn return_connection(&self, conn: Box<dyn Connection>);

    /// Drop a connection that must not be reused
    async fn discard_connection(&self, conn: Box<dyn Connection>);

    /// Get current number of open connections (idle + in use)
    fn size(&self) -> usize;

    /// Get pool statistics
    fn stats(&self) -> PoolStats;

    /// Whether the pool has been closed
    fn is_closed(&self) -> bool;

    /// Close all connections and shutdown the pool
    async fn close(&self) -> Result<()>;
}

/// A connection borrowed from the pool
pub struct PooledConnection {
    /// The underlying connection
    conn: Option<Box<dyn Connection>>,
    /// Reference to the pool for return
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Create a new pooled connection wrapper
    pub fn new(conn: Box<dyn Connection>, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Hand the connection back to the pool for reuse
    pub async fn recycle(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn).await;
        }
    }

    /// Close the connection instead of returning it (e.g. after a failed statement)
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard_connection(conn).await;
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.return_connection(conn).await;
            });
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created eagerly on open (0 = lazy)
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Idle timeout (connections idle longer are closed)
    pub idle_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 1,
            idle_timeout: Duration::from_secs(1800),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Set minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times acquisition ran into its deadline
    pub exhausted_count: u64,
    /// Number of health check failures
    pub health_check_failures: u64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisitions: AtomicU64,
    pub exhausted_count: AtomicU64,
    pub health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition
    pub fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record pool exhaustion
    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record health check failure
    pub fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }
}

/// Semaphore-bounded connection pool.
///
/// Each `open` produces a fresh pool; a closed pool is never reopened.
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections (LIFO)
    idle: Mutex<Vec<PoolEntry>>,
    /// Limits connections handed out at once
    semaphore: Semaphore,
    total_connections: AtomicUsize,
    stats: AtomicPoolStats,
    shutdown: AtomicBool,
    self_ref: Weak<Self>,
}

struct PoolEntry {
    conn: Box<dyn Connection>,
    last_used: Instant,
}

impl SimpleConnectionPool {
    /// Open a new connection pool.
    ///
    /// Creates `min_size` connections eagerly; failures here are logged and
    /// left for lazy creation on `get`.
    pub async fn open(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Arc<Self> {
        let pool = Arc::new_cyclic(|self_ref| Self {
            semaphore: Semaphore::new(config.max_size),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
            factory,
            total_connections: AtomicUsize::new(0),
            stats: AtomicPoolStats::new(),
            shutdown: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        });

        let warm = pool.config.min_size.min(pool.config.max_size);
        for _ in 0..warm {
            match pool.create_connection().await {
                Ok(conn) => pool.idle.lock().await.push(PoolEntry {
                    conn,
                    last_used: Instant::now(),
                }),
                Err(e) => {
                    debug!(error = %e, "Eager connection creation failed, deferring to first use");
                    break;
                }
            }
        }

        pool
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect().await?;
        self.total_connections.fetch_add(1, Ordering::Release);
        self.stats.record_created();
        Ok(conn)
    }

    fn forget_connection(&self) {
        self.total_connections.fetch_sub(1, Ordering::Release);
        self.stats.record_closed();
    }

    async fn close_connection(&self, conn: Box<dyn Connection>) {
        // Accounted up front so a cancelled close cannot leak the count.
        self.forget_connection();
        if let Err(e) = conn.close().await {
            debug!(error = %e, "Error closing pooled connection");
        }
    }

    /// Pop idle connections until a usable one is found
    async fn take_idle(&self) -> Option<Box<dyn Connection>> {
        loop {
            let entry = self.idle.lock().await.pop()?;
            if entry.last_used.elapsed() > self.config.idle_timeout {
                self.close_connection(entry.conn).await;
                continue;
            }
            if !self.config.test_on_borrow {
                return Some(entry.conn);
            }

            let mut check = IdleCheck {
                pool: self,
                conn: Some(entry.conn),
            };
            let valid = match check.conn.as_ref() {
                Some(conn) => conn.is_valid().await,
                None => false,
            };
            if valid {
                return check.conn.take();
            }

            self.stats.record_health_check_failure();
            if let Some(conn) = check.conn.take() {
                self.close_connection(conn).await;
            }
        }
    }
}

/// An idle connection whose health check is running.
///
/// If the check is abandoned (the caller's deadline fired) the connection is
/// closed in the background instead of leaking out of the pool's count.
struct IdleCheck<'a> {
    pool: &'a SimpleConnectionPool,
    conn: Option<Box<dyn Connection>>,
}

impl Drop for IdleCheck<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.forget_connection();
            tokio::spawn(async move {
                if let Err(e) = conn.close().await {
                    debug!(error = %e, "Error closing abandoned pooled connection");
                }
            });
        }
    }
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self, deadline: Instant) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::pool_exhausted("pool is closed"));
        }

        let permit = match tokio::time::timeout_at(deadline, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::pool_exhausted("pool is closed")),
            Err(_) => {
                self.stats.record_exhausted();
                return Err(Error::pool_exhausted(format!(
                    "timed out waiting for a connection ({} in use)",
                    self.config.max_size
                )));
            }
        };

        let conn = match self.take_idle().await {
            Some(conn) => conn,
            None => match tokio::time::timeout_at(deadline, self.create_connection()).await {
                Ok(result) => result?,
                Err(_) => return Err(Error::timeout("deadline exceeded while connecting")),
            },
        };

        self.stats.record_acquisition();
        // Released again in return_connection / discard_connection.
        permit.forget();

        let pool: Arc<dyn ConnectionPool> = match self.self_ref.upgrade() {
            Some(pool) => pool as Arc<dyn ConnectionPool>,
            None => {
                self.semaphore.add_permits(1);
                self.close_connection(conn).await;
                return Err(Error::pool_exhausted("pool has been dropped"));
            }
        };

        Ok(PooledConnection::new(conn, pool))
    }

    async fn return_connection(&self, conn: Box<dyn Connection>) {
        self.semaphore.add_permits(1);

        // close() sets the flag before draining under the same lock, so a
        // connection pushed here is either drained or never pushed.
        let mut idle = self.idle.lock().await;
        if self.shutdown.load(Ordering::Acquire) {
            drop(idle);
            self.close_connection(conn).await;
            return;
        }

        idle.push(PoolEntry {
            conn,
            last_used: Instant::now(),
        });
    }

    async fn discard_connection(&self, conn: Box<dyn Connection>) {
        self.semaphore.add_permits(1);
        self.close_connection(conn).await;
    }

    fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.semaphore.close();

        let mut idle = self.idle.lock().await;
        for entry in idle.drain(..) {
            self.close_connection(entry.conn).await;
        }

        Ok(())
    }
}

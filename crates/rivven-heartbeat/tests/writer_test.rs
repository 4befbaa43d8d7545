//! Lifecycle and scheduling tests for the heartbeat writer
//!
//! All tests run on paused tokio time against an in-memory database that
//! records every statement it receives.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rivven_heartbeat::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_heartbeat=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ==================== Mock database ====================

#[derive(Default)]
struct MockDatabase {
    statements: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail_connect: AtomicBool,
    fail_execute: AtomicBool,
    lose_connection: AtomicBool,
    exec_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDatabase {
    fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn updates(&self) -> usize {
        self.statements
            .lock()
            .iter()
            .filter(|sql| sql.starts_with("UPDATE"))
            .count()
    }

    fn set_delay(&self, delay: Duration) {
        *self.exec_delay.lock() = delay;
    }
}

struct InFlight<'a>(&'a MockDatabase);

impl<'a> InFlight<'a> {
    fn enter(db: &'a MockDatabase) -> Self {
        let now = db.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        db.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(db)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockConnection {
    db: Arc<MockDatabase>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let _guard = InFlight::enter(&self.db);
        let delay = *self.db.exec_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.db.statements.lock().push(sql.to_string());
        if self.db.fail_execute.load(Ordering::SeqCst) {
            return Err(Error::query_with_sql("mock failure", sql));
        }
        if self.db.lose_connection.load(Ordering::SeqCst) {
            return Err(Error::connection("server has gone away"));
        }
        Ok(1)
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.db.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockFactory {
    db: Arc<MockDatabase>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.db.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }
        self.db.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            db: self.db.clone(),
        }))
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

const INTERVAL: Duration = Duration::from_secs(1);

fn writer_with(config: HeartbeatConfig) -> (HeartbeatWriter, Arc<MockDatabase>) {
    init_test_logging();
    let db = Arc::new(MockDatabase::default());
    let writer = HeartbeatWriter::new(
        config,
        Arc::new(MockFactory { db: db.clone() }),
        Arc::new(HeartbeatMetrics::new()),
    )
    .unwrap()
    .with_clock(Arc::new(FixedClock(
        Utc.timestamp_nanos(1_700_000_000_000_000_000),
    )));
    (writer, db)
}

fn writer() -> (HeartbeatWriter, Arc<MockDatabase>) {
    writer_with(HeartbeatConfig::new(INTERVAL, 5))
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ==================== Init ====================

#[tokio::test(start_paused = true)]
async fn test_init_primary_creates_table_and_seed_row() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "-80")).await.unwrap();

    let statements = db.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(statements[0], "CREATE DATABASE IF NOT EXISTS `_vt`");
    assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS `_vt`.`heartbeat`"));
    assert!(statements[2].starts_with("INSERT INTO `_vt`.`heartbeat`"));
    assert!(statements[2].contains("1700000000000000000"));
    assert!(statements[2].contains("'ks1:-80'"));

    // Dedicated connection, closed afterwards
    assert_eq!(db.connects.load(Ordering::SeqCst), 1);
    assert_eq!(db.closes.load(Ordering::SeqCst), 1);

    // The seed row counts as a write
    assert_eq!(writer.metrics().writes(), 1);
    assert_eq!(writer.metrics().write_errors(), 0);
    assert!(!writer.is_open().await);
}

#[tokio::test(start_paused = true)]
async fn test_init_replica_captures_shard_without_io() {
    let (writer, db) = writer();
    let target = Target::new("ks1", "80-", TabletType::Replica);
    writer.init(&target).await.unwrap();

    assert_eq!(db.connects.load(Ordering::SeqCst), 0);
    assert!(db.statements().is_empty());
    assert_eq!(
        writer.keyspace_shard().await,
        Some(KeyspaceShard::new("ks1", "80-"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_init_connect_failure_is_reported() {
    let (writer, db) = writer();
    db.fail_connect.store(true, Ordering::SeqCst);

    let err = writer.init(&Target::primary("ks1", "0")).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Initialization);
    assert!(err.to_string().contains("failed to create connection"));

    assert_eq!(writer.metrics().write_errors(), 1);
    assert_eq!(writer.metrics().writes(), 0);
    assert!(!writer.is_open().await);
}

#[tokio::test(start_paused = true)]
async fn test_init_statement_failure_stops_and_closes_connection() {
    let (writer, db) = writer();
    db.fail_execute.store(true, Ordering::SeqCst);

    let err = writer.init(&Target::primary("ks1", "0")).await.unwrap_err();
    match &err {
        Error::Initialization { source, .. } => {
            assert_eq!(source.category(), ErrorCategory::Query)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Stopped at the first statement
    assert_eq!(db.statements().len(), 1);
    assert_eq!(db.closes.load(Ordering::SeqCst), 1);
    assert_eq!(writer.metrics().write_errors(), 1);
}

// ==================== Scheduling ====================

#[tokio::test(start_paused = true)]
async fn test_first_write_after_one_interval() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "-80")).await.unwrap();
    writer.open().await;
    assert!(writer.is_open().await);

    advance(999).await;
    assert_eq!(db.updates(), 0);

    advance(2).await;
    assert_eq!(db.updates(), 1);

    let update = db.statements().pop().unwrap();
    assert!(update.starts_with("UPDATE `_vt`.`heartbeat` SET"));
    assert!(update.contains("`tabletUid` = 5"));
    assert!(update.ends_with("WHERE `keyspaceShard` = 'ks1:-80'"));

    writer.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_twice_schedules_once() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    writer.open().await;
    writer.open().await;

    advance(3_500).await;
    assert_eq!(db.updates(), 3);
    assert_eq!(db.max_in_flight.load(Ordering::SeqCst), 1);

    writer.close().await;
    // init writes the seed row, then three updates
    assert_eq!(writer.metrics().writes(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_close_never_opened_is_noop() {
    let (writer, db) = writer();
    writer.close().await;
    writer.close().await;

    assert!(!writer.is_open().await);
    assert_eq!(db.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_then_open_runs_single_loop() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();

    writer.open().await;
    writer.close().await;
    assert!(!writer.is_open().await);
    writer.open().await;

    advance(2_500).await;
    assert_eq!(db.updates(), 2);
    assert_eq!(db.max_in_flight.load(Ordering::SeqCst), 1);
    writer.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_writes_and_releases_pool() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    writer.open().await;

    advance(2_500).await;
    writer.close().await;
    assert!(writer.pool_stats().await.is_none());

    let written = db.updates();
    advance(5_000).await;
    assert_eq!(db.updates(), written);
    assert_eq!(
        db.connects.load(Ordering::SeqCst),
        db.closes.load(Ordering::SeqCst)
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_waits_for_in_flight_write() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    db.set_delay(Duration::from_millis(500));
    writer.open().await;

    // First write started at 1s and is still executing
    advance(1_200).await;
    writer.close().await;

    assert_eq!(db.updates(), 1);
    assert_eq!(writer.metrics().writes(), 2);
    assert_eq!(db.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_writer_does_no_io() {
    let (writer, db) = writer_with(HeartbeatConfig::new(Duration::ZERO, 5));
    assert!(!writer.is_enabled());

    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    writer.open().await;
    advance(10_000).await;
    writer.close().await;

    assert_eq!(db.connects.load(Ordering::SeqCst), 0);
    assert!(db.statements().is_empty());
    assert_eq!(writer.metrics().snapshot(), HeartbeatMetricsSnapshot::default());
}

// ==================== Error reporting ====================

#[tokio::test(start_paused = true)]
async fn test_failing_writes_are_counted_and_throttled() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    db.fail_execute.store(true, Ordering::SeqCst);
    writer.open().await;

    advance(10_500).await;
    writer.close().await;

    assert_eq!(writer.metrics().write_errors(), 10);
    // Ten failures inside one 60s window produce a single log line
    assert_eq!(writer.reporter().log().emitted(), 1);
    assert_eq!(writer.reporter().log().suppressed(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_is_discarded_each_tick() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    db.lose_connection.store(true, Ordering::SeqCst);
    writer.open().await;

    advance(3_500).await;
    // init used one connection; each failing tick opens and discards another
    assert_eq!(db.connects.load(Ordering::SeqCst), 4);
    assert_eq!(db.closes.load(Ordering::SeqCst), 4);
    assert_eq!(writer.metrics().write_errors(), 3);
    assert_eq!(writer.pool_stats().await.unwrap().connections_closed, 3);

    writer.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_write_times_out_and_next_tick_runs() {
    let (writer, db) = writer();
    writer.init(&Target::primary("ks1", "0")).await.unwrap();
    db.set_delay(Duration::from_millis(1_500));
    writer.open().await;

    // Write starts at 1s, deadline at 2s
    advance(2_500).await;
    assert_eq!(writer.metrics().write_errors(), 1);
    assert_eq!(db.updates(), 0);

    // Next tick at 3s completes normally
    db.set_delay(Duration::ZERO);
    advance(1_000).await;
    assert_eq!(db.updates(), 1);
    assert_eq!(writer.metrics().writes(), 2);

    writer.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_before_init_reports_each_tick() {
    let (writer, db) = writer();
    writer.open().await;

    advance(3_500).await;
    writer.close().await;

    assert_eq!(db.updates(), 0);
    assert_eq!(writer.metrics().write_errors(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reopen_picks_up_new_shard() {
    let (writer, db) = writer();
    writer
        .init(&Target::new("ks1", "0", TabletType::Replica))
        .await
        .unwrap();
    writer.init(&Target::primary("ks2", "0")).await.unwrap();
    writer.open().await;

    advance(1_500).await;
    writer.close().await;

    let update = db.statements().pop().unwrap();
    assert!(update.ends_with("'ks2:0'"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_lifecycle_calls() {
    let (writer, db) = writer();
    let writer = Arc::new(writer);
    writer.init(&Target::primary("ks1", "0")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let writer = writer.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                writer.open().await;
            } else {
                writer.close().await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    writer.open().await;
    advance(3_500).await;
    writer.close().await;

    assert_eq!(db.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!writer.is_open().await);
}

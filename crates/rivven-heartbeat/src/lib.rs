//! # rivven-heartbeat
//!
//! Primary-side replication heartbeat writer for sharded MySQL clusters.
//!
//! A primary tablet periodically upserts the current wall-clock time into a
//! sidecar `heartbeat` table. The row replicates to every replica of the
//! shard, which compares it with its own clock to compute replication lag.
//!
//! ## Features
//!
//! - **Lifecycle**: `init` / `open` / `close` driven by the tablet's role, safe
//!   to call concurrently and repeatedly
//! - **Single-flight ticker**: at most one write in flight, never overlapping
//! - **Bounded writes**: each write must finish within one interval
//! - **Throttled errors**: failures are counted every time and logged at most
//!   once per cool-down window
//! - **Safe SQL**: statements rendered with sea-query, values escaped by the
//!   MySQL backend
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_heartbeat::prelude::*;
//!
//! let metrics = Arc::new(HeartbeatMetrics::new());
//! let factory = Arc::new(MySqlConnectionFactory::new(
//!     ConnectionConfig::new("mysql://vt_app@localhost:3306/"),
//! ));
//!
//! let writer = HeartbeatWriter::new(
//!     HeartbeatConfig::new(Duration::from_secs(1), 101),
//!     factory,
//!     metrics.clone(),
//! )?;
//!
//! writer.init(&Target::primary("commerce", "-80")).await?;
//! writer.open().await;
//! ```
//!
//! ## Feature Flags
//!
//! - `mysql` - MySQL/MariaDB connections via mysql_async

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod reporter;
pub mod template;
pub mod ticker;
pub mod types;
pub mod writer;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Domain types
    pub use crate::types::{Clock, KeyspaceShard, SystemClock, TabletType, Target};

    // Connection traits and config
    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};

    // Pool types
    pub use crate::pool::{
        AtomicPoolStats, ConnectionPool, PoolConfig, PoolStats, PooledConnection,
        SimpleConnectionPool,
    };

    // Writer and its parts
    pub use crate::config::HeartbeatConfig;
    pub use crate::reporter::{ErrorReporter, HeartbeatMetrics, HeartbeatMetricsSnapshot, ThrottledLogger};
    pub use crate::template::{HeartbeatRow, HeartbeatTemplate};
    pub use crate::ticker::Ticker;
    pub use crate::writer::HeartbeatWriter;

    #[cfg(feature = "mysql")]
    pub use crate::mysql::{MySqlConnection, MySqlConnectionFactory};

    pub use std::sync::Arc;
    pub use std::time::Duration;
}

// Re-export commonly used items at crate root
pub use config::HeartbeatConfig;
pub use error::{Error, Result};
pub use writer::HeartbeatWriter;

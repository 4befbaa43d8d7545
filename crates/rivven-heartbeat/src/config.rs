//! Heartbeat writer configuration
//!
//! Durations use humantime notation (`"1s"`, `"250ms"`). An interval of zero
//! disables the writer entirely.
//!
//! ```yaml
//! interval: 1s
//! tablet_uid: 101
//! sidecar_schema: _vt
//! pool_size: 1
//! error_log_cooldown: 60s
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use crate::template::{validate_sql_identifier, DEFAULT_SIDECAR_SCHEMA};

fn validate_schema_name(value: &str) -> std::result::Result<(), ValidationError> {
    validate_sql_identifier(value).map_err(|e| {
        ValidationError::new("invalid_sidecar_schema").with_message(e.to_string().into())
    })
}

/// Configuration for [`HeartbeatWriter`](crate::writer::HeartbeatWriter)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct HeartbeatConfig {
    /// Time between heartbeat writes (0 = disabled)
    #[serde(default, with = "humantime_serde")]
    pub interval: Duration,

    /// Uid of the tablet owning the heartbeat row
    #[serde(default)]
    pub tablet_uid: u32,

    /// Schema holding the heartbeat table
    #[serde(default = "default_sidecar_schema")]
    #[validate(custom(function = "validate_schema_name"))]
    pub sidecar_schema: String,

    /// Maximum pooled connections used for periodic writes
    #[serde(default = "default_pool_size")]
    #[validate(range(min = 1, max = 16, message = "pool_size must be between 1 and 16"))]
    pub pool_size: usize,

    /// Idle pooled connections older than this are closed
    #[serde(default = "default_pool_idle_timeout", with = "humantime_serde")]
    pub pool_idle_timeout: Duration,

    /// Minimum time between two logged write errors
    #[serde(default = "default_error_log_cooldown", with = "humantime_serde")]
    pub error_log_cooldown: Duration,
}

fn default_sidecar_schema() -> String {
    DEFAULT_SIDECAR_SCHEMA.to_string()
}

fn default_pool_size() -> usize {
    1
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(1800) // 30 minutes
}

fn default_error_log_cooldown() -> Duration {
    Duration::from_secs(60)
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            tablet_uid: 0,
            sidecar_schema: default_sidecar_schema(),
            pool_size: default_pool_size(),
            pool_idle_timeout: default_pool_idle_timeout(),
            error_log_cooldown: default_error_log_cooldown(),
        }
    }
}

impl HeartbeatConfig {
    /// Enabled config writing every `interval` on behalf of `tablet_uid`
    pub fn new(interval: Duration, tablet_uid: u32) -> Self {
        Self {
            interval,
            tablet_uid,
            ..Default::default()
        }
    }

    /// Whether heartbeats are written at all
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Set the write interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the owning tablet uid
    pub fn with_tablet_uid(mut self, tablet_uid: u32) -> Self {
        self.tablet_uid = tablet_uid;
        self
    }

    /// Set the sidecar schema
    pub fn with_sidecar_schema(mut self, schema: impl Into<String>) -> Self {
        self.sidecar_schema = schema.into();
        self
    }

    /// Set the pool size
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the error log cool-down window
    pub fn with_error_log_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_log_cooldown = cooldown;
        self
    }

    /// Validate the configuration, mapping failures to [`Error::Configuration`]
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid heartbeat config: {}", e)))
    }

    /// Pool settings derived from this configuration
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_max_size(self.pool_size)
            .with_idle_timeout(self.pool_idle_timeout)
    }
}

//! Shared value types: tablet targets, shard identifiers and clocks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a tablet within its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabletType {
    /// The single writable member of the shard
    Primary,
    /// Read-only follower eligible for promotion
    #[default]
    Replica,
    /// Read-only follower never promoted
    Rdonly,
}

impl TabletType {
    /// Whether this tablet accepts writes
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica => write!(f, "replica"),
            Self::Rdonly => write!(f, "rdonly"),
        }
    }
}

/// Keyspace, shard and role a tablet is serving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Keyspace name
    pub keyspace: String,
    /// Shard name (e.g. `-80`, `80-`, `0`)
    pub shard: String,
    /// Current role of the tablet
    pub tablet_type: TabletType,
}

impl Target {
    /// Create a new target
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>, tablet_type: TabletType) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            tablet_type,
        }
    }

    /// Shorthand for a primary target
    pub fn primary(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self::new(keyspace, shard, TabletType::Primary)
    }

    /// Shard identifier for this target
    pub fn keyspace_shard(&self) -> KeyspaceShard {
        KeyspaceShard::new(&self.keyspace, &self.shard)
    }
}

/// Shard identifier, rendered as `"<keyspace>:<shard>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyspaceShard {
    keyspace: String,
    shard: String,
}

impl KeyspaceShard {
    /// Create a shard identifier
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
        }
    }

    /// Keyspace part
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Shard part
    pub fn shard(&self) -> &str {
        &self.shard
    }
}

impl fmt::Display for KeyspaceShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.keyspace, self.shard)
    }
}

/// Wall-clock source for heartbeat timestamps
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

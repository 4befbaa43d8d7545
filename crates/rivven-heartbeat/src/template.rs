//! Bind templates for the heartbeat table
//!
//! Renders the sidecar DDL plus the two heartbeat statements:
//! - seed insert: `INSERT ... ON DUPLICATE KEY UPDATE ts`
//! - periodic update: `UPDATE ... SET ts, tabletUid WHERE keyspaceShard = ?`
//!
//! Row values are bound through sea-query as typed values and rendered with
//! the MySQL query builder, so a malformed keyspace or shard name can never
//! change the shape of the statement. The schema name is an identifier and is
//! validated instead.

use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, MysqlQueryBuilder, OnConflict, Query, SimpleExpr};

use crate::error::{Error, Result};
use crate::types::KeyspaceShard;

/// Default sidecar schema holding the heartbeat table
pub const DEFAULT_SIDECAR_SCHEMA: &str = "_vt";

/// Name of the heartbeat table inside the sidecar schema
pub const HEARTBEAT_TABLE: &str = "heartbeat";

/// Width of the `keyspaceShard` column
pub const MAX_KEYSPACE_SHARD_LEN: usize = 256;

const COL_KEYSPACE_SHARD: &str = "keyspaceShard";
const COL_TABLET_UID: &str = "tabletUid";
const COL_TS: &str = "ts";

/// Validate a SQL identifier used for the sidecar schema.
///
/// Must be non-empty, at most 64 characters (MySQL limit), start with an
/// ASCII letter or underscore and contain only ASCII alphanumerics and
/// underscores.
pub fn validate_sql_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 64 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 64)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::config(format!(
            "Invalid SQL identifier '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier with backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// One heartbeat row, ready to be bound into a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRow {
    /// `"<keyspace>:<shard>"`
    pub keyspace_shard: String,
    /// Uid of the tablet that wrote the row
    pub tablet_uid: u32,
    /// Nanoseconds since the Unix epoch
    pub ts: u64,
}

impl HeartbeatRow {
    /// Build a row stamped with `now`.
    ///
    /// Fails when `now` cannot be expressed as unsigned nanoseconds since the
    /// epoch or the shard identifier does not fit the column.
    pub fn new(keyspace_shard: &KeyspaceShard, tablet_uid: u32, now: DateTime<Utc>) -> Result<Self> {
        let ts = now
            .timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .ok_or_else(|| Error::template(format!("timestamp {} out of range", now)))?;

        let keyspace_shard = keyspace_shard.to_string();
        if keyspace_shard.len() > MAX_KEYSPACE_SHARD_LEN {
            return Err(Error::template(format!(
                "keyspace shard '{}' exceeds {} bytes",
                keyspace_shard, MAX_KEYSPACE_SHARD_LEN
            )));
        }

        Ok(Self {
            keyspace_shard,
            tablet_uid,
            ts,
        })
    }
}

/// Statement templates bound to one sidecar schema
#[derive(Debug, Clone)]
pub struct HeartbeatTemplate {
    schema: String,
}

impl Default for HeartbeatTemplate {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SIDECAR_SCHEMA.to_string(),
        }
    }
}

impl HeartbeatTemplate {
    /// Create templates for `schema`
    pub fn new(schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_sql_identifier(&schema)?;
        Ok(Self { schema })
    }

    /// Sidecar schema name
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// `CREATE DATABASE IF NOT EXISTS` for the sidecar schema
    pub fn create_schema_sql(&self) -> String {
        format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_identifier(&self.schema)
        )
    }

    /// `CREATE TABLE IF NOT EXISTS` for the heartbeat table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\n  {} VARBINARY({}) NOT NULL PRIMARY KEY,\n  {} INT UNSIGNED NOT NULL,\n  {} BIGINT UNSIGNED NOT NULL\n) ENGINE=InnoDB",
            quote_identifier(&self.schema),
            quote_identifier(HEARTBEAT_TABLE),
            quote_identifier(COL_KEYSPACE_SHARD),
            MAX_KEYSPACE_SHARD_LEN,
            quote_identifier(COL_TABLET_UID),
            quote_identifier(COL_TS),
        )
    }

    fn table(&self) -> (Alias, Alias) {
        (Alias::new(&self.schema), Alias::new(HEARTBEAT_TABLE))
    }

    /// Render the seed-row upsert.
    ///
    /// Inserts `(ts, tabletUid, keyspaceShard)`; an existing row for the
    /// shard only has its `ts` refreshed.
    pub fn render_insert(&self, row: &HeartbeatRow) -> Result<String> {
        let values = [
            SimpleExpr::Value(row.ts.into()),
            SimpleExpr::Value(row.tablet_uid.into()),
            SimpleExpr::Value(row.keyspace_shard.as_str().into()),
        ];

        let mut stmt = Query::insert();
        stmt.into_table(self.table()).columns([
            Alias::new(COL_TS),
            Alias::new(COL_TABLET_UID),
            Alias::new(COL_KEYSPACE_SHARD),
        ]);
        stmt.values(values)
            .map_err(|e| Error::template(format!("failed to bind heartbeat insert: {}", e)))?;
        stmt.on_conflict(
            OnConflict::new()
                .update_column(Alias::new(COL_TS))
                .to_owned(),
        );

        Ok(stmt.to_string(MysqlQueryBuilder))
    }

    /// Render the periodic heartbeat update for the row's shard
    pub fn render_update(&self, row: &HeartbeatRow) -> Result<String> {
        let mut stmt = Query::update();
        stmt.table(self.table())
            .values([
                (Alias::new(COL_TS), SimpleExpr::Value(row.ts.into())),
                (
                    Alias::new(COL_TABLET_UID),
                    SimpleExpr::Value(row.tablet_uid.into()),
                ),
            ])
            .and_where(
                Expr::col(Alias::new(COL_KEYSPACE_SHARD))
                    .eq(SimpleExpr::Value(row.keyspace_shard.as_str().into())),
            );

        Ok(stmt.to_string(MysqlQueryBuilder))
    }
}

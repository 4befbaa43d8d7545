//! MySQL backend for rivven-heartbeat
//!
//! Provides [`MySqlConnection`] and [`MySqlConnectionFactory`] on top of
//! `mysql_async`. Statements arrive fully rendered, so everything goes over
//! the text protocol.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Classify a driver error: server replies are statement failures, anything
/// else means the connection itself is suspect.
fn driver_error(err: mysql_async::Error, sql: &str) -> Error {
    match err {
        mysql_async::Error::Server(e) => Error::Query {
            message: e.message.clone(),
            sql: Some(sql.to_string()),
            source: Some(Box::new(e)),
        },
        other => Error::connection_with_source("MySQL connection failure", other),
    }
}

/// Client attributes sent in the handshake (`performance_schema.session_connect_attrs`)
fn connect_attrs(config: &ConnectionConfig) -> Option<HashMap<String, String>> {
    config
        .application_name
        .as_ref()
        .map(|name| HashMap::from([("program_name".to_string(), name.clone())]))
}

/// MySQL connection implementation
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
}

impl MySqlConnection {
    /// Wrap an established connection
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Create a new connection from configuration
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = Opts::from_url(&config.url)
            .map_err(|e| Error::config(format!("Invalid MySQL connection string: {}", e)))?;

        let builder = OptsBuilder::from_opts(opts).connect_attrs(connect_attrs(config));

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let conn = tokio::time::timeout(timeout, Conn::new(builder))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "MySQL connect exceeded {}ms",
                    config.connect_timeout_ms
                ))
            })?
            .map_err(|e| Error::connection_with_source("Failed to connect to MySQL", e))?;

        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("Connection not available"))?;

        conn.query_drop(sql).await.map_err(|e| driver_error(e, sql))?;
        Ok(conn.affected_rows())
    }

    async fn is_valid(&self) -> bool {
        match self.conn.lock().await.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("Failed to close connection", e))?;
        }
        Ok(())
    }
}

/// Factory opening [`MySqlConnection`]s for the pool and for table setup
#[derive(Debug, Clone)]
pub struct MySqlConnectionFactory {
    config: ConnectionConfig,
}

impl MySqlConnectionFactory {
    /// Create a new MySQL connection factory
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connection configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = MySqlConnection::connect(&self.config).await?;
        Ok(Box::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let factory = MySqlConnectionFactory::new(ConnectionConfig::new("not a url"));
        let err = match factory.connect().await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_application_name_becomes_program_name() {
        let config = ConnectionConfig::new("mysql://root@localhost:3306/")
            .with_application_name("tablet-101-heartbeat");
        let attrs = connect_attrs(&config).unwrap();
        assert_eq!(attrs.get("program_name").map(String::as_str), Some("tablet-101-heartbeat"));

        let mut config = ConnectionConfig::new("mysql://root@localhost:3306/");
        config.application_name = None;
        assert!(connect_attrs(&config).is_none());
    }

    #[test]
    fn test_factory_keeps_config() {
        let factory = MySqlConnectionFactory::new(
            ConnectionConfig::new("mysql://root@localhost:3306/").with_connect_timeout(500),
        );
        assert_eq!(factory.config().connect_timeout_ms, 500);
    }
}

//! Error types for rivven-heartbeat
//!
//! Errors are classified so the writer can tell transient write failures
//! (connection, timeout, pool exhaustion) from programmer or setup errors:
//! - Retriable errors are absorbed by the periodic write path
//! - Initialization errors are returned to the `init` caller

use std::fmt;
use thiserror::Error;

/// Result type for rivven-heartbeat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Statement execution errors
    Query,
    /// Timeout errors (retriable)
    Timeout,
    /// Pool exhausted or shut down (retriable)
    PoolExhausted,
    /// Configuration error
    Configuration,
    /// Statement rendering failed
    Template,
    /// Sidecar schema or seed row setup failed
    Initialization,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::PoolExhausted)
    }
}

/// Main error type for rivven-heartbeat
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Statement execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation exceeded its deadline
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Connection pool exhausted or closed
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Bind-template rendering failed
    #[error("template error: {message}")]
    Template { message: String },

    /// Heartbeat table initialization failed
    #[error("heartbeat initialization failed: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Template { .. } => ErrorCategory::Template,
            Self::Initialization { .. } => ErrorCategory::Initialization,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error is a timeout-class error.
    ///
    /// Pool exhaustion counts: acquiring a connection is bounded by the
    /// same deadline as the statement itself.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::PoolExhausted
        )
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a pool exhausted error
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Wrap an error raised while setting up the heartbeat table
    pub fn initialization(message: impl Into<String>, source: Error) -> Self {
        Self::Initialization {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Timeout => write!(f, "timeout"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Configuration => write!(f, "configuration"),
            Self::Template => write!(f, "template"),
            Self::Initialization => write!(f, "initialization"),
        }
    }
}

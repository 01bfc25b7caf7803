//! Error types for sqlbridge-connect
//!
//! Every failure a query or publish caller can see is one of these variants.
//! Each carries a stable dotted code that goes into error replies.

use thiserror::Error;

/// Result type alias for sqlbridge-connect
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors raised by the bridge engine
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Missing or invalid configuration; the configuration is rejected
    #[error("configuration error: {0}")]
    Config(String),

    /// The database rejected a statement
    #[error("SQL error: {message} (SQL state: {}, error code: {})",
        .sql_state.as_deref().unwrap_or("n/a"),
        .vendor_code.map(|c| c.to_string()).unwrap_or_else(|| "n/a".into()))]
    Sql {
        message: String,
        sql_state: Option<String>,
        vendor_code: Option<i32>,
    },

    /// A column value has no document representation
    #[error("unmappable object type {type_name} in column '{column}'")]
    UnmappableType { column: String, type_name: String },

    /// A batch element was not a statement string
    #[error("batch element {index} is not a statement string (found {found})")]
    BatchType { index: usize, found: String },

    /// Platform handshake or reconnect failed
    #[error("connection lifecycle error: {0}")]
    ConnectionLifecycle(String),

    /// No database session is configured
    #[error("no database session is open")]
    SessionClosed,

    /// Malformed query or publish request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The query field of a request was not a string
    #[error("query must be a string")]
    QueryNotString,

    /// Sending to the platform failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectorError {
    /// Stable error code sent in error replies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "sqlbridge.configError",
            Self::Sql { .. } => "sqlbridge.sqlError",
            Self::UnmappableType { .. } => "sqlbridge.unmappableType",
            Self::BatchType { .. } => "sqlbridge.batchTypeError",
            Self::ConnectionLifecycle(_) => "sqlbridge.connectionError",
            Self::SessionClosed => "sqlbridge.closed",
            Self::InvalidRequest(_) => "sqlbridge.invalidRequest",
            Self::QueryNotString => "sqlbridge.queryNotString",
            Self::Transport(_) => "sqlbridge.transportError",
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid-request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl From<sqlbridge_rdbc::Error> for ConnectorError {
    fn from(err: sqlbridge_rdbc::Error) -> Self {
        match err {
            sqlbridge_rdbc::Error::TypeConversion { column, message } => Self::UnmappableType {
                column: column.unwrap_or_default(),
                type_name: message,
            },
            sqlbridge_rdbc::Error::Configuration { message } => Self::Config(message),
            other => Self::Sql {
                sql_state: other.sql_state().map(str::to_string),
                vendor_code: other.vendor_code(),
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

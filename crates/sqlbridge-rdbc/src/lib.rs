//! # sqlbridge-rdbc
//!
//! Relational database connectivity for the sqlbridge connector.
//!
//! This crate is the storage-driver layer underneath the bridge engine:
//!
//! - **Closed value model**: every column value is one of the [`Value`]
//!   variants; backends fail with a type-conversion error instead of handing
//!   out driver-specific objects
//! - **Result sets with metadata**: labels and declared SQL types travel with
//!   the rows, even for empty results
//! - **Connection pooling**: semaphore-bounded pool with acquisition timeout,
//!   validation on borrow and drain-on-close semantics
//! - **SQL dialect**: paging select and parameterised insert built with sea-query
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqlbridge_rdbc::prelude::*;
//! use sqlbridge_rdbc::postgres::PgConnectionFactory;
//!
//! let config = PoolConfig::from_connection(
//!     ConnectionConfig::new("postgres://localhost/db").with_credentials("app", "secret"),
//! )
//! .with_max_size(10);
//! let pool = SimpleConnectionPool::new(config, Arc::new(PgConnectionFactory)).await?;
//!
//! let conn = pool.get().await?;
//! let rs = conn.query("SELECT * FROM users WHERE id = $1", &[Value::Int32(1)]).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL support via tokio-postgres
//! - `testing` - scripted in-memory backend for tests

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod pool;
pub mod security;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{ColumnDescriptor, ResultSet, Row, SqlType, Value};

    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};

    pub use crate::pool::{
        AtomicPoolStats, ConnectionPool, PoolConfig, PoolStats, PooledConnection,
        SimpleConnectionPool,
    };

    pub use crate::dialect::{dialect_for, PostgresDialect, SqlDialect};
}

pub use error::{Error, Result};
pub use types::Value;

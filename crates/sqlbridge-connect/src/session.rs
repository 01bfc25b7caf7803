//! Database session and the guarded "current session" slot
//!
//! A [`DatabaseSession`] is a connection pool built from one source
//! configuration. The [`SessionSlot`] holds the current one. Readers take an
//! `Arc` snapshot and writers swap the whole value, always under a short
//! lock that is never held across an await.

use parking_lot::Mutex;
use sqlbridge_rdbc::connection::ConnectionFactory;
use sqlbridge_rdbc::dialect::dialect_for;
use sqlbridge_rdbc::pool::{PoolConfig, SimpleConnectionPool};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DatabaseSettings, SourceConfig};
use crate::error::Result;
use crate::executor::QueryExecutor;

/// A connection pool bound to one set of credentials
pub struct DatabaseSession {
    executor: QueryExecutor,
    max_connections: usize,
}

impl std::fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSession")
            .field("max_connections", &self.max_connections)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DatabaseSession {
    /// Open a pool for a source configuration
    ///
    /// Fails when the first connection cannot be established.
    pub async fn open(
        source: &SourceConfig,
        settings: &DatabaseSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Arc<Self>> {
        let connection = source.connection_config();
        let dialect = dialect_for(connection.database_type());
        let max_connections = source.max_connections();

        let pool_config = PoolConfig::from_connection(connection)
            .with_min_size(1)
            .with_max_size(max_connections)
            .with_acquire_timeout(settings.acquire_timeout());
        let pool = SimpleConnectionPool::new(pool_config, factory).await?;

        info!(
            dialect = dialect.name(),
            pool_size = max_connections,
            "Database session opened"
        );

        Ok(Arc::new(Self {
            executor: QueryExecutor::new(pool, Arc::from(dialect)),
            max_connections,
        }))
    }

    /// Statement executor for this session
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Configured pool size
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.executor.pool().is_closed()
    }

    /// Close the pool
    ///
    /// Idle connections close now; borrowed ones close as their borrowers
    /// return them.
    pub async fn close(&self) {
        if let Err(e) = self.executor.pool().close().await {
            warn!(error = %e, "Error closing database session");
        } else {
            debug!("Database session closed");
        }
    }

    /// Close on a background task so the caller never waits on teardown
    pub fn close_in_background(self: Arc<Self>) {
        tokio::spawn(async move { self.close().await });
    }
}

/// Guarded reference to the current database session
#[derive(Default)]
pub struct SessionSlot {
    current: Mutex<Option<Arc<DatabaseSession>>>,
}

impl SessionSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if any
    pub fn snapshot(&self) -> Option<Arc<DatabaseSession>> {
        self.current.lock().clone()
    }

    /// Install a session, returning the one it replaces
    pub fn replace(&self, session: Arc<DatabaseSession>) -> Option<Arc<DatabaseSession>> {
        self.current.lock().replace(session)
    }

    /// Remove the current session
    pub fn take(&self) -> Option<Arc<DatabaseSession>> {
        self.current.lock().take()
    }

    /// Whether a session is installed
    pub fn is_present(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlbridge_rdbc::testing::MemoryDatabase;

    fn source() -> SourceConfig {
        SourceConfig::from_document(&json!({
            "username": "u",
            "password": "p",
            "dbURL": "memory:test",
            "poolSize": 2
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_slot_swaps_whole_sessions() {
        let db = MemoryDatabase::new();
        let settings = DatabaseSettings::default();
        let first = DatabaseSession::open(&source(), &settings, db.factory())
            .await
            .unwrap();
        let second = DatabaseSession::open(&source(), &settings, db.factory())
            .await
            .unwrap();

        let slot = SessionSlot::new();
        assert!(slot.replace(first.clone()).is_none());
        let old = slot.replace(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&old, &first));
        assert!(Arc::ptr_eq(&slot.snapshot().unwrap(), &second));

        old.close().await;
        assert!(first.is_closed());
        assert!(!second.is_closed());

        assert!(slot.take().is_some());
        assert!(!slot.is_present());
    }

    #[tokio::test]
    async fn test_open_fails_when_database_unreachable() {
        let db = MemoryDatabase::new();
        db.fail_connections(Some("connection refused"));
        let err = DatabaseSession::open(&source(), &DatabaseSettings::default(), db.factory())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}

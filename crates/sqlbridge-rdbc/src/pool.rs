//! Connection pool abstraction for sqlbridge-rdbc
//!
//! Semaphore-bounded pooling with:
//! - Configurable pool sizes and acquisition timeout
//! - Connection validation on borrow
//! - Lifetime and idle recycling
//! - Statistics
//! - Shutdown that lets in-flight borrowers drain
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlbridge_rdbc::prelude::*;
//! use sqlbridge_rdbc::postgres::PgConnectionFactory;
//!
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("postgres://localhost/db").with_max_size(10),
//!     Arc::new(PgConnectionFactory),
//! ).await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("DELETE FROM audit", &[]).await?;
//! // Connection is returned to pool when dropped
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Connection pool trait
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Get a connection from the pool
    async fn get(&self) -> Result<PooledConnection>;

    /// Return a connection to the pool
    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant);

    /// Get current pool size
    fn size(&self) -> usize;

    /// Get number of idle connections
    fn idle(&self) -> usize;

    /// Get number of connections in use
    fn in_use(&self) -> usize {
        self.size().saturating_sub(self.idle())
    }

    /// Get pool statistics
    fn stats(&self) -> PoolStats;

    /// Whether [`close`](Self::close) has been called
    fn is_closed(&self) -> bool;

    /// Close idle connections and shut the pool down
    ///
    /// Connections still borrowed are closed when their borrower returns them.
    async fn close(&self) -> Result<()>;
}

/// A connection borrowed from the pool
pub struct PooledConnection {
    /// The underlying connection
    conn: Option<Box<dyn Connection>>,
    /// When the physical connection was opened
    created_at: Instant,
    /// Reference to the pool for return
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Create a new pooled connection wrapper
    pub fn new(conn: Box<dyn Connection>, created_at: Instant, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let created_at = self.created_at;
            tokio::spawn(async move {
                pool.return_connection(conn, created_at).await;
            });
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Minimum pool size (opened eagerly)
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime (for recycling)
    pub max_lifetime: Duration,
    /// Idle timeout (connections idle longer are closed)
    pub idle_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
    /// Whether to test connections on return
    pub test_on_return: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(1800), // 30 minutes
            idle_timeout: Duration::from_secs(600),  // 10 minutes
            test_on_borrow: true,
            test_on_return: false,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_connection(ConnectionConfig::new(url))
    }

    /// Create pool config from a full connection configuration
    pub fn from_connection(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }

    /// Set minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Enable/disable test on return
    pub fn with_test_on_return(mut self, test: bool) -> Self {
        self.test_on_return = test;
        self
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times pool was exhausted
    pub exhausted_count: u64,
    /// Total wait time for connections (in milliseconds)
    pub total_wait_time_ms: u64,
    /// Number of health check failures
    pub health_check_failures: u64,
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisitions: AtomicU64,
    pub exhausted_count: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
    pub health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition
    pub fn record_acquisition(&self, wait_time_ms: u64) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
    }

    /// Record pool exhaustion
    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record health check failure
    pub fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }

    /// Calculate average wait time in milliseconds
    pub fn avg_wait_time_ms(&self) -> f64 {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        if acquisitions == 0 {
            0.0
        } else {
            self.total_wait_time_ms.load(Ordering::Relaxed) as f64 / acquisitions as f64
        }
    }
}

/// A semaphore-bounded connection pool.
///
/// Acquisition waits at most `acquire_timeout` for a free slot. Idle
/// connections are reused LIFO, validated on borrow and recycled once they
/// exceed their lifetime or idle timeout.
pub struct SimpleConnectionPool {
    /// Pool configuration
    config: PoolConfig,
    /// Connection factory
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections (LIFO)
    idle: Mutex<Vec<PoolEntry>>,
    /// Number of entries in `idle`
    idle_count: AtomicUsize,
    /// Semaphore to limit total connections
    semaphore: Semaphore,
    /// Current total connection count
    total_connections: AtomicUsize,
    /// Statistics
    stats: Arc<AtomicPoolStats>,
    /// Shutdown flag
    shutdown: AtomicBool,
    /// Self reference for creating PooledConnections
    self_ref: std::sync::OnceLock<std::sync::Weak<Self>>,
}

/// Internal pool entry with metadata
struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

impl SimpleConnectionPool {
    /// Create a new connection pool.
    ///
    /// Opens `min_size` connections eagerly and fails if the first of them
    /// cannot be opened, so bad credentials surface at construction.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        if config.max_size == 0 {
            return Err(Error::config("pool max_size must be greater than zero"));
        }

        let pool = Arc::new(Self {
            semaphore: Semaphore::new(config.max_size),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            idle_count: AtomicUsize::new(0),
            config,
            factory,
            total_connections: AtomicUsize::new(0),
            stats: Arc::new(AtomicPoolStats::new()),
            shutdown: AtomicBool::new(false),
            self_ref: std::sync::OnceLock::new(),
        });

        let _ = pool.self_ref.set(Arc::downgrade(&pool));

        let warm = pool.config.min_size.min(pool.config.max_size);
        for i in 0..warm {
            match pool.create_connection().await {
                Ok(conn) => {
                    let now = Instant::now();
                    pool.idle.lock().await.push(PoolEntry {
                        conn,
                        created_at: now,
                        last_used: now,
                    });
                    pool.idle_count.fetch_add(1, Ordering::AcqRel);
                }
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Failed to pre-open pooled connection");
                    break;
                }
            }
        }

        debug!(
            max_size = pool.config.max_size,
            idle = pool.idle(),
            "Connection pool ready"
        );
        Ok(pool)
    }

    fn get_self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(|w| w.upgrade())
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.total_connections.fetch_add(1, Ordering::Release);
        self.stats.record_created();
        Ok(conn)
    }

    async fn validate_connection(&self, conn: &dyn Connection) -> bool {
        if self.config.test_on_borrow {
            conn.is_valid().await
        } else {
            true
        }
    }

    fn should_recycle(&self, entry: &PoolEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    async fn discard(&self, conn: Box<dyn Connection>) {
        let _ = conn.close().await;
        self.total_connections.fetch_sub(1, Ordering::Release);
        self.stats.record_closed();
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::pool("Pool is shut down"));
        }

        let start = Instant::now();

        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                self.stats.record_exhausted();
                Error::pool(format!(
                    "Timeout waiting for connection ({}ms)",
                    self.config.acquire_timeout.as_millis()
                ))
            })?
            .map_err(|_| Error::pool("Pool semaphore closed"))?;

        let reused = loop {
            let entry = {
                let mut idle = self.idle.lock().await;
                idle.pop()
            };
            let Some(entry) = entry else { break None };
            self.idle_count.fetch_sub(1, Ordering::AcqRel);

            if self.should_recycle(&entry) {
                self.discard(entry.conn).await;
                continue;
            }
            if !self.validate_connection(&*entry.conn).await {
                self.stats.record_health_check_failure();
                self.discard(entry.conn).await;
                continue;
            }
            break Some((entry.conn, entry.created_at));
        };

        let (conn, created_at) = match reused {
            Some(found) => found,
            // Permit is released on the error path when it drops.
            None => (self.create_connection().await?, Instant::now()),
        };

        let wait_ms = start.elapsed().as_millis() as u64;
        self.stats.record_acquisition(wait_ms);

        let pool_arc = match self.get_self_arc() {
            Some(pool) => pool,
            None => {
                self.discard(conn).await;
                return Err(Error::pool("Pool has been dropped"));
            }
        };

        // Released in return_connection.
        permit.forget();

        Ok(PooledConnection::new(conn, created_at, pool_arc))
    }

    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.semaphore.add_permits(1);

        if self.shutdown.load(Ordering::Acquire) {
            self.discard(conn).await;
            return;
        }

        if self.config.test_on_return && !conn.is_valid().await {
            self.stats.record_health_check_failure();
            self.discard(conn).await;
            return;
        }

        let mut idle = self.idle.lock().await;
        idle.push(PoolEntry {
            conn,
            created_at,
            last_used: Instant::now(),
        });
        self.idle_count.fetch_add(1, Ordering::AcqRel);
    }

    fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    fn idle(&self) -> usize {
        self.idle_count.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let drained: Vec<PoolEntry> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        self.idle_count.store(0, Ordering::Release);
        let closed = drained.len();
        for entry in drained {
            self.discard(entry.conn).await;
        }

        debug!(
            closed,
            in_use = self.size(),
            "Connection pool closed"
        );
        Ok(())
    }
}

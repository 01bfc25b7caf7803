//! Connection traits for sqlbridge-rdbc
//!
//! Core abstractions for database connectivity:
//! - Connection: statement execution against one physical connection
//! - ConnectionFactory: opens connections for a pool
//! - ConnectionConfig: URL plus credentials, safe to log

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ResultSet, Value};

/// A connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet>;

    /// Execute a statement that modifies data, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a batch of statements as one unit, returns affected counts per statement
    ///
    /// Either every statement succeeds and all counts are returned, or the
    /// whole batch fails. The default runs statements in order and stops at
    /// the first failure; backends with transactions override it so that
    /// earlier statements are rolled back too.
    async fn execute_batch(&self, statements: &[(&str, &[Value])]) -> Result<Vec<u64>> {
        let mut results = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            results.push(self.execute(sql, params).await?);
        }
        Ok(results)
    }

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL (e.g., postgres://host:5432/db), `jdbc:` prefix allowed
    pub url: String,
    /// User name, overrides any user in the URL
    pub username: Option<String>,
    /// Password, overrides any password in the URL
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application name (shown in pg_stat_activity, etc)
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Redact credentials from the URL to prevent leaking passwords to logs.
        let redacted_url = match url::Url::parse(self.driver_url()) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "***".to_string(),
        };

        f.debug_struct("ConnectionConfig")
            .field("url", &redacted_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: None,
            password: None,
            connect_timeout_ms: 10_000,
            application_name: Some("sqlbridge".into()),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set user name and password
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// URL without any `jdbc:` prefix
    pub fn driver_url(&self) -> &str {
        self.url
            .strip_prefix("jdbc:")
            .unwrap_or(self.url.as_str())
    }

    /// Database type implied by the URL scheme
    pub fn database_type(&self) -> DatabaseType {
        DatabaseType::from_url(self.driver_url())
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// In-process scripted backend
    Memory,
    /// Unknown/custom
    Unknown,
}

impl DatabaseType {
    /// Detect the database type from a URL scheme
    pub fn from_url(url: &str) -> Self {
        let url = url.strip_prefix("jdbc:").unwrap_or(url);
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Self::PostgreSQL,
            "memory" => Self::Memory,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::Memory => write!(f, "Memory"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

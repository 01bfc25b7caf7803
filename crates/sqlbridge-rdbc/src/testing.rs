//! Scripted in-memory backend for tests.
//!
//! [`MemoryDatabase`] answers statements from canned result sets, update
//! counts and failures, serves paged `SELECT * ... ORDER BY 1 LIMIT .. OFFSET ..`
//! queries from in-memory tables, and records every statement it runs.
//!
//! ```rust,ignore
//! let db = MemoryDatabase::new();
//! db.set_result("SELECT 1", ResultSet::new(cols, rows));
//! let pool = SimpleConnectionPool::new(PoolConfig::new("memory:test"), db.factory()).await?;
//! ```

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{ResultSet, Row, Value};

static PAGE_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^SELECT \* FROM (?:"(\w+)"\.)?"(\w+)" ORDER BY 1(?: ASC)? LIMIT (\d+)(?: OFFSET (\d+))?$"#,
    )
    .expect("valid page query regex")
});

/// A statement the backend executed
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    /// SQL text as received
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    message: String,
    sql_state: Option<String>,
    vendor_code: Option<i32>,
}

impl ScriptedFailure {
    fn to_error(&self, sql: &str) -> Error {
        Error::Query {
            message: self.message.clone(),
            sql: Some(sql.to_string()),
            sql_state: self.sql_state.clone(),
            vendor_code: self.vendor_code,
            source: None,
        }
    }
}

#[derive(Default)]
struct State {
    results: HashMap<String, ResultSet>,
    updates: HashMap<String, u64>,
    failures: HashMap<String, ScriptedFailure>,
    tables: HashMap<String, ResultSet>,
    executed: Vec<ExecutedStatement>,
    connect_failure: Option<String>,
    latency: Option<Duration>,
    opened: usize,
    closed: usize,
}

/// Shared handle to a scripted in-memory database
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Connection factory bound to this database
    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(MemoryConnectionFactory { db: self.clone() })
    }

    /// Answer `sql` with a fixed result set
    pub fn set_result(&self, sql: impl Into<String>, result: ResultSet) {
        self.state().results.insert(sql.into(), result);
    }

    /// Answer `sql` (as an update) with an affected-row count
    pub fn set_update_count(&self, sql: impl Into<String>, count: u64) {
        self.state().updates.insert(sql.into(), count);
    }

    /// Fail `sql` with a database error
    pub fn fail_on(
        &self,
        sql: impl Into<String>,
        message: impl Into<String>,
        sql_state: Option<&str>,
        vendor_code: Option<i32>,
    ) {
        self.state().failures.insert(
            sql.into(),
            ScriptedFailure {
                message: message.into(),
                sql_state: sql_state.map(str::to_string),
                vendor_code,
            },
        );
    }

    /// Replace the full contents of a table used by paged queries
    pub fn set_table(&self, name: impl Into<String>, contents: ResultSet) {
        self.state().tables.insert(name.into(), contents);
    }

    /// Append rows to a table
    pub fn append_rows(&self, name: &str, rows: Vec<Row>) {
        if let Some(table) = self.state().tables.get_mut(name) {
            table.rows.extend(rows);
        }
    }

    /// Make new connections fail (or succeed again with `None`)
    pub fn fail_connections(&self, message: Option<&str>) {
        self.state().connect_failure = message.map(str::to_string);
    }

    /// Delay every statement by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Statements executed so far, in order
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state().executed.clone()
    }

    /// SQL text of executed statements, in order
    pub fn executed_sql(&self) -> Vec<String> {
        self.state().executed.iter().map(|s| s.sql.clone()).collect()
    }

    /// Number of connections opened
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    /// Number of connections closed
    pub fn closed(&self) -> usize {
        self.state().closed
    }

    /// Number of connections currently open
    pub fn open_connections(&self) -> usize {
        let state = self.state();
        state.opened - state.closed
    }

    fn record(&self, sql: &str, params: &[Value]) -> Option<Duration> {
        let mut state = self.state();
        state.executed.push(ExecutedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        state.latency
    }

    fn answer_query(&self, sql: &str) -> Result<ResultSet> {
        let state = self.state();
        if let Some(failure) = state.failures.get(sql) {
            return Err(failure.to_error(sql));
        }
        if let Some(result) = state.results.get(sql) {
            return Ok(result.clone());
        }
        if let Some(caps) = PAGE_QUERY.captures(sql) {
            let table = match (caps.get(1), caps.get(2)) {
                (Some(schema), Some(table)) => format!("{}.{}", schema.as_str(), table.as_str()),
                (None, Some(table)) => table.as_str().to_string(),
                _ => String::new(),
            };
            let limit: usize = caps[3].parse().unwrap_or(0);
            let offset: usize = caps
                .get(4)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let contents = state.tables.get(&table).ok_or_else(|| {
                Error::database(
                    format!("relation \"{table}\" does not exist"),
                    Some("42P01".into()),
                    None,
                )
            })?;
            let rows = contents.rows.iter().skip(offset).take(limit).cloned().collect();
            return Ok(ResultSet::new(contents.columns.clone(), rows));
        }
        Err(Error::query_with_sql("no scripted result", sql))
    }

    fn answer_update(&self, sql: &str) -> Result<u64> {
        let state = self.state();
        if let Some(failure) = state.failures.get(sql) {
            return Err(failure.to_error(sql));
        }
        if let Some(count) = state.updates.get(sql) {
            return Ok(*count);
        }
        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            return Ok(1);
        }
        Ok(0)
    }
}

/// Factory handing out connections to a [`MemoryDatabase`]
pub struct MemoryConnectionFactory {
    db: MemoryDatabase,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.db.state();
        if let Some(message) = &state.connect_failure {
            return Err(Error::connection(message.clone()));
        }
        state.opened += 1;
        drop(state);
        Ok(Box::new(MemoryConnection {
            db: self.db.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Memory
    }
}

/// Connection to a [`MemoryDatabase`]
pub struct MemoryConnection {
    db: MemoryDatabase,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.ensure_open()?;
        if let Some(latency) = self.db.record(sql, params) {
            tokio::time::sleep(latency).await;
        }
        self.db.answer_query(sql)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        if let Some(latency) = self.db.record(sql, params) {
            tokio::time::sleep(latency).await;
        }
        self.db.answer_update(sql)
    }

    async fn execute_batch(&self, statements: &[(&str, &[Value])]) -> Result<Vec<u64>> {
        self.ensure_open()?;
        // All-or-nothing: check every statement before recording any.
        let mut counts = Vec::with_capacity(statements.len());
        for (sql, _) in statements {
            counts.push(self.db.answer_update(sql)?);
        }
        for (sql, params) in statements {
            self.db.record(sql, params);
        }
        Ok(counts)
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.db.state().closed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnDescriptor, SqlType};

    fn numbers(n: i32) -> ResultSet {
        ResultSet::new(
            vec![ColumnDescriptor::new("n", SqlType::Integer)],
            (1..=n).map(|i| Row::new(vec![Value::Int32(i)])).collect(),
        )
    }

    #[tokio::test]
    async fn test_scripted_answers() {
        let db = MemoryDatabase::new();
        db.set_result("SELECT n FROM t", numbers(2));
        db.set_update_count("DELETE FROM t", 2);
        db.fail_on("DROP TABLE t", "permission denied", Some("42501"), Some(7));

        let conn = db.factory().connect(&ConnectionConfig::new("memory:")).await.unwrap();
        assert_eq!(conn.query("SELECT n FROM t", &[]).await.unwrap().len(), 2);
        assert_eq!(conn.execute("DELETE FROM t", &[]).await.unwrap(), 2);

        let err = conn.execute("DROP TABLE t", &[]).await.unwrap_err();
        assert_eq!(err.sql_state(), Some("42501"));
        assert_eq!(err.vendor_code(), Some(7));

        assert_eq!(db.executed_sql().len(), 3);
    }

    #[tokio::test]
    async fn test_paged_table_queries() {
        let db = MemoryDatabase::new();
        db.set_table("events", numbers(5));
        let conn = db.factory().connect(&ConnectionConfig::new("memory:")).await.unwrap();

        let page = conn
            .query(
                r#"SELECT * FROM "events" ORDER BY 1 ASC LIMIT 2 OFFSET 4"#,
                &[],
            )
            .await
            .unwrap();
        assert_eq!(page.rows, vec![Row::new(vec![Value::Int32(5)])]);
        assert_eq!(page.columns.len(), 1);

        let missing = conn
            .query(r#"SELECT * FROM "nope" ORDER BY 1 LIMIT 2 OFFSET 0"#, &[])
            .await
            .unwrap_err();
        assert_eq!(missing.sql_state(), Some("42P01"));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let db = MemoryDatabase::new();
        db.fail_on("bad", "syntax error", Some("42601"), None);
        let conn = db.factory().connect(&ConnectionConfig::new("memory:")).await.unwrap();

        let none: &[Value] = &[];
        let err = conn
            .execute_batch(&[("DELETE FROM a", none), ("bad", none)])
            .await
            .unwrap_err();
        assert_eq!(err.sql_state(), Some("42601"));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn test_connection_accounting() {
        let db = MemoryDatabase::new();
        let factory = db.factory();
        let conn = factory.connect(&ConnectionConfig::new("memory:")).await.unwrap();
        assert_eq!(db.open_connections(), 1);

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(db.closed(), 1);
        assert!(!conn.is_valid().await);

        db.fail_connections(Some("refused"));
        assert!(factory.connect(&ConnectionConfig::new("memory:")).await.is_err());
    }
}

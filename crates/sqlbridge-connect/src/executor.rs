//! Query/publish execution against a connection pool
//!
//! Each operation borrows one pooled connection for its duration and hands
//! it back on every path, success or failure. Nothing is retried here.

use sqlbridge_rdbc::dialect::SqlDialect;
use sqlbridge_rdbc::pool::ConnectionPool;
use sqlbridge_rdbc::types::Value;
use std::sync::Arc;
use tracing::debug;

use crate::document::{json_to_value, Document, Record};
use crate::error::{ConnectorError, Result};
use crate::mapper::{map_by_sql_type, RuntimeValueMapper};

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Runs statements for one database session
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Arc<dyn ConnectionPool>,
    dialect: Arc<dyn SqlDialect>,
}

impl QueryExecutor {
    /// Create an executor over a pool
    pub fn new(pool: Arc<dyn ConnectionPool>, dialect: Arc<dyn SqlDialect>) -> Self {
        Self { pool, dialect }
    }

    /// The pool this executor borrows from
    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Run a query and map its rows by declared SQL type
    ///
    /// A statement matching no rows yields an empty vector.
    pub async fn execute_query(&self, sql: &str) -> Result<Vec<Document>> {
        let conn = self.pool.get().await?;
        let rs = conn.query(sql, &[]).await?;
        debug!(rows = rs.len(), "Query executed");
        Ok(map_by_sql_type(&rs))
    }

    /// Run an update statement
    pub async fn execute_publish(&self, sql: &str) -> Result<u64> {
        let conn = self.pool.get().await?;
        let affected = conn.execute(sql, &[]).await?;
        debug!(affected, "Update executed");
        Ok(affected)
    }

    /// Run statements as one batch on one connection
    ///
    /// Every element must be a string; otherwise nothing is executed. The
    /// driver either applies the whole batch or reports one failure.
    pub async fn execute_batch(&self, statements: &[serde_json::Value]) -> Result<Vec<u64>> {
        let sql = statements
            .iter()
            .enumerate()
            .map(|(index, stmt)| {
                stmt.as_str().ok_or_else(|| ConnectorError::BatchType {
                    index,
                    found: json_type_name(stmt).to_string(),
                })
            })
            .collect::<Result<Vec<&str>>>()?;

        if sql.is_empty() {
            return Ok(Vec::new());
        }

        let none: &[Value] = &[];
        let batch: Vec<(&str, &[Value])> = sql.iter().map(|s| (*s, none)).collect();

        let conn = self.pool.get().await?;
        let counts = conn.execute_batch(&batch).await?;
        debug!(statements = counts.len(), "Batch executed");
        Ok(counts)
    }

    /// Insert one document into a table
    ///
    /// Columns follow the document's key order.
    pub async fn execute_insert(
        &self,
        table: &str,
        document: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<u64> {
        if document.is_empty() {
            return Err(ConnectorError::invalid_request(format!(
                "insert into {table} has no columns"
            )));
        }

        let columns: Vec<&str> = document.keys().map(String::as_str).collect();
        let sql = self.dialect.insert_sql(table, &columns)?;
        let params: Vec<Value> = document.values().map(json_to_value).collect();

        let conn = self.pool.get().await?;
        let affected = conn.execute(&sql, &params).await?;
        debug!(table, affected, "Insert executed");
        Ok(affected)
    }

    /// Read one page of a table, pages numbered from 1
    pub async fn load_page(
        &self,
        table: &str,
        page: u64,
        page_size: u64,
        mapper: &RuntimeValueMapper,
    ) -> Result<Vec<Record>> {
        let offset = page.saturating_sub(1).saturating_mul(page_size);
        let sql = self.dialect.select_page_sql(table, page_size, offset)?;

        let conn = self.pool.get().await?;
        let rs = conn.query(&sql, &[]).await?;
        drop(conn);
        mapper.map(&rs)
    }
}

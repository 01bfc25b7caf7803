//! SQL dialect abstraction for sqlbridge-rdbc
//!
//! Statement generation uses sea-query so identifiers are always quoted by
//! the query builder. Only the statements the bridge generates itself live
//! here: the paging select used by bulk loading and the parameterised insert
//! built from a document.

use crate::connection::DatabaseType;
use crate::error::{Error, Result};
use crate::security::{parse_table_name, validate_sql_identifier};
use sea_query::{
    Alias, Asterisk, Expr, IntoIden, Order, PostgresQueryBuilder, Query, SimpleExpr, TableRef,
};

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (1-based)
    fn placeholder(&self, index: usize) -> String;

    /// Get the LIMIT/OFFSET suffix
    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String;

    /// Select `limit` rows of a table starting at `offset` in a stable order
    ///
    /// `table` may be schema-qualified. Rows are ordered by the first column.
    fn select_page_sql(&self, table: &str, limit: u64, offset: u64) -> Result<String>;

    /// Parameterised INSERT of the given columns into a table
    fn insert_sql(&self, table: &str, columns: &[&str]) -> Result<String>;
}

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn limit_offset_sql(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(l) = limit {
            sql.push_str(&format!(" LIMIT {}", l));
        }
        if let Some(o) = offset {
            sql.push_str(&format!(" OFFSET {}", o));
        }
        sql
    }

    fn select_page_sql(&self, table: &str, limit: u64, offset: u64) -> Result<String> {
        let (schema, table) = parse_table_name(table)?;

        let mut stmt = Query::select();
        stmt.from(sea_table_ref(schema, table))
            .column(Asterisk)
            .order_by_expr(Expr::cust("1"), Order::Asc)
            .limit(limit)
            .offset(offset);

        Ok(stmt.to_string(PostgresQueryBuilder))
    }

    fn insert_sql(&self, table: &str, columns: &[&str]) -> Result<String> {
        if columns.is_empty() {
            return Err(Error::query(format!(
                "cannot insert into {table}: document has no columns"
            )));
        }
        let (schema, table) = parse_table_name(table)?;
        for col in columns {
            validate_sql_identifier(col)?;
        }

        let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();
        let values: Vec<SimpleExpr> = (1..=columns.len())
            .map(|i| Expr::cust(self.placeholder(i)))
            .collect();

        let mut stmt = Query::insert();
        stmt.into_table(sea_table_ref(schema, table))
            .columns(col_idens)
            .values(values)
            .map_err(|e| Error::query(format!("failed to build insert: {e}")))?;

        Ok(stmt.to_string(PostgresQueryBuilder))
    }
}

/// Get the dialect for a database type
pub fn dialect_for(db: DatabaseType) -> Box<dyn SqlDialect> {
    match db {
        // The in-memory backend understands PostgreSQL-flavoured statements.
        DatabaseType::PostgreSQL | DatabaseType::Memory | DatabaseType::Unknown => {
            Box::new(PostgresDialect)
        }
    }
}

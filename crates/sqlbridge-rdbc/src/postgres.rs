//! PostgreSQL backend implementation for sqlbridge-rdbc
//!
//! - Connections over `tokio-postgres` (no TLS)
//! - Native values converted into the closed [`Value`] set; types outside
//!   it keep their wire encoding as text or bytes
//! - Parameters coerced to the statement's declared parameter types
//! - Batches executed inside a transaction

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{ColumnDescriptor, ResultSet, Row, SqlType, Value};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Map a driver error, keeping SQLSTATE when the server reported one
fn pg_error(e: tokio_postgres::Error, sql: &str) -> Error {
    if e.is_closed() {
        return Error::connection_with_source("connection closed", e);
    }
    match e.as_db_error() {
        Some(db) => Error::Query {
            message: db.message().to_string(),
            sql: Some(sql.to_string()),
            sql_state: Some(db.code().code().to_string()),
            // PostgreSQL has no numeric vendor codes
            vendor_code: None,
            source: None,
        },
        None => Error::Query {
            message: e.to_string(),
            sql: Some(sql.to_string()),
            sql_state: e.code().map(|c| c.code().to_string()),
            vendor_code: None,
            source: Some(Box::new(e)),
        },
    }
}

fn sql_type_of(ty: &Type) -> SqlType {
    match *ty {
        Type::BOOL => SqlType::Boolean,
        Type::CHAR => SqlType::TinyInt,
        Type::INT2 => SqlType::SmallInt,
        Type::INT4 => SqlType::Integer,
        Type::INT8 => SqlType::BigInt,
        Type::FLOAT4 => SqlType::Real,
        Type::FLOAT8 => SqlType::Double,
        Type::NUMERIC => SqlType::Decimal,
        Type::BPCHAR => SqlType::Char,
        Type::VARCHAR | Type::NAME => SqlType::Varchar,
        Type::TEXT => SqlType::Clob,
        Type::BYTEA => SqlType::Binary,
        Type::DATE => SqlType::Date,
        Type::TIME => SqlType::Time,
        Type::TIMESTAMP => SqlType::Timestamp,
        Type::TIMESTAMPTZ => SqlType::TimestampTz,
        Type::UUID => SqlType::Uuid,
        Type::JSON | Type::JSONB => SqlType::Json,
        _ if matches!(ty.kind(), tokio_postgres::types::Kind::Array(_)) => SqlType::Array,
        _ => SqlType::Other(ty.name().to_string()),
    }
}

fn column_value<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Result<Value>
where
    T: tokio_postgres::types::FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    let label = row.columns()[idx].name();
    row.try_get::<_, Option<T>>(idx)
        .map(|v| v.map(wrap).unwrap_or(Value::Null))
        .map_err(|e| Error::type_conversion_in(label, format!("column '{label}': {e}")))
}

fn array_value<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Value>
where
    T: tokio_postgres::types::FromSql<'a> + Into<Value>,
{
    column_value::<Vec<Option<T>>, _>(row, idx, |items| {
        Value::Array(items.into_iter().map(Value::from).collect())
    })
}

/// Wire encoding of a column whose type has no dedicated decoder
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

impl RawValue {
    /// Printable UTF-8 becomes a string, anything else stays bytes
    fn into_value(self) -> Value {
        match String::from_utf8(self.0) {
            Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
                Value::String(text)
            }
            Ok(text) => Value::Bytes(text.into_bytes()),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }
}

/// Convert one PostgreSQL column value into a [`Value`]
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Result<Value> {
    match *pg_type {
        Type::BOOL => column_value(row, idx, Value::Bool),
        Type::CHAR => column_value(row, idx, Value::Int8),
        Type::INT2 => column_value(row, idx, Value::Int16),
        Type::INT4 => column_value(row, idx, Value::Int32),
        Type::INT8 => column_value(row, idx, Value::Int64),
        Type::FLOAT4 => column_value(row, idx, Value::Float32),
        Type::FLOAT8 => column_value(row, idx, Value::Float64),
        Type::NUMERIC => column_value(row, idx, Value::Decimal),
        Type::VARCHAR | Type::BPCHAR | Type::NAME => column_value(row, idx, Value::String),
        Type::TEXT => column_value(row, idx, Value::Clob),
        Type::BYTEA => column_value(row, idx, Value::Bytes),
        Type::DATE => column_value(row, idx, Value::Date),
        Type::TIME => column_value(row, idx, Value::Time),
        Type::TIMESTAMP => column_value(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => column_value(row, idx, Value::DateTimeTz),
        Type::UUID => column_value(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => column_value(row, idx, Value::Json),
        Type::BOOL_ARRAY => array_value::<bool>(row, idx),
        Type::INT2_ARRAY => array_value::<i16>(row, idx),
        Type::INT4_ARRAY => array_value::<i32>(row, idx),
        Type::INT8_ARRAY => array_value::<i64>(row, idx),
        Type::FLOAT8_ARRAY => array_value::<f64>(row, idx),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => array_value::<String>(row, idx),
        // Enums and citext arrive as UTF-8 text; interval, inet, money etc. as bytes.
        _ => column_value(row, idx, RawValue::into_value),
    }
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row> {
    let values = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(values))
}

fn typed_null(ty: &Type) -> BoxedParam {
    match *ty {
        Type::BOOL => Box::new(Option::<bool>::None),
        Type::INT2 => Box::new(Option::<i16>::None),
        Type::INT4 => Box::new(Option::<i32>::None),
        Type::INT8 => Box::new(Option::<i64>::None),
        Type::FLOAT4 => Box::new(Option::<f32>::None),
        Type::FLOAT8 => Box::new(Option::<f64>::None),
        Type::NUMERIC => Box::new(Option::<Decimal>::None),
        Type::BYTEA => Box::new(Option::<Vec<u8>>::None),
        Type::DATE => Box::new(Option::<chrono::NaiveDate>::None),
        Type::TIME => Box::new(Option::<chrono::NaiveTime>::None),
        Type::TIMESTAMP => Box::new(Option::<chrono::NaiveDateTime>::None),
        Type::TIMESTAMPTZ => Box::new(Option::<chrono::DateTime<chrono::Utc>>::None),
        Type::UUID => Box::new(Option::<uuid::Uuid>::None),
        Type::JSON | Type::JSONB => Box::new(Option::<serde_json::Value>::None),
        _ => Box::new(Option::<String>::None),
    }
}

fn native_param(value: &Value) -> BoxedParam {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int8(n) => Box::new(*n),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) | Value::Clob(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
        Value::Array(arr) => Box::new(serde_json::to_value(arr).unwrap_or_default()),
    }
}

fn coerce_error(value: &Value, ty: &Type) -> Error {
    Error::type_conversion(format!(
        "cannot bind {} value to parameter of type {}",
        value.type_name(),
        ty.name()
    ))
}

/// Convert a [`Value`] into a parameter of the statement's declared type
///
/// Documents arrive with JSON-shaped scalars (64-bit integers, doubles,
/// strings), so numeric values are narrowed or widened to the column type.
fn value_to_sql(value: &Value, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(typed_null(ty));
    }
    let param: BoxedParam = match *ty {
        Type::INT2 => {
            let n = value.as_i64().ok_or_else(|| coerce_error(value, ty))?;
            Box::new(i16::try_from(n).map_err(|_| coerce_error(value, ty))?)
        }
        Type::INT4 => {
            let n = value.as_i64().ok_or_else(|| coerce_error(value, ty))?;
            Box::new(i32::try_from(n).map_err(|_| coerce_error(value, ty))?)
        }
        Type::INT8 => Box::new(value.as_i64().ok_or_else(|| coerce_error(value, ty))?),
        Type::FLOAT4 => Box::new(value.as_f64().ok_or_else(|| coerce_error(value, ty))? as f32),
        Type::FLOAT8 => Box::new(value.as_f64().ok_or_else(|| coerce_error(value, ty))?),
        Type::NUMERIC => Box::new(match value {
            Value::Decimal(d) => *d,
            Value::Float32(f) => {
                Decimal::try_from(f64::from(*f)).map_err(|_| coerce_error(value, ty))?
            }
            Value::Float64(f) => Decimal::try_from(*f).map_err(|_| coerce_error(value, ty))?,
            other => other
                .as_string()
                .and_then(|s| s.parse::<Decimal>().ok())
                .ok_or_else(|| coerce_error(value, ty))?,
        }),
        Type::BOOL => Box::new(value.as_bool().ok_or_else(|| coerce_error(value, ty))?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            Box::new(value.as_string().ok_or_else(|| coerce_error(value, ty))?)
        }
        Type::JSON | Type::JSONB => Box::new(match value {
            Value::Json(j) => j.clone(),
            other => serde_json::to_value(other.as_string())
                .map_err(|e| Error::type_conversion(e.to_string()))?,
        }),
        _ => native_param(value),
    };
    Ok(param)
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: tokio_postgres::Client,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }

    async fn prepare_params(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<(tokio_postgres::Statement, Vec<BoxedParam>)> {
        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| pg_error(e, sql))?;
        if stmt.params().len() != params.len() {
            return Err(Error::query_with_sql(
                format!(
                    "statement expects {} parameters, got {}",
                    stmt.params().len(),
                    params.len()
                ),
                sql,
            ));
        }
        let boxed = params
            .iter()
            .zip(stmt.params())
            .map(|(v, ty)| value_to_sql(v, ty))
            .collect::<Result<Vec<_>>>()?;
        Ok((stmt, boxed))
    }
}

fn param_refs(boxed: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.ensure_open()?;
        let (stmt, boxed) = self.prepare_params(sql, params).await?;

        let columns = stmt
            .columns()
            .iter()
            .map(|c| ColumnDescriptor::new(c.name(), sql_type_of(c.type_())))
            .collect();

        let pg_rows = self
            .client
            .query(&stmt, &param_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, sql))?;

        let rows = pg_rows
            .iter()
            .map(pg_row_to_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(ResultSet::new(columns, rows))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let (stmt, boxed) = self.prepare_params(sql, params).await?;

        self.client
            .execute(&stmt, &param_refs(&boxed))
            .await
            .map_err(|e| pg_error(e, sql))
    }

    async fn execute_batch(&self, statements: &[(&str, &[Value])]) -> Result<Vec<u64>> {
        self.ensure_open()?;
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| pg_error(e, "BEGIN"))?;

        let mut counts = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            match self.execute(sql, params).await {
                Ok(n) => counts.push(n),
                Err(e) => {
                    if let Err(rb) = self.client.batch_execute("ROLLBACK").await {
                        warn!(error = %rb, "Rollback after failed batch also failed");
                    }
                    return Err(e);
                }
            }
        }

        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| pg_error(e, "COMMIT"))?;
        Ok(counts)
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

impl PgConnectionFactory {
    fn pg_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
        let mut pg: tokio_postgres::Config = config
            .driver_url()
            .parse()
            .map_err(|e| Error::config(format!("invalid PostgreSQL URL: {e}")))?;
        if let Some(user) = &config.username {
            pg.user(user);
        }
        if let Some(password) = &config.password {
            pg.password(password);
        }
        if let Some(app) = &config.application_name {
            pg.application_name(app);
        }
        if config.connect_timeout_ms > 0 {
            pg.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        }
        Ok(pg)
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let pg = Self::pg_config(config)?;
        let (client, connection) = pg.connect(tokio_postgres::NoTls).await.map_err(|e| {
            // invalid_password / invalid_authorization_specification
            let auth_failed = matches!(e.code().map(|c| c.code()), Some("28P01" | "28000"));
            if auth_failed {
                Error::Authentication {
                    message: e.to_string(),
                }
            } else {
                Error::connection_with_source("failed to connect", e)
            }
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection terminated");
            }
        });

        debug!(config = ?config, "Opened PostgreSQL connection");
        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}

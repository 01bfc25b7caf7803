//! Value and result-set types for sqlbridge-rdbc
//!
//! [`Value`] is a closed set of scalars. Backends convert every native value
//! into one of these variants while building a [`ResultSet`] and fail with a
//! type-conversion error for anything else, so consumers can match
//! exhaustively instead of inspecting runtime classes.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// SQL value type that can hold any supported database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer (TINYINT, "char")
    Int8(i8),
    /// 16-bit signed integer (SMALLINT)
    Int16(i16),
    /// 32-bit signed integer (INTEGER)
    Int32(i32),
    /// 64-bit signed integer (BIGINT)
    Int64(i64),
    /// 32-bit floating point (REAL)
    Float32(f32),
    /// 64-bit floating point (DOUBLE PRECISION)
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, DECIMAL)
    Decimal(Decimal),
    /// Text string (VARCHAR, CHAR)
    String(String),
    /// Large character object (TEXT, CLOB), fully materialized
    Clob(String),
    /// Binary data (BYTEA, BLOB, VARBINARY)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (TIMESTAMP)
    DateTime(NaiveDateTime),
    /// Timestamp with timezone (TIMESTAMPTZ)
    DateTimeTz(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
    /// JSON value
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if value is a date, time or timestamp
    #[inline]
    pub const fn is_temporal(&self) -> bool {
        matches!(
            self,
            Self::Date(_) | Self::Time(_) | Self::DateTime(_) | Self::DateTimeTz(_)
        )
    }

    /// Get SQL type name of the runtime value
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int8(_) => "TINYINT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "VARCHAR",
            Self::Clob(_) => "CLOB",
            Self::Bytes(_) => "BYTEA",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
            Self::Uuid(_) => "UUID",
            Self::Json(_) => "JSONB",
            Self::Array(_) => "ARRAY",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int8(n) => Some(*n != 0),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(n) => Some(i64::from(*n)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int8(n) => Some(f64::from(*n)),
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Borrow textual content
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Clob(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow binary content
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Re-read a temporal value as a timestamp
    ///
    /// Dates are taken at midnight and times on the epoch date, the way a
    /// driver's timestamp getter widens narrower temporal columns.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(d) => d.and_hms_opt(0, 0, 0),
            Self::Time(t) => Some(NaiveDate::from_ymd_opt(1970, 1, 1)?.and_time(*t)),
            Self::DateTime(dt) => Some(*dt),
            Self::DateTimeTz(dt) => Some(dt.naive_utc()),
            _ => None,
        }
    }

    /// Owned string form of a scalar value, `None` for NULL, bytes and arrays
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) | Self::Clob(s) => Some(s.clone()),
            Self::Int8(n) => Some(n.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            Self::Date(d) => Some(d.to_string()),
            Self::Time(t) => Some(t.to_string()),
            Self::DateTime(dt) => Some(dt.to_string()),
            Self::DateTimeTz(dt) => Some(dt.to_string()),
            Self::Json(j) => Some(j.to_string()),
            Self::Null | Self::Bytes(_) | Self::Array(_) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Declared SQL type of a result-set column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// NUMERIC / DECIMAL
    Decimal,
    Char,
    Varchar,
    /// TEXT / CLOB
    Clob,
    Binary,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Array,
    /// Vendor type not in the list above, by name
    Other(String),
}

impl SqlType {
    /// Parse a (case-insensitive) vendor type name
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" | "bit" => Self::Boolean,
            "tinyint" | "char\"" => Self::TinyInt,
            "int2" | "smallint" => Self::SmallInt,
            "int4" | "int" | "integer" | "serial" => Self::Integer,
            "int8" | "bigint" | "bigserial" => Self::BigInt,
            "float4" | "real" => Self::Real,
            "float8" | "double" | "double precision" | "float" => Self::Double,
            "numeric" | "decimal" => Self::Decimal,
            "bpchar" | "char" | "character" | "nchar" => Self::Char,
            "varchar" | "character varying" | "nvarchar" | "name" => Self::Varchar,
            "text" | "clob" | "nclob" | "longtext" => Self::Clob,
            "bytea" | "blob" | "binary" | "varbinary" => Self::Binary,
            "date" => Self::Date,
            "time" | "timetz" => Self::Time,
            "timestamp" | "datetime" => Self::Timestamp,
            "timestamptz" | "timestamp with time zone" => Self::TimestampTz,
            "uuid" => Self::Uuid,
            "json" | "jsonb" => Self::Json,
            other if other.starts_with('_') || other.ends_with("[]") => Self::Array,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Char => "CHAR",
            Self::Varchar => "VARCHAR",
            Self::Clob => "CLOB",
            Self::Binary => "BINARY",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Uuid => "UUID",
            Self::Json => "JSON",
            Self::Array => "ARRAY",
            Self::Other(name) => return write!(f, "{}", name.to_ascii_uppercase()),
        };
        f.write_str(name)
    }
}

/// Result-set column description
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Result-set label (alias if the statement gave one)
    pub label: String,
    /// Declared column name
    pub name: String,
    /// Declared SQL type
    pub sql_type: SqlType,
}

impl ColumnDescriptor {
    /// Create a column whose label equals its name
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            sql_type,
        }
    }

    /// Set a distinct result-set label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Database row as positional column values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Consume the row
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Rows of one statement together with their column descriptions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column descriptions, populated even when there are no rows
    pub columns: Vec<ColumnDescriptor>,
    /// Rows in the order the backend returned them
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create a result set
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column index for a label (case-insensitive)
    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.label.eq_ignore_ascii_case(label))
    }

    /// Value of a named column in a given row
    pub fn get(&self, row: usize, label: &str) -> Option<&Value> {
        let idx = self.column_index(label)?;
        self.rows.get(row)?.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int32(0).is_null());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int32(42).as_i64(), Some(42));
        assert_eq!(Value::Float64(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Clob("long".into()).as_str(), Some("long"));
        assert_eq!(Value::Null.as_string(), None);
        assert_eq!(Value::Int64(7).as_string().as_deref(), Some("7"));
    }

    #[test]
    fn test_value_from_impl() {
        let v: Value = 42_i32.into();
        assert!(matches!(v, Value::Int32(42)));

        let v: Value = "hello".into();
        assert!(matches!(v, Value::String(s) if s == "hello"));

        let v: Value = None::<i32>.into();
        assert!(v.is_null());
    }

    #[test]
    fn test_temporal_widening() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let ts = Value::Date(date).as_timestamp().unwrap();
        assert_eq!(ts, date.and_hms_opt(0, 0, 0).unwrap());

        let time = NaiveTime::from_hms_opt(12, 30, 5).unwrap();
        let ts = Value::Time(time).as_timestamp().unwrap();
        assert_eq!(ts.time(), time);

        assert!(Value::Int32(1).as_timestamp().is_none());
        assert!(Value::Date(date).is_temporal());
    }

    #[test]
    fn test_sql_type_names() {
        assert_eq!(SqlType::from_type_name("NUMERIC"), SqlType::Decimal);
        assert_eq!(SqlType::from_type_name("int4"), SqlType::Integer);
        assert_eq!(SqlType::from_type_name("timestamptz"), SqlType::TimestampTz);
        assert_eq!(SqlType::from_type_name("_int4"), SqlType::Array);
        assert_eq!(
            SqlType::from_type_name("geometry"),
            SqlType::Other("geometry".into())
        );
        assert_eq!(SqlType::Other("geometry".into()).to_string(), "GEOMETRY");
    }

    #[test]
    fn test_result_set_lookup() {
        let rs = ResultSet::new(
            vec![
                ColumnDescriptor::new("id", SqlType::Integer),
                ColumnDescriptor::new("user_name", SqlType::Varchar).with_label("name"),
            ],
            vec![Row::new(vec![Value::Int32(1), Value::from("Alice")])],
        );

        assert_eq!(rs.len(), 1);
        assert_eq!(rs.column_count(), 2);
        assert_eq!(rs.get(0, "NAME"), Some(&Value::from("Alice")));
        assert_eq!(rs.get(0, "user_name"), None);
        assert_eq!(rs.get(1, "id"), None);
    }
}

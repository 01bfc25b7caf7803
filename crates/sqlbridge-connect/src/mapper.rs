//! Row-to-document mapping
//!
//! Two strategies, picked by call site:
//!
//! - [`map_by_sql_type`] dispatches on the declared column type. Interactive
//!   queries and the polling scheduler use it. Temporal columns get fixed
//!   text formats and NULL columns are left out of the document.
//! - [`RuntimeValueMapper`] dispatches on the fetched value. The bulk loader
//!   uses it. NULLs are kept as explicit nulls, labels can be rewritten to
//!   camelCase and any value outside the supported set aborts the mapping.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlbridge_rdbc::types::{ResultSet, SqlType, Value};

use crate::document::{value_to_json, Document, Record};
use crate::error::{ConnectorError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.3f%z";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";
const RUNTIME_TEMPORAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn utc(dt: &NaiveDateTime) -> DateTime<Utc> {
    dt.and_utc()
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn format_date(value: &Value) -> Option<String> {
    let date = match value {
        Value::Date(d) => *d,
        Value::DateTime(dt) => dt.date(),
        Value::DateTimeTz(dt) => dt.date_naive(),
        _ => return None,
    };
    Some(date.format(DATE_FORMAT).to_string())
}

fn format_time(value: &Value) -> Option<String> {
    let time: NaiveTime = match value {
        Value::Time(t) => *t,
        Value::DateTime(dt) => dt.time(),
        Value::DateTimeTz(dt) => return Some(dt.format(TIME_FORMAT).to_string()),
        _ => return None,
    };
    Some(utc(&epoch().and_time(time)).format(TIME_FORMAT).to_string())
}

fn format_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::DateTimeTz(dt) => Some(dt.format(TIMESTAMP_FORMAT).to_string()),
        other => other
            .as_timestamp()
            .map(|dt| utc(&dt).format(TIMESTAMP_FORMAT).to_string()),
    }
}

/// Map every row by declared SQL type
///
/// Columns are keyed by result-set label. A value whose variant does not
/// fit its declared temporal type falls back to its native form, so no
/// column type is rejected here.
pub fn map_by_sql_type(rs: &ResultSet) -> Vec<Document> {
    rs.rows
        .iter()
        .map(|row| {
            let mut doc = Document::with_capacity(rs.columns.len());
            for (column, value) in rs.columns.iter().zip(row.values()) {
                if value.is_null() {
                    continue;
                }
                let formatted = match column.sql_type {
                    SqlType::Date => format_date(value),
                    SqlType::Time => format_time(value),
                    SqlType::Timestamp | SqlType::TimestampTz => format_timestamp(value),
                    _ => None,
                };
                let json = match formatted {
                    Some(text) => serde_json::Value::String(text),
                    None => value_to_json(value),
                };
                doc.insert(column.label.clone(), json);
            }
            doc
        })
        .collect()
}

/// Rewrite a `snake_case` label to `camelCase`
///
/// The label is lower-cased first, then every underscore followed by a
/// letter is dropped and the letter upper-cased.
pub fn snake_to_camel(label: &str) -> String {
    let lower = label.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut chars = lower.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('_', Some(next)) if next.is_ascii_lowercase() => {
                out.push(next.to_ascii_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Maps rows by the runtime variant of each value
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeValueMapper {
    camel_case: bool,
}

impl RuntimeValueMapper {
    /// Create a mapper, optionally rewriting labels to camelCase
    pub fn new(camel_case: bool) -> Self {
        Self { camel_case }
    }

    fn convert(&self, column: &str, value: &Value) -> Result<serde_json::Value> {
        match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::DateTimeTz(_) => {
                let ts = value
                    .as_timestamp()
                    .ok_or_else(|| unmappable(column, value))?;
                Ok(serde_json::Value::String(
                    ts.format(RUNTIME_TEMPORAL_FORMAT).to_string(),
                ))
            }
            Value::Bool(_)
            | Value::Int8(_)
            | Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Float32(_)
            | Value::Float64(_)
            | Value::Decimal(_)
            | Value::String(_)
            | Value::Clob(_)
            | Value::Bytes(_) => Ok(value_to_json(value)),
            Value::Uuid(_) | Value::Json(_) | Value::Array(_) => Err(unmappable(column, value)),
        }
    }

    /// Map a whole result set
    ///
    /// Fails on the first unmappable value; no partial result is returned.
    pub fn map(&self, rs: &ResultSet) -> Result<Vec<Record>> {
        if rs.column_count() == 1 {
            let label = &rs.columns[0].label;
            return rs
                .rows
                .iter()
                .map(|row| {
                    let value = row.get(0).unwrap_or(&Value::Null);
                    let scalar = match self.convert(label, value)? {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    };
                    Ok(Record::Scalar(scalar))
                })
                .collect();
        }

        let labels: Vec<String> = rs
            .columns
            .iter()
            .map(|c| {
                if self.camel_case {
                    snake_to_camel(&c.label)
                } else {
                    c.label.clone()
                }
            })
            .collect();

        rs.rows
            .iter()
            .map(|row| {
                let mut doc = Document::with_capacity(labels.len());
                for (label, value) in labels.iter().zip(row.values()) {
                    doc.insert(label.clone(), self.convert(label, value)?);
                }
                Ok(Record::Document(doc))
            })
            .collect()
    }
}

fn unmappable(column: &str, value: &Value) -> ConnectorError {
    ConnectorError::UnmappableType {
        column: column.to_string(),
        type_name: value.type_name().to_string(),
    }
}

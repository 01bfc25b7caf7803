//! Row documents and JSON conversion of driver values

use base64::Engine;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlbridge_rdbc::types::Value;
use std::str::FromStr;

/// One mapped row: column label to JSON scalar, in result-set column order
pub type Document = IndexMap<String, serde_json::Value>;

/// One element of a mapped result
///
/// Multi-column rows become documents. The runtime-value strategy turns
/// each row of a single-column result into a bare scalar instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    /// Keyed row
    Document(Document),
    /// String form of the only column, `None` for SQL NULL
    Scalar(Option<String>),
}

impl Record {
    /// Borrow the document, if this is one
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            Self::Scalar(_) => None,
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Document(doc) => serde_json::Value::Object(
                doc.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ),
            Self::Scalar(Some(s)) => serde_json::Value::String(s.clone()),
            Self::Scalar(None) => serde_json::Value::Null,
        }
    }
}

impl From<Document> for Record {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

/// Native JSON representation of a driver value
///
/// Decimals keep their exact text, bytes are base64 encoded and floats that
/// JSON cannot carry (NaN, infinities) become null.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int8(n) => Json::from(*n),
        Value::Int16(n) => Json::from(*n),
        Value::Int32(n) => Json::from(*n),
        Value::Int64(n) => Json::from(*n),
        Value::Float32(n) => float_to_json(f64::from(*n)),
        Value::Float64(n) => float_to_json(*n),
        Value::Decimal(d) => Json::String(d.to_string()),
        Value::String(s) | Value::Clob(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Json::String(t.format("%H:%M:%S%.3f").to_string()),
        Value::DateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
        Value::DateTimeTz(dt) => Json::String(dt.to_rfc3339()),
        Value::Uuid(u) => Json::String(u.to_string()),
        Value::Json(j) => j.clone(),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
    }
}

fn float_to_json(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Statement parameter for a JSON field of an insert document
///
/// Integers bind as BIGINT, other numbers as DECIMAL when they parse
/// exactly and DOUBLE otherwise. Objects and arrays bind as JSON.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else if let Ok(d) = Decimal::from_str(&n.to_string()) {
                Value::Decimal(d)
            } else {
                Value::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::String(s.clone()),
        Json::Array(_) | Json::Object(_) => Value::Json(json.clone()),
    }
}

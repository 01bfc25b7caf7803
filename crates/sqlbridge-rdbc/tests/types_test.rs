//! Unit tests for sqlbridge-rdbc types module

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlbridge_rdbc::types::{ColumnDescriptor, ResultSet, Row, SqlType, Value};
use std::str::FromStr;

#[test]
fn test_value_null() {
    let v = Value::Null;
    assert!(v.is_null());
    assert_eq!(v.as_str(), None);
    assert_eq!(v.as_i64(), None);
    assert_eq!(v.as_f64(), None);
    assert_eq!(v.as_bool(), None);
    assert_eq!(v.as_string(), None);
}

#[test]
fn test_value_integer_types() {
    assert_eq!(Value::Int8(42).as_i64(), Some(42));
    assert_eq!(Value::Int16(-100).as_i64(), Some(-100));
    assert_eq!(Value::Int32(1_000_000).as_i64(), Some(1_000_000));
    assert_eq!(
        Value::Int64(9_000_000_000_000).as_i64(),
        Some(9_000_000_000_000)
    );
}

#[test]
fn test_value_decimal() {
    let d = Decimal::from_str("12.50").unwrap();
    let v = Value::Decimal(d);
    assert_eq!(v.as_string().as_deref(), Some("12.50"));
    assert_eq!(v.type_name(), "DECIMAL");
}

#[test]
fn test_value_text_and_clob() {
    let v = Value::String("hello".into());
    assert_eq!(v.as_str(), Some("hello"));

    let v = Value::Clob("a long body".into());
    assert_eq!(v.as_str(), Some("a long body"));
    assert_eq!(v.type_name(), "CLOB");
}

#[test]
fn test_value_bytes() {
    let data = vec![0u8, 1, 2, 3];
    let v = Value::Bytes(data.clone());
    assert_eq!(v.as_bytes(), Some(&data[..]));
    assert_eq!(v.as_string(), None);
}

#[test]
fn test_value_timestamps() {
    let naive = NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(10, 30, 0)
        .unwrap();
    let tz = Utc.from_utc_datetime(&naive);

    assert_eq!(Value::DateTime(naive).as_timestamp(), Some(naive));
    assert_eq!(Value::DateTimeTz(tz).as_timestamp(), Some(naive));
    assert!(Value::DateTimeTz(tz).is_temporal());
    assert!(!Value::Int64(0).is_temporal());
}

#[test]
fn test_value_type_names_cover_structured_types() {
    assert_eq!(Value::Uuid(uuid::Uuid::nil()).type_name(), "UUID");
    assert_eq!(Value::Json(serde_json::json!({})).type_name(), "JSONB");
    assert_eq!(Value::Array(vec![]).type_name(), "ARRAY");
}

#[test]
fn test_sql_type_display_roundtrip_names() {
    for (name, ty) in [
        ("decimal", SqlType::Decimal),
        ("date", SqlType::Date),
        ("time", SqlType::Time),
        ("timestamp", SqlType::Timestamp),
        ("varchar", SqlType::Varchar),
    ] {
        assert_eq!(SqlType::from_type_name(name), ty);
        assert_eq!(ty.to_string(), name.to_ascii_uppercase());
    }
}

#[test]
fn test_result_set_keeps_columns_when_empty() {
    let rs = ResultSet::new(
        vec![
            ColumnDescriptor::new("id", SqlType::BigInt),
            ColumnDescriptor::new("name", SqlType::Varchar),
        ],
        vec![],
    );

    assert!(rs.is_empty());
    assert_eq!(rs.column_count(), 2);
    assert_eq!(rs.column_index("NAME"), Some(1));
}

#[test]
fn test_row_accessors() {
    let row = Row::new(vec![Value::Int32(1), Value::Null]);
    assert_eq!(row.len(), 2);
    assert_eq!(row.get(1), Some(&Value::Null));
    assert_eq!(row.get(2), None);
    assert_eq!(row.into_values().len(), 2);
}

//! Row parsing and column encoding helpers shared by the trackers.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::{Type, Value};
use std::str::FromStr;

use crate::models::JsonObj;
use crate::storage::error::StorageResult;

fn invalid_column(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), Type::Text)
}

/// Parses an optional JSON object column. Empty objects read back as `None`.
pub fn parse_optional_json_obj(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<JsonObj>> {
    let json_str: Option<String> = row.get(idx)?;
    match json_str {
        Some(s) => {
            let obj: Option<JsonObj> =
                serde_json::from_str(&s).map_err(|_| invalid_column(idx, column_name))?;
            Ok(obj.filter(|o| !o.is_empty()))
        }
        None => Ok(None),
    }
}

/// Parses an RFC3339 timestamp column.
pub fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let timestamp_str: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&timestamp_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid_column(idx, column_name))
}

/// Parses a nullable RFC3339 timestamp column.
pub fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let timestamp_str: Option<String> = row.get(idx)?;
    timestamp_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid_column(idx, column_name))
        })
        .transpose()
}

/// Parses a text column through `FromStr` (states, UUIDs).
pub fn parse_text<T: FromStr>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|_| invalid_column(idx, column_name))
}

/// Parses a nullable text column through `FromStr`.
pub fn parse_optional_text<T: FromStr>(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|_| invalid_column(idx, column_name))).transpose()
}

/// Encodes a timestamp as an RFC3339 text value.
pub fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    Value::Text(ts.to_rfc3339())
}

/// Encodes a nullable timestamp; `None` becomes SQL NULL.
pub fn optional_timestamp_value(ts: Option<&DateTime<Utc>>) -> Value {
    ts.map_or(Value::Null, timestamp_value)
}

/// Encodes an optional JSON object. `None` and `{}` both become SQL NULL so
/// that "unset" has a single stored form for write-once columns.
pub fn optional_json_value(obj: Option<&JsonObj>) -> StorageResult<Value> {
    match obj {
        Some(o) if !o.is_empty() => Ok(Value::Text(serde_json::to_string(o)?)),
        _ => Ok(Value::Null),
    }
}

/// Encodes optional text; `None` and blank strings become SQL NULL.
pub fn optional_text_value(text: Option<&str>) -> Value {
    match text {
        Some(t) if !t.trim().is_empty() => Value::Text(t.to_string()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_empty_json_object_reads_as_none() {
        let conn = Connection::open_in_memory().unwrap();
        let parsed = conn
            .query_row("SELECT '{}'", [], |row| parse_optional_json_obj(row, 0, "metrics"))
            .unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_json_object_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let parsed = conn
            .query_row(r#"SELECT '{"loss": 0.1}'"#, [], |row| {
                parse_optional_json_obj(row, 0, "metrics")
            })
            .unwrap()
            .unwrap();
        assert_eq!(parsed["loss"], serde_json::json!(0.1));
    }

    #[test]
    fn test_bad_timestamp_is_a_column_error() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .query_row("SELECT 'yesterday'", [], |row| parse_timestamp(row, 0, "start_time"))
            .unwrap_err();
        assert!(matches!(err, rusqlite::Error::InvalidColumnType(0, _, _)));
    }

    #[test]
    fn test_unset_values_encode_as_null() {
        assert_eq!(optional_json_value(None).unwrap(), Value::Null);
        assert_eq!(optional_json_value(Some(&JsonObj::new())).unwrap(), Value::Null);
        assert_eq!(optional_text_value(Some("  ")), Value::Null);
        assert_eq!(optional_timestamp_value(None), Value::Null);
        assert_eq!(optional_text_value(Some("torch")), Value::Text("torch".to_string()));
    }
}

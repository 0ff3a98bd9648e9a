//! Runtime column values and cursor scalars.

use crate::error::{Error, Result};
use crate::schema::ColumnType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write as _;

/// A single column value in transit between source and destination.
///
/// Each non-null variant corresponds to exactly one [`ColumnType`];
/// backends convert their native wire values into this representation at
/// the edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(rust_decimal::Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The semantic type this value inhabits, `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int(_) => Some(ColumnType::Int),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Bytes(_) => Some(ColumnType::Bytes),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Time(_) => Some(ColumnType::Time),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Json(_) => Some(ColumnType::Json),
            Value::Uuid(_) => Some(ColumnType::Uuid),
        }
    }

    /// View this value as a cursor scalar, if its type is cursor-capable.
    pub fn as_cursor(&self) -> Option<CursorValue> {
        match self {
            Value::Int(i) => Some(CursorValue::Int(*i)),
            Value::Text(s) => Some(CursorValue::Text(s.clone())),
            Value::Timestamp(ts) => Some(CursorValue::Timestamp(*ts)),
            _ => None,
        }
    }

    /// Append a canonical, collision-free encoding of this value to `out`.
    /// Used to build merge keys from primary-key values; variable-length
    /// payloads are length-prefixed so concatenated keys cannot alias.
    pub fn key_encode(&self, out: &mut String) {
        match self {
            Value::Null => out.push('n'),
            Value::Bool(b) => {
                let _ = write!(out, "b:{}", if *b { 1 } else { 0 });
            }
            Value::Int(i) => {
                let _ = write!(out, "i:{i}");
            }
            Value::Float(f) => {
                let _ = write!(out, "f:{}", f.to_bits());
            }
            Value::Decimal(d) => {
                let text = d.to_string();
                let _ = write!(out, "d:{}:{}", text.len(), text);
            }
            Value::Text(s) => {
                let _ = write!(out, "s:{}:{}", s.len(), s);
            }
            Value::Bytes(b) => {
                let _ = write!(out, "x:{}:", b.len());
                for byte in b {
                    let _ = write!(out, "{byte:02x}");
                }
            }
            Value::Date(d) => {
                let _ = write!(out, "D:{d}");
            }
            Value::Time(t) => {
                let _ = write!(out, "T:{t}");
            }
            Value::Timestamp(ts) => {
                let _ = write!(out, "t:{}", ts.timestamp_nanos_opt().unwrap_or_default());
            }
            Value::Json(j) => {
                let text = j.to_string();
                let _ = write!(out, "j:{}:{}", text.len(), text);
            }
            Value::Uuid(u) => {
                let _ = write!(out, "u:{u}");
            }
        }
        out.push('|');
    }
}

/// The typed scalar a watermark stores for one table.
///
/// Only totally ordered, persistable types qualify as cursors; comparison
/// across variants is a configuration fault, not an ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl CursorValue {
    pub const fn type_name(&self) -> &'static str {
        match self {
            CursorValue::Int(_) => "int",
            CursorValue::Text(_) => "text",
            CursorValue::Timestamp(_) => "timestamp",
        }
    }

    /// Compare two cursor values of the same variant. A cross-variant
    /// comparison means the cursor column changed type underneath the
    /// persisted state and is rejected.
    pub fn compare(&self, other: &CursorValue) -> Result<Ordering> {
        match (self, other) {
            (CursorValue::Int(a), CursorValue::Int(b)) => Ok(a.cmp(b)),
            (CursorValue::Text(a), CursorValue::Text(b)) => Ok(a.cmp(b)),
            (CursorValue::Timestamp(a), CursorValue::Timestamp(b)) => Ok(a.cmp(b)),
            _ => Err(Error::config(format!(
                "cursor value type mismatch: cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Parse a cursor value from its command-line / manifest notation:
    /// an integer, an RFC 3339 timestamp, a plain `YYYY-MM-DD` date
    /// (midnight UTC), or any other text verbatim.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::config("empty cursor value"));
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Ok(CursorValue::Int(i));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(CursorValue::Timestamp(ts.with_timezone(&Utc)));
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            let midnight = NaiveDateTime::new(date, NaiveTime::MIN);
            return Ok(CursorValue::Timestamp(midnight.and_utc()));
        }
        Ok(CursorValue::Text(trimmed.to_string()))
    }
}

impl std::fmt::Display for CursorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CursorValue::Int(i) => write!(f, "{i}"),
            CursorValue::Text(s) => f.write_str(s),
            CursorValue::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
        }
    }
}

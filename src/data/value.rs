//! Tagged runtime values.
//!
//! Every cell a table stores is a `Value`. Values know how to coerce into a
//! column's logical type, compare against each other with numeric widening,
//! and round-trip through the JSON snapshot format.

use crate::{Result, RowbaseError};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Logical column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Int64,
    Decimal,
    Bool,
    DateTime,
    String,
    Uuid,
    Bytes,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::Decimal => "DECIMAL",
            DataType::Bool => "BOOL",
            DataType::DateTime => "DATETIME",
            DataType::String => "STRING",
            DataType::Uuid => "UUID",
            DataType::Bytes => "BYTES",
        };
        write!(f, "{}", s)
    }
}

/// A single cell value
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Decimal(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    String(String),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The logical type of this value, if it has one.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Decimal(_) => Some(DataType::Decimal),
            Value::Bool(_) => Some(DataType::Bool),
            Value::DateTime(_) => Some(DataType::DateTime),
            Value::String(_) => Some(DataType::String),
            Value::Uuid(_) => Some(DataType::Uuid),
            Value::Bytes(_) => Some(DataType::Bytes),
        }
    }

    /// Null, or an empty string. Required-column validation treats both as
    /// absent.
    pub fn is_absent(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Integer view across the two integer widths.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view with widening to f64.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical form for join and group keys: both integer widths collapse
    /// to Int64 so `Int32(1)` and `Int64(1)` land in the same bucket.
    pub fn key_form(&self) -> Value {
        match self {
            Value::Int32(v) => Value::Int64(*v as i64),
            other => other.clone(),
        }
    }

    /// Ordering with numeric widening. `None` when either side is null or the
    /// types are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return Some(a.cmp(&b));
        }
        if let (Some(a), Some(b)) = (self.as_numeric(), other.as_numeric()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used by ORDER BY: nulls sort first, incomparable values
    /// fall back to a type-rank order so the sort stays consistent.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        self.type_rank().cmp(&other.type_rank())
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int32(_) | Value::Int64(_) | Value::Decimal(_) => 2,
            Value::DateTime(_) => 3,
            Value::String(_) => 4,
            Value::Uuid(_) => 5,
            Value::Bytes(_) => 6,
        }
    }

    /// Convert into the target logical type. Fails with `InvalidArgument`
    /// when the conversion is lossy or nonsensical. `Null` passes through
    /// for every target.
    pub fn coerce_to(&self, target: DataType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || {
            RowbaseError::InvalidArgument(format!(
                "cannot convert {} to {}",
                self.type_name(),
                target
            ))
        };
        match target {
            DataType::Int32 => match self {
                Value::Int32(v) => Ok(Value::Int32(*v)),
                Value::Int64(v) => i32::try_from(*v)
                    .map(Value::Int32)
                    .map_err(|_| mismatch()),
                Value::Decimal(v) if v.fract() == 0.0 => Ok(Value::Int32(*v as i32)),
                Value::String(s) => s.trim().parse().map(Value::Int32).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            DataType::Int64 => match self {
                Value::Int32(v) => Ok(Value::Int64(*v as i64)),
                Value::Int64(v) => Ok(Value::Int64(*v)),
                Value::Decimal(v) if v.fract() == 0.0 => Ok(Value::Int64(*v as i64)),
                Value::String(s) => s.trim().parse().map(Value::Int64).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            DataType::Decimal => match self {
                Value::Int32(v) => Ok(Value::Decimal(*v as f64)),
                Value::Int64(v) => Ok(Value::Decimal(*v as f64)),
                Value::Decimal(v) => Ok(Value::Decimal(*v)),
                Value::String(s) => s.trim().parse().map(Value::Decimal).map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            DataType::Bool => match self {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Int32(0) | Value::Int64(0) => Ok(Value::Bool(false)),
                Value::Int32(1) | Value::Int64(1) => Ok(Value::Bool(true)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            DataType::DateTime => match self {
                Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
                Value::String(s) => parse_datetime(s.trim()).ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            DataType::String => match self {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Int32(v) => Ok(Value::String(v.to_string())),
                Value::Int64(v) => Ok(Value::String(v.to_string())),
                Value::Decimal(v) => Ok(Value::String(v.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                Value::Uuid(u) => Ok(Value::String(u.to_string())),
                Value::DateTime(dt) => Ok(Value::String(dt.to_rfc3339())),
                _ => Err(mismatch()),
            },
            DataType::Uuid => match self {
                Value::Uuid(u) => Ok(Value::Uuid(*u)),
                Value::String(s) => Uuid::parse_str(s.trim())
                    .map(Value::Uuid)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            DataType::Bytes => match self {
                Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
                Value::String(s) => base64::engine::general_purpose::STANDARD
                    .decode(s.trim())
                    .map(Value::Bytes)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int32(_) => "INT32",
            Value::Int64(_) => "INT64",
            Value::Decimal(_) => "DECIMAL",
            Value::Bool(_) => "BOOL",
            Value::DateTime(_) => "DATETIME",
            Value::String(_) => "STRING",
            Value::Uuid(_) => "UUID",
            Value::Bytes(_) => "BYTES",
        }
    }

    /// Snapshot wire form.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int32(v) => serde_json::json!(v),
            Value::Int64(v) => serde_json::json!(v),
            Value::Decimal(v) => serde_json::json!(v),
            Value::Bool(b) => serde_json::json!(b),
            Value::DateTime(dt) => serde_json::json!(dt.to_rfc3339()),
            Value::String(s) => serde_json::json!(s),
            Value::Uuid(u) => serde_json::json!(u.to_string()),
            Value::Bytes(b) => {
                serde_json::json!(base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }

    /// Read back from the snapshot wire form, guided by the column type.
    pub fn from_json(json: &serde_json::Value, target: DataType) -> Result<Value> {
        let bad = |what: &str| {
            RowbaseError::Serialization(format!("cannot read {} as {}", what, target))
        };
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Value::Bool(*b).coerce_to(target),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i).coerce_to(target)
                } else if let Some(f) = n.as_f64() {
                    Value::Decimal(f).coerce_to(target)
                } else {
                    Err(bad("number"))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()).coerce_to(target),
            _ => Err(bad("composite JSON")),
        }
    }
}

/// ISO-8601, UTC assumed when no offset is present.
fn parse_datetime(s: &str) -> Option<Value> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(Value::DateTime(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Value::DateTime(Utc.from_utc_datetime(&naive)));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Value::DateTime(Utc.from_utc_datetime(&naive)));
    }
    None
}

// Equality is same-variant value equality (floats by bit pattern) so values
// can key primary-key indexes and GROUP BY buckets. Cross-type numeric
// equality goes through `compare`, not `==`.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Int32(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::Int64(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::Decimal(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Bool(b) => {
                4u8.hash(state);
                b.hash(state);
            }
            Value::DateTime(dt) => {
                5u8.hash(state);
                dt.timestamp_nanos_opt().unwrap_or_default().hash(state);
            }
            Value::String(s) => {
                6u8.hash(state);
                s.hash(state);
            }
            Value::Uuid(u) => {
                7u8.hash(state);
                u.hash(state);
            }
            Value::Bytes(b) => {
                8u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::String(s) => write!(f, "{}", s),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_compare_widens() {
        assert_eq!(
            Value::Int32(5).compare(&Value::Int64(5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Int64(2).compare(&Value::Decimal(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.compare(&Value::Int32(1)), None);
        assert_eq!(
            Value::String("a".into()).compare(&Value::String("b".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_coerce_string_literals() {
        assert_eq!(
            Value::String("42".into()).coerce_to(DataType::Int32).unwrap(),
            Value::Int32(42)
        );
        assert_eq!(
            Value::String("3.5".into())
                .coerce_to(DataType::Decimal)
                .unwrap(),
            Value::Decimal(3.5)
        );
        assert_eq!(
            Value::String("true".into()).coerce_to(DataType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert!(Value::String("nope".into())
            .coerce_to(DataType::Int64)
            .is_err());
    }

    #[test]
    fn test_coerce_datetime_assumes_utc() {
        let v = Value::String("2024-03-01T10:30:00".into())
            .coerce_to(DataType::DateTime)
            .unwrap();
        match v {
            Value::DateTime(dt) => assert_eq!(dt.to_rfc3339(), "2024-03-01T10:30:00+00:00"),
            other => panic!("expected DateTime, got {:?}", other),
        }

        let offset = Value::String("2024-03-01T10:30:00+02:00".into())
            .coerce_to(DataType::DateTime)
            .unwrap();
        match offset {
            Value::DateTime(dt) => assert_eq!(dt.to_rfc3339(), "2024-03-01T08:30:00+00:00"),
            other => panic!("expected DateTime, got {:?}", other),
        }
    }

    #[test]
    fn test_null_passes_every_coercion() {
        for dt in [
            DataType::Int32,
            DataType::Int64,
            DataType::Decimal,
            DataType::Bool,
            DataType::DateTime,
            DataType::String,
            DataType::Uuid,
            DataType::Bytes,
        ] {
            assert_eq!(Value::Null.coerce_to(dt).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_json_round_trip() {
        let uuid = Uuid::new_v4();
        let cases = [
            (Value::Int32(7), DataType::Int32),
            (Value::Int64(-3), DataType::Int64),
            (Value::Decimal(1.25), DataType::Decimal),
            (Value::Bool(true), DataType::Bool),
            (Value::String("hi".into()), DataType::String),
            (Value::Uuid(uuid), DataType::Uuid),
            (Value::Bytes(vec![1, 2, 3]), DataType::Bytes),
            (Value::Null, DataType::String),
        ];
        for (value, dt) in cases {
            let json = value.to_json();
            assert_eq!(Value::from_json(&json, dt).unwrap(), value);
        }
    }

    #[test]
    fn test_key_form_collapses_int_widths() {
        assert_eq!(Value::Int32(9).key_form(), Value::Int64(9).key_form());
    }

    #[test]
    fn test_is_absent() {
        assert!(Value::Null.is_absent());
        assert!(Value::String(String::new()).is_absent());
        assert!(!Value::String("x".into()).is_absent());
        assert!(!Value::Int32(0).is_absent());
    }
}

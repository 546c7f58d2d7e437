//! Driver-agnostic cell values and rows.
//!
//! Both connectors decode into [`SqlValue`], so a faithfully replicated row
//! produces the same checksum encoding on SQL Server and PostgreSQL.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single cell value as seen by the reconciliation engine.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(Uuid),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Checksum encoding of a single value. SQL NULL is the literal `NULL`,
    /// distinguishing it from an empty string.
    pub fn encode(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            // Normalized so 9.90 and 9.9 encode identically across drivers.
            SqlValue::Decimal(d) => d.normalize().to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => hex::encode(b),
            SqlValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            SqlValue::TimestampTz(ts) => {
                ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
            }
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Uuid(u) => u.to_string(),
        }
    }

    /// Numeric view used by the tolerance comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Column comparison with null awareness, float tolerance, and
    /// whitespace-tolerant (case-sensitive) string matching.
    pub fn loosely_equals(&self, other: &SqlValue, float_tolerance: f64) -> bool {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => true,
            (SqlValue::Null, _) | (_, SqlValue::Null) => false,
            (SqlValue::Text(a), SqlValue::Text(b)) => a.trim() == b.trim(),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() < float_tolerance,
                _ => self == other,
            },
        }
    }

    /// JSON rendering for discrepancy records and reports.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Bool(b) => serde_json::Value::Bool(*b),
            SqlValue::Int(i) => serde_json::Value::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            other => serde_json::Value::String(other.encode()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Bool(_) => 1,
            SqlValue::Int(_) => 2,
            SqlValue::Float(_) => 3,
            SqlValue::Decimal(_) => 4,
            SqlValue::Text(_) => 5,
            SqlValue::Bytes(_) => 6,
            SqlValue::Timestamp(_) => 7,
            SqlValue::TimestampTz(_) => 8,
            SqlValue::Date(_) => 9,
            SqlValue::Uuid(_) => 10,
        }
    }
}

// Strict equality is what primary-key set algebra uses. Floats compare by
// bit pattern here; tolerant comparison goes through `loosely_equals`.
impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => true,
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a == b,
            (SqlValue::Int(a), SqlValue::Int(b)) => a == b,
            (SqlValue::Float(a), SqlValue::Float(b)) => a.to_bits() == b.to_bits(),
            (SqlValue::Decimal(a), SqlValue::Decimal(b)) => a == b,
            (SqlValue::Text(a), SqlValue::Text(b)) => a == b,
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a == b,
            (SqlValue::Timestamp(a), SqlValue::Timestamp(b)) => a == b,
            (SqlValue::TimestampTz(a), SqlValue::TimestampTz(b)) => a == b,
            (SqlValue::Date(a), SqlValue::Date(b)) => a == b,
            (SqlValue::Uuid(a), SqlValue::Uuid(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Bool(b) => b.hash(state),
            SqlValue::Int(i) => i.hash(state),
            SqlValue::Float(f) => f.to_bits().hash(state),
            SqlValue::Decimal(d) => d.hash(state),
            SqlValue::Text(s) => s.hash(state),
            SqlValue::Bytes(b) => b.hash(state),
            SqlValue::Timestamp(ts) => ts.hash(state),
            SqlValue::TimestampTz(ts) => ts.hash(state),
            SqlValue::Date(d) => d.hash(state),
            SqlValue::Uuid(u) => u.hash(state),
        }
    }
}

// Total ordering so discrepancy emission is deterministic run to run.
impl Ord for SqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a.cmp(b),
            (SqlValue::Int(a), SqlValue::Int(b)) => a.cmp(b),
            (SqlValue::Float(a), SqlValue::Float(b)) => a.total_cmp(b),
            (SqlValue::Decimal(a), SqlValue::Decimal(b)) => a.cmp(b),
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a.cmp(b),
            (SqlValue::Timestamp(a), SqlValue::Timestamp(b)) => a.cmp(b),
            (SqlValue::TimestampTz(a), SqlValue::TimestampTz(b)) => a.cmp(b),
            (SqlValue::Date(a), SqlValue::Date(b)) => a.cmp(b),
            (SqlValue::Uuid(a), SqlValue::Uuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl serde::Serialize for SqlValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One decoded result row: shared column names plus positional values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| &self.values[i])
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Checksum encoding of the whole row: `v1|v2|...|vN`.
    pub fn encode(&self) -> String {
        self.values
            .iter()
            .map(SqlValue::encode)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// JSON object rendering preserving column order.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.clone(), v.to_json()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn row(columns: &[&str], values: Vec<SqlValue>) -> SqlRow {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        SqlRow::new(columns, values)
    }

    #[test]
    fn test_null_encoding_distinct_from_empty_string() {
        assert_eq!(SqlValue::Null.encode(), "NULL");
        assert_eq!(SqlValue::Text(String::new()).encode(), "");
    }

    #[test]
    fn test_row_encoding() {
        let r = row(
            &["id", "name", "score"],
            vec![
                SqlValue::Int(7),
                SqlValue::Null,
                SqlValue::Decimal(Decimal::new(990, 2)),
            ],
        );
        assert_eq!(r.encode(), "7|NULL|9.9");
    }

    #[test]
    fn test_decimal_normalization() {
        assert_eq!(SqlValue::Decimal(Decimal::new(9900, 3)).encode(), "9.9");
        assert_eq!(SqlValue::Decimal(Decimal::new(100, 2)).encode(), "1");
    }

    #[test]
    fn test_loose_equality_nulls() {
        assert!(SqlValue::Null.loosely_equals(&SqlValue::Null, 1e-9));
        assert!(!SqlValue::Null.loosely_equals(&SqlValue::Int(0), 1e-9));
    }

    #[test]
    fn test_loose_equality_float_tolerance() {
        let a = SqlValue::Float(1.0);
        let b = SqlValue::Float(1.0 + 1e-12);
        assert!(a.loosely_equals(&b, 1e-9));
        assert!(!a.loosely_equals(&SqlValue::Float(1.1), 1e-9));
        // Cross-type numeric comparison: bigint vs numeric.
        assert!(SqlValue::Int(5).loosely_equals(&SqlValue::Decimal(Decimal::from(5)), 1e-9));
    }

    #[test]
    fn test_loose_equality_string_trim() {
        let a = SqlValue::Text("john ".to_string());
        let b = SqlValue::Text(" john".to_string());
        assert!(a.loosely_equals(&b, 1e-9));
        assert!(!a.loosely_equals(&SqlValue::Text("John".to_string()), 1e-9));
    }

    #[test]
    fn test_pk_tuples_hashable() {
        let mut set = HashSet::new();
        set.insert(vec![SqlValue::Int(1), SqlValue::Text("a".into())]);
        set.insert(vec![SqlValue::Int(1), SqlValue::Text("a".into())]);
        set.insert(vec![SqlValue::Int(2), SqlValue::Text("a".into())]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_sort_is_deterministic() {
        let mut keys = vec![
            vec![SqlValue::Int(3)],
            vec![SqlValue::Int(1)],
            vec![SqlValue::Int(2)],
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                vec![SqlValue::Int(1)],
                vec![SqlValue::Int(2)],
                vec![SqlValue::Int(3)],
            ]
        );
    }

    #[test]
    fn test_get_by_column_name() {
        let r = row(&["id", "name"], vec![SqlValue::Int(1), SqlValue::Text("x".into())]);
        assert_eq!(r.get("name"), Some(&SqlValue::Text("x".into())));
        assert_eq!(r.get("missing"), None);
    }
}

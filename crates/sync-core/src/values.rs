//! Engine-agnostic row and value representations.
//!
//! Source connectors convert their native rows into [`Row`]s and target
//! connectors convert them back. Nothing driver-specific crosses this
//! boundary.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,

    /// Boolean value
    Bool(bool),

    /// Any signed integer up to 64 bits
    Int(i64),

    /// Any floating point value
    Float(f64),

    /// Exact numeric kept in its textual form to preserve precision.
    ///
    /// Also used for unsigned 64-bit integers that do not fit into `i64`.
    Decimal(String),

    /// Character data
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Calendar date
    Date(NaiveDate),

    /// Time of day
    Time(NaiveTime),

    /// Timestamp without time zone
    Timestamp(NaiveDateTime),

    /// Timestamp with time zone, normalized to UTC
    TimestampTz(DateTime<Utc>),

    /// UUID value
    Uuid(Uuid),

    /// JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::TimestampTz(_) => "timestamptz",
            Self::Uuid(_) => "uuid",
            Self::Json(_) => "json",
        }
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Decimal(s) | Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a UTC timestamp.
    ///
    /// Naive timestamps and dates are interpreted as UTC.
    pub fn as_utc_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::TimestampTz(ts) => Some(*ts),
            Self::Timestamp(ts) => Some(ts.and_utc()),
            Self::Date(d) => d.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc()),
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|ts| ts.with_timezone(&Utc))
                .ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Decimal(s) | Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => {
                f.write_str("\\x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::TimestampTz(ts) => write!(f, "{}", ts.to_rfc3339()),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::TimestampTz(ts)
    }
}

/// An ordered set of column values plus their column names.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs. Mostly useful in tests.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<Value>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self::new(columns.into(), values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Shared handle to the column names.
    pub fn column_names(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_row_lookup_by_column() {
        let row = Row::from_pairs([("id", Value::Int(7)), ("name", Value::from("ada"))]);
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("name"), Some(&Value::Text("ada".to_string())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.columns(), &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_rows_share_column_names() {
        let first = Row::from_pairs([("id", Value::Int(1))]);
        let second = Row::new(first.column_names(), vec![Value::Int(2)]);
        assert!(Arc::ptr_eq(&first.column_names(), &second.column_names()));
    }

    #[test]
    fn test_naive_timestamp_is_read_as_utc() {
        let naive = NaiveDate::from_ymd_opt(2025, 4, 28)
            .unwrap()
            .and_hms_micro_opt(10, 30, 0, 250)
            .unwrap();
        let expected = Utc.from_utc_datetime(&naive);
        assert_eq!(Value::Timestamp(naive).as_utc_timestamp(), Some(expected));
        assert_eq!(Value::TimestampTz(expected).as_utc_timestamp(), Some(expected));
        assert_eq!(Value::Int(1).as_utc_timestamp(), None);
    }

    #[test]
    fn test_decimal_text_parses_as_integer() {
        assert_eq!(Value::Decimal("105".into()).as_i64(), Some(105));
        assert_eq!(Value::Decimal("1.5".into()).as_i64(), None);
        assert_eq!(Value::Float(1.0).as_i64(), None);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(Value::Date(date).to_string(), "2024-01-02");
    }
}

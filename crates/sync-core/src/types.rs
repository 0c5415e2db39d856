//! Table declarations and watermark values.

use crate::values::Value;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a textual enum value is not recognized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {what}: '{value}' (expected one of: {expected})")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// How a table is declared to be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Always extract everything and replace the target table.
    Full,
    /// Extract rows newer than the stored watermark and append them.
    Incremental,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Full => "full",
            LoadMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LoadMode::Full),
            "incremental" => Ok(LoadMode::Incremental),
            _ => Err(ParseEnumError {
                what: "load mode",
                value: s.to_string(),
                expected: "full, incremental",
            }),
        }
    }
}

/// Kind of values held by a watermark column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkType {
    /// Monotonic integer such as an auto-increment primary key.
    IntegerSequence,
    /// Timestamp column such as `updated_at`.
    Timestamp,
}

impl WatermarkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkType::IntegerSequence => "integer_sequence",
            WatermarkType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for WatermarkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatermarkType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "integer_sequence" | "integer" | "sequence" | "int" => {
                Ok(WatermarkType::IntegerSequence)
            }
            "timestamp" | "datetime" => Ok(WatermarkType::Timestamp),
            _ => Err(ParseEnumError {
                what: "watermark type",
                value: s.to_string(),
                expected: "integer_sequence, timestamp",
            }),
        }
    }
}

/// Immutable per-table declaration, created once when the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Physical table name, identical in source and target. May be
    /// schema-qualified (`schema.table`).
    pub name: String,
    pub load_mode: LoadMode,
    /// Required for incremental tables.
    pub watermark_column: Option<String>,
    /// Required for incremental tables.
    pub watermark_type: Option<WatermarkType>,
    /// Disabled tables are skipped entirely.
    pub enabled: bool,
    /// Tie-break key for deterministic ordering. Empty means the source
    /// connector falls back to the table's primary key.
    #[serde(default)]
    pub key_columns: Vec<String>,
}

impl TableConfig {
    /// A full-refresh table without watermark tracking.
    pub fn full(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            load_mode: LoadMode::Full,
            watermark_column: None,
            watermark_type: None,
            enabled: true,
            key_columns: Vec::new(),
        }
    }

    /// An incremental table tracked by `column`.
    pub fn incremental(
        name: impl Into<String>,
        column: impl Into<String>,
        watermark_type: WatermarkType,
    ) -> Self {
        Self {
            name: name.into(),
            load_mode: LoadMode::Incremental,
            watermark_column: Some(column.into()),
            watermark_type: Some(watermark_type),
            enabled: true,
            key_columns: Vec::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Watermark column and type, when both are declared.
    pub fn watermark(&self) -> Option<(&str, WatermarkType)> {
        match (&self.watermark_column, self.watermark_type) {
            (Some(column), Some(ty)) => Some((column.as_str(), ty)),
            _ => None,
        }
    }
}

/// A table name split into its optional schema and the bare name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    /// Parse `table` or `schema.table`.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, name)) => Self {
                schema: Some(schema.to_string()),
                name: name.to_string(),
            },
            None => Self {
                schema: None,
                name: s.to_string(),
            },
        }
    }

    /// Same schema, name with `suffix` appended. Used for staging tables.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            schema: self.schema.clone(),
            name: format!("{}{suffix}", self.name),
        }
    }

    /// Render with a dialect-specific identifier quoting function.
    pub fn quoted(&self, quote: impl Fn(&str) -> String) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Error converting a column value or stored text into a [`Watermark`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot read {found} as a {expected} watermark")]
pub struct WatermarkValueError {
    pub expected: WatermarkType,
    pub found: String,
}

/// The highest watermark-column value known to be copied.
///
/// Values of different kinds are not comparable; `partial_cmp` returns `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Watermark {
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl PartialOrd for Watermark {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Watermark::Integer(a), Watermark::Integer(b)) => Some(a.cmp(b)),
            (Watermark::Timestamp(a), Watermark::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Watermark {
    pub fn watermark_type(&self) -> WatermarkType {
        match self {
            Watermark::Integer(_) => WatermarkType::IntegerSequence,
            Watermark::Timestamp(_) => WatermarkType::Timestamp,
        }
    }

    /// Read a column value as a watermark of the given type.
    ///
    /// Returns `Ok(None)` for NULL. Timestamps are truncated to microseconds,
    /// the finest precision either supported engine stores.
    pub fn from_value(value: &Value, ty: WatermarkType) -> Result<Option<Self>, WatermarkValueError> {
        if value.is_null() {
            return Ok(None);
        }
        let converted = match ty {
            WatermarkType::IntegerSequence => value.as_i64().map(Watermark::Integer),
            WatermarkType::Timestamp => value
                .as_utc_timestamp()
                .map(|ts| Watermark::Timestamp(ts.trunc_subsecs(6))),
        };
        converted.map(Some).ok_or_else(|| WatermarkValueError {
            expected: ty,
            found: format!("{} value '{value}'", value.kind()),
        })
    }

    /// The value bound as the `column > value` filter parameter.
    pub fn to_value(&self) -> Value {
        match self {
            Watermark::Integer(i) => Value::Int(*i),
            Watermark::Timestamp(ts) => Value::TimestampTz(*ts),
        }
    }

    /// Canonical text encoding, stable across stores.
    pub fn encode(&self) -> String {
        match self {
            Watermark::Integer(i) => i.to_string(),
            Watermark::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    /// Parse the canonical text encoding.
    pub fn decode(ty: WatermarkType, s: &str) -> Result<Self, WatermarkValueError> {
        let parsed = match ty {
            WatermarkType::IntegerSequence => s.trim().parse().ok().map(Watermark::Integer),
            WatermarkType::Timestamp => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|ts| Watermark::Timestamp(ts.with_timezone(&Utc))),
        };
        parsed.ok_or_else(|| WatermarkValueError {
            expected: ty,
            found: format!("'{s}'"),
        })
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_load_mode_parsing() {
        assert_eq!("FULL".parse::<LoadMode>().unwrap(), LoadMode::Full);
        assert_eq!(" incremental ".parse::<LoadMode>().unwrap(), LoadMode::Incremental);
        let err = "delta".parse::<LoadMode>().unwrap_err();
        assert!(err.to_string().contains("invalid load mode"));
    }

    #[test]
    fn test_watermark_type_aliases() {
        for s in ["integer_sequence", "INTEGER", "sequence"] {
            assert_eq!(s.parse::<WatermarkType>().unwrap(), WatermarkType::IntegerSequence);
        }
        assert_eq!("TIMESTAMP".parse::<WatermarkType>().unwrap(), WatermarkType::Timestamp);
        assert!("uuid".parse::<WatermarkType>().is_err());
    }

    #[test]
    fn test_watermarks_of_different_kinds_do_not_compare() {
        let int = Watermark::Integer(5);
        let ts = Watermark::Timestamp(Utc.timestamp_opt(5, 0).unwrap());
        assert_eq!(int.partial_cmp(&ts), None);
        assert!(Watermark::Integer(5) > Watermark::Integer(4));
    }

    #[test]
    fn test_watermark_from_row_values() {
        let ty = WatermarkType::IntegerSequence;
        assert_eq!(
            Watermark::from_value(&Value::Int(100), ty).unwrap(),
            Some(Watermark::Integer(100))
        );
        assert_eq!(Watermark::from_value(&Value::Null, ty).unwrap(), None);
        assert!(Watermark::from_value(&Value::Text("abc".into()), ty).is_err());

        let naive = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_nano_opt(0, 0, 1, 123_456_789)
            .unwrap();
        let wm = Watermark::from_value(&Value::Timestamp(naive), WatermarkType::Timestamp)
            .unwrap()
            .unwrap();
        assert_eq!(wm.encode(), "2025-01-01T00:00:01.123456Z");
    }

    #[test]
    fn test_watermark_text_encoding() {
        let ts = Watermark::Timestamp(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap());
        let encoded = ts.encode();
        assert_eq!(encoded, "2024-05-06T07:08:09.000000Z");
        assert_eq!(Watermark::decode(WatermarkType::Timestamp, &encoded).unwrap(), ts);
        assert_eq!(
            Watermark::decode(WatermarkType::IntegerSequence, "105").unwrap(),
            Watermark::Integer(105)
        );
        assert!(Watermark::decode(WatermarkType::IntegerSequence, "x").is_err());
    }

    #[test]
    fn test_table_name_quoting() {
        let plain = TableName::parse("orders");
        assert_eq!(plain.quoted(|s| format!("`{s}`")), "`orders`");

        let qualified = TableName::parse("sales.orders");
        assert_eq!(qualified.quoted(|s| format!("\"{s}\"")), "\"sales\".\"orders\"");
        assert_eq!(qualified.with_suffix("_staging").to_string(), "sales.orders_staging");
    }
}

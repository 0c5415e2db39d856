//! Conversion between MySQL protocol values and [`sync_core::Value`].

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::ColumnType;
use mysql_async::Value as MySqlValue;
use sync_core::Value;

/// Character set id MySQL reports for binary strings.
pub const BINARY_CHARSET: u16 = 63;

/// Convert one column of a binary-protocol row.
///
/// `column_type` and `charset` come from the result set metadata and decide
/// how byte strings are read (decimal, JSON, text or binary).
pub fn from_mysql(value: MySqlValue, column_type: ColumnType, charset: u16) -> Result<Value, String> {
    use ColumnType::*;

    match value {
        MySqlValue::NULL => Ok(Value::Null),
        MySqlValue::Int(i) => Ok(Value::Int(i)),
        MySqlValue::UInt(u) => Ok(match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Decimal(u.to_string()),
        }),
        MySqlValue::Float(f) => Ok(Value::Float(f64::from(f))),
        MySqlValue::Double(d) => Ok(Value::Float(d)),
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                .ok_or_else(|| format!("invalid date {year:04}-{month:02}-{day:02}"))?;
            if column_type == MYSQL_TYPE_DATE {
                return Ok(Value::Date(date));
            }
            let time = NaiveTime::from_hms_micro_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                micros,
            )
            .ok_or_else(|| format!("invalid time {hour:02}:{minute:02}:{second:02}"))?;
            Ok(Value::Timestamp(NaiveDateTime::new(date, time)))
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            // TIME columns hold durations up to 838 hours; only values that
            // fit a time of day become Value::Time.
            if !negative && days == 0 {
                if let Some(time) = NaiveTime::from_hms_micro_opt(
                    u32::from(hours),
                    u32::from(minutes),
                    u32::from(seconds),
                    micros,
                ) {
                    return Ok(Value::Time(time));
                }
            }
            let sign = if negative { "-" } else { "" };
            let total_hours = u64::from(days) * 24 + u64::from(hours);
            Ok(Value::Text(format!(
                "{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            )))
        }
        MySqlValue::Bytes(bytes) => match column_type {
            MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => Ok(Value::Decimal(utf8(bytes)?)),
            MYSQL_TYPE_JSON => {
                let text = utf8(bytes)?;
                serde_json::from_str(&text)
                    .map(Value::Json)
                    .map_err(|e| format!("invalid JSON value: {e}"))
            }
            MYSQL_TYPE_BIT | MYSQL_TYPE_GEOMETRY => Ok(Value::Bytes(bytes)),
            MYSQL_TYPE_TINY_BLOB
            | MYSQL_TYPE_MEDIUM_BLOB
            | MYSQL_TYPE_LONG_BLOB
            | MYSQL_TYPE_BLOB
            | MYSQL_TYPE_STRING
            | MYSQL_TYPE_VAR_STRING
            | MYSQL_TYPE_VARCHAR
                if charset == BINARY_CHARSET =>
            {
                Ok(Value::Bytes(bytes))
            }
            _ => match String::from_utf8(bytes) {
                Ok(s) => Ok(Value::Text(s)),
                Err(e) => Ok(Value::Bytes(e.into_bytes())),
            },
        },
    }
}

fn utf8(bytes: Vec<u8>) -> Result<String, String> {
    String::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {e}"))
}

/// Convert a value into a MySQL statement parameter.
///
/// Timestamps with a time zone are sent as UTC wall-clock time; connections
/// opened by this crate run with `time_zone = '+00:00'`.
pub fn to_mysql(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
        Value::Int(i) => MySqlValue::Int(*i),
        Value::Float(f) => MySqlValue::Double(*f),
        Value::Decimal(s) | Value::Text(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
        Value::Date(d) => MySqlValue::Date(
            clamp_year(d.year()),
            d.month() as u8,
            d.day() as u8,
            0,
            0,
            0,
            0,
        ),
        Value::Time(t) => MySqlValue::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::Timestamp(ts) => datetime(ts),
        Value::TimestampTz(ts) => datetime(&ts.naive_utc()),
        Value::Uuid(u) => MySqlValue::Bytes(u.to_string().into_bytes()),
        Value::Json(j) => MySqlValue::Bytes(j.to_string().into_bytes()),
    }
}

fn datetime(ts: &NaiveDateTime) -> MySqlValue {
    MySqlValue::Date(
        clamp_year(ts.year()),
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.nanosecond() / 1_000,
    )
}

fn clamp_year(year: i32) -> u16 {
    year.clamp(0, 9999) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const UTF8MB4: u16 = 255;

    #[test]
    fn test_integers() {
        let v = from_mysql(MySqlValue::Int(-7), ColumnType::MYSQL_TYPE_LONG, UTF8MB4);
        assert_eq!(v.unwrap(), Value::Int(-7));

        let big = from_mysql(
            MySqlValue::UInt(u64::MAX),
            ColumnType::MYSQL_TYPE_LONGLONG,
            UTF8MB4,
        );
        assert_eq!(big.unwrap(), Value::Decimal(u64::MAX.to_string()));
    }

    #[test]
    fn test_bytes_follow_column_type() {
        let decimal = from_mysql(
            MySqlValue::Bytes(b"12.50".to_vec()),
            ColumnType::MYSQL_TYPE_NEWDECIMAL,
            UTF8MB4,
        );
        assert_eq!(decimal.unwrap(), Value::Decimal("12.50".into()));

        let json = from_mysql(
            MySqlValue::Bytes(br#"{"a":1}"#.to_vec()),
            ColumnType::MYSQL_TYPE_JSON,
            BINARY_CHARSET,
        );
        assert_eq!(json.unwrap(), Value::Json(serde_json::json!({"a": 1})));

        let text = from_mysql(
            MySqlValue::Bytes(b"hello".to_vec()),
            ColumnType::MYSQL_TYPE_VAR_STRING,
            UTF8MB4,
        );
        assert_eq!(text.unwrap(), Value::Text("hello".into()));

        let blob = from_mysql(
            MySqlValue::Bytes(vec![0xff, 0x00]),
            ColumnType::MYSQL_TYPE_BLOB,
            BINARY_CHARSET,
        );
        assert_eq!(blob.unwrap(), Value::Bytes(vec![0xff, 0x00]));
    }

    #[test]
    fn test_date_and_datetime() {
        let date = from_mysql(
            MySqlValue::Date(2024, 2, 29, 0, 0, 0, 0),
            ColumnType::MYSQL_TYPE_DATE,
            UTF8MB4,
        );
        assert_eq!(
            date.unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );

        let ts = from_mysql(
            MySqlValue::Date(2025, 1, 1, 12, 30, 5, 250_000),
            ColumnType::MYSQL_TYPE_TIMESTAMP,
            UTF8MB4,
        )
        .unwrap();
        let expected = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_micro_opt(12, 30, 5, 250_000)
            .unwrap();
        assert_eq!(ts, Value::Timestamp(expected));
    }

    #[test]
    fn test_long_durations_become_text() {
        let v = from_mysql(
            MySqlValue::Time(true, 1, 2, 3, 4, 0),
            ColumnType::MYSQL_TYPE_TIME,
            UTF8MB4,
        );
        assert_eq!(v.unwrap(), Value::Text("-26:03:04.000000".into()));
    }

    #[test]
    fn test_parameters() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(
            to_mysql(&Value::TimestampTz(ts)),
            MySqlValue::Date(2025, 6, 1, 8, 0, 0, 0)
        );
        assert_eq!(to_mysql(&Value::Bool(true)), MySqlValue::Int(1));
        assert_eq!(to_mysql(&Value::Null), MySqlValue::NULL);
        assert_eq!(
            to_mysql(&Value::Decimal("9.99".into())),
            MySqlValue::Bytes(b"9.99".to_vec())
        );
    }
}

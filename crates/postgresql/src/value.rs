//! Conversion between PostgreSQL values and [`sync_core::Value`].
//!
//! PostgreSQL checks parameter types strictly, so outgoing values are coerced
//! to the type the server inferred for each placeholder rather than to the
//! type of the [`Value`] variant.

use std::error::Error;
use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sync_core::Value;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Row;

/// Boxed statement parameter.
pub type Param = Box<dyn ToSql + Sync + Send>;

/// A NULL accepted for a parameter of any type.
#[derive(Debug, Clone, Copy)]
pub struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Read column `index` of `row`.
pub fn from_pg(row: &Row, index: usize) -> Result<Value, String> {
    let column = &row.columns()[index];
    let pg_type = column.type_();

    fn get<'a, T>(row: &'a Row, index: usize, wrap: impl FnOnce(T) -> Value) -> Result<Value, String>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        match row.try_get::<_, Option<T>>(index) {
            Ok(Some(v)) => Ok(wrap(v)),
            Ok(None) => Ok(Value::Null),
            Err(e) => Err(e.to_string()),
        }
    }

    match *pg_type {
        Type::BOOL => get::<bool>(row, index, Value::Bool),
        Type::INT2 => get::<i16>(row, index, |i| Value::Int(i64::from(i))),
        Type::INT4 => get::<i32>(row, index, |i| Value::Int(i64::from(i))),
        Type::INT8 => get::<i64>(row, index, Value::Int),
        Type::OID => get::<u32>(row, index, |i| Value::Int(i64::from(i))),
        Type::FLOAT4 => get::<f32>(row, index, |f| Value::Float(f64::from(f))),
        Type::FLOAT8 => get::<f64>(row, index, Value::Float),
        Type::NUMERIC => get::<Decimal>(row, index, |d| Value::Decimal(d.to_string())),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, index, Value::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, index, Value::Bytes),
        Type::DATE => get::<NaiveDate>(row, index, Value::Date),
        Type::TIME => get::<NaiveTime>(row, index, Value::Time),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, index, Value::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, index, Value::TimestampTz),
        Type::UUID => get::<uuid::Uuid>(row, index, Value::Uuid),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, index, Value::Json),
        _ => match row.try_get::<_, Option<String>>(index) {
            Ok(Some(s)) => Ok(Value::Text(s)),
            Ok(None) => Ok(Value::Null),
            Err(_) => Err(format!(
                "unsupported PostgreSQL type {} in column '{}'",
                pg_type,
                column.name()
            )),
        },
    }
}

/// Coerce `value` into a parameter of type `ty`.
pub fn to_sql_param(value: &Value, ty: &Type) -> Result<Param, String> {
    if value.is_null() {
        return Ok(Box::new(SqlNull));
    }

    let mismatch = || format!("cannot bind {} value '{}' as {}", value.kind(), value, ty);

    let param: Param = match *ty {
        Type::BOOL => Box::new(match value {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Text(s) => parse_bool(s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        }),
        Type::INT2 => Box::new(i16::try_from(integer(value).ok_or_else(mismatch)?).map_err(|_| mismatch())?),
        Type::INT4 => Box::new(i32::try_from(integer(value).ok_or_else(mismatch)?).map_err(|_| mismatch())?),
        Type::INT8 => Box::new(integer(value).ok_or_else(mismatch)?),
        Type::FLOAT4 => Box::new(float(value).ok_or_else(mismatch)? as f32),
        Type::FLOAT8 => Box::new(float(value).ok_or_else(mismatch)?),
        Type::NUMERIC => Box::new(match value {
            Value::Int(i) => Decimal::from(*i),
            Value::Float(f) => Decimal::try_from(*f).map_err(|_| mismatch())?,
            Value::Decimal(s) | Value::Text(s) => Decimal::from_str(s.trim())
                .or_else(|_| Decimal::from_scientific(s.trim()))
                .map_err(|_| mismatch())?,
            Value::Bool(b) => Decimal::from(u8::from(*b)),
            _ => return Err(mismatch()),
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Box::new(value.to_string()),
        Type::BYTEA => Box::new(match value {
            Value::Bytes(b) => b.clone(),
            Value::Text(s) => s.clone().into_bytes(),
            _ => return Err(mismatch()),
        }),
        Type::DATE => Box::new(match value {
            Value::Date(d) => *d,
            Value::Timestamp(ts) => ts.date(),
            Value::TimestampTz(ts) => ts.date_naive(),
            Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| mismatch())?,
            _ => return Err(mismatch()),
        }),
        Type::TIME => Box::new(match value {
            Value::Time(t) => *t,
            Value::Text(s) => NaiveTime::from_str(s).map_err(|_| mismatch())?,
            _ => return Err(mismatch()),
        }),
        Type::TIMESTAMP => Box::new(match value {
            Value::Timestamp(ts) => *ts,
            Value::TimestampTz(ts) => ts.naive_utc(),
            Value::Date(d) => d.and_time(NaiveTime::MIN),
            Value::Text(s) => parse_naive_timestamp(s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        }),
        Type::TIMESTAMPTZ => Box::new(value.as_utc_timestamp().ok_or_else(mismatch)?),
        Type::UUID => Box::new(match value {
            Value::Uuid(u) => *u,
            Value::Text(s) => uuid::Uuid::parse_str(s).map_err(|_| mismatch())?,
            Value::Bytes(b) => uuid::Uuid::from_slice(b).map_err(|_| mismatch())?,
            _ => return Err(mismatch()),
        }),
        Type::JSON | Type::JSONB => Box::new(match value {
            Value::Json(j) => j.clone(),
            Value::Text(s) => serde_json::from_str(s)
                .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            other => serde_json::Value::String(other.to_string()),
        }),
        _ => return Err(format!("unsupported parameter type {ty}")),
    };
    Ok(param)
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        other => other.as_i64(),
    }
}

fn float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Decimal(s) | Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" | "y" => Some(true),
        "f" | "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_naive_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encodes(value: &Value, ty: &Type) -> bool {
        let param = to_sql_param(value, ty).unwrap();
        let mut buf = BytesMut::new();
        param.to_sql_checked(ty, &mut buf).is_ok()
    }

    #[test]
    fn test_null_binds_to_any_type() {
        for ty in [Type::INT4, Type::TEXT, Type::TIMESTAMPTZ, Type::JSONB, Type::UUID] {
            let param = to_sql_param(&Value::Null, &ty).unwrap();
            let mut buf = BytesMut::new();
            assert!(matches!(param.to_sql_checked(&ty, &mut buf), Ok(IsNull::Yes)));
        }
    }

    #[test]
    fn test_integers_narrow_to_column_width() {
        assert!(encodes(&Value::Int(42), &Type::INT4));
        assert!(encodes(&Value::Int(42), &Type::INT2));
        assert!(encodes(&Value::Decimal("7".into()), &Type::INT8));

        let err = to_sql_param(&Value::Int(i64::from(i32::MAX) + 1), &Type::INT4)
            .err()
            .unwrap();
        assert!(err.contains("cannot bind int value"));
    }

    #[test]
    fn test_watermark_filter_values() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(encodes(&Value::TimestampTz(ts), &Type::TIMESTAMPTZ));
        assert!(encodes(&Value::TimestampTz(ts), &Type::TIMESTAMP));
        assert!(encodes(&Value::Int(100), &Type::INT8));
    }

    #[test]
    fn test_decimal_and_text() {
        assert!(encodes(&Value::Decimal("12.3400".into()), &Type::NUMERIC));
        assert!(encodes(&Value::Decimal("1e3".into()), &Type::NUMERIC));
        assert!(encodes(&Value::Int(5), &Type::TEXT));
        assert!(to_sql_param(&Value::Text("abc".into()), &Type::NUMERIC).is_err());
    }

    #[test]
    fn test_json_accepts_text_documents() {
        assert!(encodes(&Value::Text(r#"{"a": [1, 2]}"#.into()), &Type::JSONB));
        assert!(encodes(&Value::Json(serde_json::json!({"k": "v"})), &Type::JSON));
    }

    #[test]
    fn test_text_timestamps() {
        let parsed = parse_naive_timestamp("2024-03-01 10:00:00.5").unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_milli_opt(10, 0, 0, 500)
                .unwrap()
        );
        assert!(parse_naive_timestamp("yesterday").is_none());
    }
}

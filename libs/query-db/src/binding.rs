//! Statement parameters and their conversion into bindable values.
//!
//! A parameter carries a [`Value`] and, optionally, the column type it is
//! bound against. The declared type selects the conversion rule; without one
//! the value's own variant decides.

use std::fmt;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use query_core::datetime::{parse_date, parse_datetime, parse_time};
use query_core::Value;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SqlError, SqlResult};

/// Character count above which CLOB text is sent as large text.
pub const CLOB_STREAM_THRESHOLD: usize = 4000;

/// Declared column type of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Varchar,
    NVarchar,
    LongVarchar,
    Clob,
    NClob,
    Decimal,
    Numeric,
    Boolean,
    Date,
    Time,
    Timestamp,
    Integer,
    BigInt,
    Double,
    /// Unknown to the binder; the value decides.
    Other,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(type_name(*self))
    }
}

/// A parameter value with an optional declared type.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamValue {
    pub value: Value,
    pub sql_type: Option<SqlType>,
}

impl ParamValue {
    pub fn typed(value: impl Into<Value>, sql_type: SqlType) -> Self {
        Self {
            value: value.into(),
            sql_type: Some(sql_type),
        }
    }

    fn declared(&self) -> &'static str {
        match self.sql_type {
            Some(SqlType::Other) | None => "inferred",
            Some(t) => type_name(t),
        }
    }
}

fn type_name(t: SqlType) -> &'static str {
    match t {
        SqlType::Varchar => "varchar",
        SqlType::NVarchar => "nvarchar",
        SqlType::LongVarchar => "longvarchar",
        SqlType::Clob => "clob",
        SqlType::NClob => "nclob",
        SqlType::Decimal => "decimal",
        SqlType::Numeric => "numeric",
        SqlType::Boolean => "boolean",
        SqlType::Date => "date",
        SqlType::Time => "time",
        SqlType::Timestamp => "timestamp",
        SqlType::Integer => "integer",
        SqlType::BigInt => "bigint",
        SqlType::Double => "double",
        SqlType::Other => "other",
    }
}

impl<T: Into<Value>> From<T> for ParamValue {
    fn from(v: T) -> Self {
        Self {
            value: v.into(),
            sql_type: None,
        }
    }
}

/// Named parameters, also used as the model when rendering templates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SqlParams(IndexMap<String, ParamValue>);

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Build untyped parameters from a JSON object.
    pub fn from_json(obj: serde_json::Map<String, serde_json::Value>) -> Self {
        obj.into_iter()
            .map(|(k, v)| (k, ParamValue::from(Value::from(v))))
            .collect()
    }
}

impl FromIterator<(String, ParamValue)> for SqlParams {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A value ready to be handed to a driver.
#[derive(Clone, Debug, PartialEq)]
pub enum BindValue {
    /// Typed null; the declared type picks the driver-side null type.
    Null(Option<SqlType>),
    Bool(bool),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    /// CLOB content over [`CLOB_STREAM_THRESHOLD`] characters.
    LargeText(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
}

/// Decimals never round: a value needing more than 28 fractional digits fails.
fn exact_decimal(text: &str) -> Result<Decimal, String> {
    Decimal::from_str_exact(text).map_err(|_| format!("'{text}' is not an exact decimal"))
}

fn to_decimal(bd: &BigDecimal) -> Result<Decimal, String> {
    exact_decimal(&bd.normalized().to_string())
}

/// Convert one parameter into a driver value following its declared type.
pub fn bind_value(name: &str, param: &ParamValue) -> SqlResult<BindValue> {
    let fail = |reason: String| SqlError::binding(name, param.declared(), reason);
    let v = &param.value;

    if let Value::List(_) = v {
        return Err(fail(format!(
            "list values must be addressed by index (':{name}[0]')"
        )));
    }
    if v.is_null() {
        return Ok(BindValue::Null(param.sql_type));
    }
    let mismatch = || fail(format!("unsupported {} value", v.type_name()));

    let bound = match param.sql_type {
        Some(SqlType::Varchar | SqlType::NVarchar | SqlType::LongVarchar) => {
            BindValue::Text(v.to_string())
        }
        Some(SqlType::Clob | SqlType::NClob) => {
            let text = v.to_string();
            if text.chars().count() > CLOB_STREAM_THRESHOLD {
                BindValue::LargeText(text)
            } else {
                BindValue::Text(text)
            }
        }
        Some(SqlType::Decimal | SqlType::Numeric) => BindValue::Decimal(match v {
            Value::Decimal(d) => to_decimal(d).map_err(fail)?,
            Value::Int(i) => Decimal::from(*i),
            Value::Float(f) => Decimal::try_from(*f).map_err(|_| mismatch())?,
            Value::String(s) => exact_decimal(s.trim()).map_err(fail)?,
            _ => return Err(mismatch()),
        }),
        Some(SqlType::Boolean) => BindValue::Bool(match v {
            Value::Bool(b) => *b,
            Value::Int(0) => false,
            Value::Int(1) => true,
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        }),
        Some(SqlType::Date) => BindValue::Date(match v {
            Value::Date(d) => *d,
            Value::DateTime(dt) => dt.date(),
            Value::String(s) => parse_date(s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        }),
        Some(SqlType::Time) => BindValue::Time(match v {
            Value::Time(t) => *t,
            Value::DateTime(dt) => dt.time(),
            Value::String(s) => parse_time(s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        }),
        // Timestamps are bound timezone-naive.
        Some(SqlType::Timestamp) => BindValue::DateTime(match v {
            Value::DateTime(dt) => *dt,
            Value::DateTimeUtc(dt) => dt.naive_utc(),
            Value::Date(d) => d.and_time(NaiveTime::MIN),
            Value::String(s) => parse_datetime(s).ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        }),
        Some(SqlType::Integer | SqlType::BigInt) => BindValue::I64(match v {
            Value::Int(i) => *i,
            Value::Decimal(d) if d.is_integer() => d.to_i64().ok_or_else(mismatch)?,
            Value::String(s) => s.trim().parse().map_err(|_| mismatch())?,
            Value::Bool(b) => i64::from(*b),
            _ => return Err(mismatch()),
        }),
        Some(SqlType::Double) => BindValue::F64(match v {
            Value::Float(f) => *f,
            Value::Int(i) => *i as f64,
            Value::Decimal(d) => d.to_f64().ok_or_else(mismatch)?,
            Value::String(s) => s.trim().parse().map_err(|_| mismatch())?,
            _ => return Err(mismatch()),
        }),
        Some(SqlType::Other) | None => match v {
            Value::Decimal(d) => BindValue::Decimal(to_decimal(d).map_err(fail)?),
            _ => infer(v).ok_or_else(mismatch)?,
        },
    };
    Ok(bound)
}

fn infer(v: &Value) -> Option<BindValue> {
    Some(match v {
        Value::Null => BindValue::Null(None),
        Value::Bool(b) => BindValue::Bool(*b),
        Value::Int(i) => BindValue::I64(*i),
        Value::Float(f) => BindValue::F64(*f),
        Value::Decimal(d) => BindValue::Decimal(to_decimal(d).ok()?),
        Value::Char(c) => BindValue::Text(c.to_string()),
        Value::String(s) => BindValue::Text(s.clone()),
        Value::Uuid(u) => BindValue::Uuid(*u),
        Value::Date(d) => BindValue::Date(*d),
        Value::Time(t) => BindValue::Time(*t),
        Value::DateTime(dt) => BindValue::DateTime(*dt),
        Value::DateTimeUtc(dt) => BindValue::DateTimeUtc(*dt),
        Value::Json(j) => BindValue::Json(j.clone()),
        Value::List(_) => return None,
    })
}

/// Resolve `name` or `name[index]` against `params`.
pub fn lookup(
    params: &SqlParams,
    name: &str,
    index: Option<usize>,
) -> SqlResult<ParamValue> {
    let param = params.get(name).ok_or_else(|| {
        SqlError::binding(name, "inferred", "no value supplied for named parameter")
    })?;
    let Some(i) = index else {
        return Ok(param.clone());
    };
    match &param.value {
        Value::List(items) => items
            .get(i)
            .map(|item| ParamValue {
                value: item.clone(),
                sql_type: param.sql_type,
            })
            .ok_or_else(|| {
                SqlError::binding(
                    name,
                    param.declared(),
                    format!("index {i} out of bounds for {} elements", items.len()),
                )
            }),
        other => Err(SqlError::binding(
            name,
            param.declared(),
            format!("cannot index into a {} value", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn bind(v: impl Into<Value>, t: SqlType) -> SqlResult<BindValue> {
        bind_value("p", &ParamValue::typed(v, t))
    }

    #[test]
    fn decimals_keep_precision() {
        let bd = BigDecimal::from_str("12345678901234.5678").unwrap();
        assert_eq!(
            bind(bd, SqlType::Numeric).unwrap(),
            BindValue::Decimal(Decimal::from_str("12345678901234.5678").unwrap())
        );
        assert_eq!(
            bind("0.10", SqlType::Decimal).unwrap(),
            BindValue::Decimal(Decimal::from_str("0.10").unwrap())
        );
    }

    #[test]
    fn decimals_too_precise_are_rejected() {
        let text = "1.23456789012345678901234567890123";
        let err = bind(text, SqlType::Decimal).unwrap_err();
        assert!(matches!(err, SqlError::Binding { .. }));
        assert!(err.to_string().contains("'p'"));

        let bd = BigDecimal::from_str(text).unwrap();
        assert!(bind(bd.clone(), SqlType::Numeric).is_err());
        assert!(bind_value("p", &ParamValue::from(Value::Decimal(bd))).is_err());
    }

    #[test]
    fn timestamps_are_naive() {
        let utc = chrono::DateTime::parse_from_rfc3339("2024-03-01T10:00:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        let bound = bind_value("ts", &ParamValue::typed(Value::DateTimeUtc(utc), SqlType::Timestamp)).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(bound, BindValue::DateTime(expected));

        assert_eq!(
            bind("2024-03-01", SqlType::Timestamp).unwrap(),
            BindValue::DateTime(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_time(NaiveTime::MIN))
        );
    }

    #[test]
    fn long_clob_text_is_routed_as_large_text() {
        let short = "x".repeat(CLOB_STREAM_THRESHOLD);
        let long = "x".repeat(CLOB_STREAM_THRESHOLD + 1);
        assert!(matches!(bind(short.as_str(), SqlType::Clob).unwrap(), BindValue::Text(_)));
        assert!(matches!(bind(long.as_str(), SqlType::NClob).unwrap(), BindValue::LargeText(_)));
        assert!(matches!(bind(long.as_str(), SqlType::Varchar).unwrap(), BindValue::Text(_)));
    }

    #[test]
    fn nulls_keep_declared_type() {
        assert_eq!(
            bind(Value::Null, SqlType::Integer).unwrap(),
            BindValue::Null(Some(SqlType::Integer))
        );
        assert_eq!(
            bind_value("p", &ParamValue::from(Value::Null)).unwrap(),
            BindValue::Null(None)
        );
    }

    #[test]
    fn mismatches_name_param_and_type() {
        let err = bind("abc", SqlType::Integer).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'p'"), "{msg}");
        assert!(msg.contains("integer"), "{msg}");

        assert!(bind(true, SqlType::Date).is_err());
        assert!(bind(Value::List(vec![1.into()]), SqlType::Integer).is_err());
    }

    #[test]
    fn untyped_values_bind_by_variant() {
        let p = ParamValue::from(serde_json::json!({"a": 1}));
        assert_eq!(
            bind_value("p", &p).unwrap(),
            BindValue::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(bind_value("p", &ParamValue::from(7)).unwrap(), BindValue::I64(7));
    }

    #[test]
    fn indexed_lookup_reads_list_elements() {
        let params = SqlParams::new().with("ids", vec![10i64, 20, 30]).with("name", "x");
        assert_eq!(lookup(&params, "ids", Some(1)).unwrap().value, Value::Int(20));
        assert!(lookup(&params, "ids", Some(3)).is_err());
        assert!(lookup(&params, "name", Some(0)).is_err());
        assert!(lookup(&params, "missing", None).is_err());
    }

    #[test]
    fn params_from_json_object() {
        let obj = serde_json::json!({"age": 30, "name": "Ann", "tags": ["a", "b"]});
        let params = SqlParams::from_json(obj.as_object().cloned().unwrap());
        assert_eq!(params.len(), 3);
        assert_eq!(params.get("age").unwrap().value, Value::Int(30));
        assert!(matches!(params.get("tags").unwrap().value, Value::List(_)));
    }
}

//! Bound SQL values, result rows and entity ids.
//!
//! [`SqlValue`] is the only thing that ever becomes a positional parameter.
//! It binds to PostgreSQL through `tokio-postgres`'s [`ToSql`] with the same
//! lenient text coercion the server applies to untyped literals, so an id held
//! as a decimal string binds to a `bigint` column and a timestamp held as an
//! RFC 3339 string binds to a `timestamp` column.

use std::error::Error as StdError;
use std::fmt;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

type BoxError = Box<dyn StdError + Sync + Send>;

/// A result row: column name to JSON value, keyed in column-name order.
pub type Row = serde_json::Map<String, JsonValue>;

/// A scalar or scalar-array value bound as a positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    /// Structured value bound to a `json`/`jsonb` parameter.
    Json(JsonValue),
    /// Element-wise bound array (`text[]`, `bigint[]`, ...).
    Array(Vec<SqlValue>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert a JSON value into a bindable value.
    ///
    /// Objects become [`SqlValue::Json`]; arrays bind element-wise.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            JsonValue::Array(items) => SqlValue::Array(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    /// Render the value as JSON, the representation rows are shaped from.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            SqlValue::Timestamp(ts) => {
                JsonValue::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            SqlValue::TimestampTz(ts) => JsonValue::String(ts.to_rfc3339()),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Array(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::TimestampTz(v)
    }
}

impl From<&Id> for SqlValue {
    fn from(v: &Id) -> Self {
        SqlValue::Text(v.0.clone())
    }
}

impl From<Id> for SqlValue {
    fn from(v: Id) -> Self {
        SqlValue::Text(v.0)
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for SqlValue {
    fn from(v: Vec<T>) -> Self {
        SqlValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

const TEXT_TYPES: &[Type] = &[Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME, Type::UNKNOWN];

fn is_text(ty: &Type) -> bool {
    TEXT_TYPES.contains(ty)
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot bind {:?} to parameter of type {}", value, ty).into()
}

/// Exact decimal parse, falling back to scientific notation.
fn parse_decimal(s: &str) -> Result<Decimal, BoxError> {
    Decimal::from_str_exact(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| format!("invalid numeric {:?}: {}", s, e).into())
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.naive_utc());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| format!("invalid timestamp {:?}: {}", s, e).into())
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => {
                if *ty == Type::BOOL {
                    v.to_sql(ty, out)
                } else if is_text(ty) {
                    v.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Int(v) => {
                if *ty == Type::INT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::from(*v).to_sql(ty, out)
                } else if is_text(ty) {
                    v.to_string().to_sql(ty, out)
                } else if is_json(ty) {
                    JsonValue::from(*v).to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Float(v) => {
                if *ty == Type::FLOAT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::try_from(*v)?.to_sql(ty, out)
                } else if is_text(ty) {
                    v.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Text(s) => {
                if is_text(ty) {
                    s.as_str().to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    s.parse::<i64>()?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    s.parse::<i32>()?.to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    s.parse::<i16>()?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    s.parse::<f64>()?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    s.parse::<f32>()?.to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    parse_decimal(s)?.to_sql(ty, out)
                } else if *ty == Type::UUID {
                    Uuid::parse_str(s)?.to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    s.parse::<bool>()?.to_sql(ty, out)
                } else if *ty == Type::DATE {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    parse_timestamp(s)?.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    parse_timestamp(s)?.and_utc().to_sql(ty, out)
                } else if is_json(ty) {
                    JsonValue::String(s.clone()).to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Date(d) => {
                if *ty == Type::DATE {
                    d.to_sql(ty, out)
                } else if is_text(ty) {
                    d.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Timestamp(ts) => {
                if *ty == Type::TIMESTAMP {
                    ts.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    ts.and_utc().to_sql(ty, out)
                } else if is_text(ty) {
                    ts.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::TimestampTz(ts) => {
                if *ty == Type::TIMESTAMPTZ {
                    ts.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMP {
                    ts.naive_utc().to_sql(ty, out)
                } else if is_text(ty) {
                    ts.to_rfc3339().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Json(v) => {
                if is_json(ty) {
                    v.to_sql(ty, out)
                } else if is_text(ty) {
                    v.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            SqlValue::Array(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ if is_json(ty) => self.to_json().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if let Kind::Array(_) = ty.kind() {
            return Ok(SqlValue::Array(Vec::<SqlValue>::from_sql(ty, raw)?));
        }
        if *ty == Type::BOOL {
            Ok(SqlValue::Bool(bool::from_sql(ty, raw)?))
        } else if *ty == Type::INT2 {
            Ok(SqlValue::Int(i64::from(i16::from_sql(ty, raw)?)))
        } else if *ty == Type::INT4 {
            Ok(SqlValue::Int(i64::from(i32::from_sql(ty, raw)?)))
        } else if *ty == Type::INT8 {
            Ok(SqlValue::Int(i64::from_sql(ty, raw)?))
        } else if *ty == Type::OID {
            Ok(SqlValue::Int(i64::from(u32::from_sql(ty, raw)?)))
        } else if *ty == Type::FLOAT4 {
            Ok(SqlValue::Float(f64::from(f32::from_sql(ty, raw)?)))
        } else if *ty == Type::FLOAT8 {
            Ok(SqlValue::Float(f64::from_sql(ty, raw)?))
        } else if *ty == Type::NUMERIC {
            Ok(SqlValue::Text(Decimal::from_sql(ty, raw)?.to_string()))
        } else if *ty == Type::UUID {
            Ok(SqlValue::Text(Uuid::from_sql(ty, raw)?.to_string()))
        } else if is_text(ty) {
            Ok(SqlValue::Text(String::from_sql(ty, raw)?))
        } else if *ty == Type::DATE {
            Ok(SqlValue::Date(NaiveDate::from_sql(ty, raw)?))
        } else if *ty == Type::TIMESTAMP {
            Ok(SqlValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?))
        } else if *ty == Type::TIMESTAMPTZ {
            Ok(SqlValue::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?))
        } else if is_json(ty) {
            Ok(SqlValue::Json(JsonValue::from_sql(ty, raw)?))
        } else {
            Err(format!("unsupported column type {}", ty).into())
        }
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(SqlValue::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Entity identifier: a positive 63-bit integer carried as a decimal string.
///
/// `"0"` is the reserved "no entity" id, and `"auto"` asks `create` to
/// generate one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    /// Sentinel requesting a generated id on insert.
    pub const AUTO: &'static str = "auto";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The "generate one for me" id.
    #[must_use]
    pub fn auto() -> Self {
        Self(Self::AUTO.to_string())
    }

    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.0 == Self::AUTO
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, or `None` unless it is a positive integer
    /// written as plain decimal digits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse::<i64>().ok().filter(|n| *n > 0)
    }

    /// Read an id out of a row's JSON value (number or string).
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(Self(s.clone())),
            JsonValue::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Self(v.to_string())
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Self(v)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or a decimal string id")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Id, E> {
        Ok(Id::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Id, E> {
        Ok(Id(v.to_string()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Id, E> {
        Ok(Id::from(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Id, E> {
        Ok(Id(v))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

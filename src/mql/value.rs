//! Literal values recovered from source code or returned by a cluster.
//!
//! Dialect parsers only produce values they can fold statically; the driver
//! port produces them when decoding extended JSON.

use chrono::NaiveDateTime;
use std::fmt;
use uuid::Uuid;

use super::bson_type::BsonType;

/// A statically known value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    /// Arbitrary precision numeric literal (BigDecimal, BigInteger, Decimal128)
    Decimal128(String),
    String(String),
    /// 24 hex chars
    ObjectId(String),
    Date(NaiveDateTime),
    Uuid(Uuid),
    Array(Vec<Value>),
    /// Ordered key/value pairs, insertion order is kept
    Document(Vec<(String, Value)>),
    /// Raw shell text that must be emitted verbatim
    AsIs(String),
    /// A value of a type we can't represent. Carries the type name for diagnostics.
    Opaque(String),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    pub fn document<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Document(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The BSON type this value would have once stored.
    pub fn bson_type(&self) -> BsonType {
        BsonType::infer_from_value(self)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Looks up a key when this value is a document.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Document(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Whether this value is an AsIs snippet with only whitespace in it.
    pub fn is_blank_as_is(&self) -> bool {
        matches!(self, Value::AsIs(raw) if raw.trim().is_empty())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Decimal128(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::ObjectId(hex) => write!(f, "{}", hex),
            Value::Date(date) => write!(f, "{}", date.format("%Y-%m-%dT%H:%M:%S")),
            Value::Uuid(uuid) => write!(f, "{}", uuid),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Document(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::AsIs(raw) => write!(f, "{}", raw),
            Value::Opaque(type_name) => write!(f, "<{}>", type_name),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

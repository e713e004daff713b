//! Value types for the proven driver
//!
//! Scalar value representation plus the type tags used when binding parameters.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A row of values (useful for result sets)
pub type Row = Vec<Value>;

/// Named parameter values in the order the query declares them
pub type NamedParams = Vec<(String, TypedValue)>;

/// Declared backend type of a parameter or column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int32,
    Int64,
    Uint64,
    Double,
    Text,
    Bytes,
    Date,
    Timestamp,
    Uuid,
    Json,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "Bool",
            ValueType::Int32 => "Int32",
            ValueType::Int64 => "Int64",
            ValueType::Uint64 => "Uint64",
            ValueType::Double => "Double",
            ValueType::Text => "Text",
            ValueType::Bytes => "Bytes",
            ValueType::Date => "Date",
            ValueType::Timestamp => "Timestamp",
            ValueType::Uuid => "Uuid",
            ValueType::Json => "Json",
        };
        f.write_str(name)
    }
}

/// Universal value type for driver parameters and results
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Value {
    /// Create an I64 value (most common integer type)
    pub fn integer(i: i64) -> Self {
        Value::I64(i)
    }

    /// Create a string value
    pub fn string<S: Into<String>>(s: S) -> Self {
        Value::Str(s.into())
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type a non-null value binds as when no type is given explicitly.
    ///
    /// Null carries no type of its own and returns `None`.
    pub fn natural_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::I32(_) => Some(ValueType::Int32),
            Value::I64(_) => Some(ValueType::Int64),
            Value::U64(_) => Some(ValueType::Uint64),
            Value::F64(_) => Some(ValueType::Double),
            Value::Str(_) => Some(ValueType::Text),
            Value::Bytes(_) => Some(ValueType::Bytes),
            Value::Date(_) => Some(ValueType::Date),
            Value::Timestamp(_) => Some(ValueType::Timestamp),
            Value::Uuid(_) => Some(ValueType::Uuid),
            Value::Json(_) => Some(ValueType::Json),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({:?})", b),
            Value::I32(i) => write!(f, "I32({:?})", i),
            Value::I64(i) => write!(f, "I64({:?})", i),
            Value::U64(u) => write!(f, "U64({:?})", u),
            Value::F64(fl) => write!(f, "F64({:?})", fl),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Date(d) => write!(f, "Date({:?})", d),
            Value::Timestamp(ts) => write!(f, "Timestamp({:?})", ts),
            Value::Uuid(u) => write!(f, "Uuid({:?})", u),
            Value::Json(j) => write!(f, "Json({:?})", j),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(i) => write!(f, "{}", i),
            Value::I64(i) => write!(f, "{}", i),
            Value::U64(u) => write!(f, "{}", u),
            Value::F64(fl) => write!(f, "{}", fl),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Timestamp(ts) => write!(f, "{}", ts),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Json(j) => write!(f, "{}", j),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::I32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::I64(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::U64(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

/// A parameter value together with the backend type it is bound as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    pub value: Value,
    pub value_type: ValueType,
}

impl TypedValue {
    pub fn new(value: Value, value_type: ValueType) -> Self {
        Self { value, value_type }
    }

    /// Typed null
    pub fn null(value_type: ValueType) -> Self {
        Self {
            value: Value::Null,
            value_type,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.value, self.value_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_type() {
        assert_eq!(Value::from(7i64).natural_type(), Some(ValueType::Int64));
        assert_eq!(Value::from("abc").natural_type(), Some(ValueType::Text));
        assert_eq!(Value::Null.natural_type(), None);
    }

    #[test]
    fn test_typed_null_display() {
        let v = TypedValue::null(ValueType::Uint64);
        assert!(v.is_null());
        assert_eq!(v.to_string(), "NULL: Uint64");
    }
}

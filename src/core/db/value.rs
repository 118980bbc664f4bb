/// Value Module
///
/// The canonical value stored in a row, and the classifier that decides
/// which native values need to go through the text codec.

use super::codec::TextCodec;
use crate::core::Result;
use crate::native::NativeValue;
use std::borrow::Cow;
use std::fmt;

/// A row: values positionally aligned with the cursor's columns.
pub type Row = Vec<Value>;

/// Canonical value handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
    Binary(Vec<u8>),
}

/// Outcome of classifying a native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// String-like; must be decoded by the connection's codec
    Text,
    /// Numbers, booleans, blobs and null; passed through untouched
    Opaque,
}

/// Classifies by the native runtime type only, never by content.
pub fn classify(value: &NativeValue) -> ValueClass {
    match value {
        NativeValue::Text(_) => ValueClass::Text,
        NativeValue::Null
        | NativeValue::Integer(_)
        | NativeValue::Real(_)
        | NativeValue::Boolean(_)
        | NativeValue::Binary(_) => ValueClass::Opaque,
    }
}

/// Converts a native value into a canonical one.
///
/// Only [`ValueClass::Text`] values reach the codec; the rest map one to one.
pub fn marshal(value: NativeValue, codec: TextCodec) -> Result<Value> {
    let value = match value {
        NativeValue::Text(bytes) => return codec.decode(bytes).map(Value::Text),
        NativeValue::Null => Value::Null,
        NativeValue::Integer(i) => Value::Integer(i),
        NativeValue::Real(f) => Value::Real(f),
        NativeValue::Boolean(b) => Value::Boolean(b),
        NativeValue::Binary(b) => Value::Binary(b),
    };
    Ok(value)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Explicit text coercion. Null becomes the empty string.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Text(s) => Cow::Borrowed(s),
            Value::Integer(i) => Cow::Owned(i.to_string()),
            Value::Real(f) => Cow::Owned(f.to_string()),
            Value::Boolean(b) => Cow::Owned(b.to_string()),
            Value::Binary(b) => String::from_utf8_lossy(b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Text(s) => write!(f, "{}", s),
            Value::Binary(b) => write!(f, "<BLOB: {} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

//! Scalar values and their declared types.
//!
//! Every variable node holds exactly one scalar out of a small closed set
//! (double, int, bool, text). The JSON form is adjacently tagged
//! (`{"type": "double", "value": 42.0}`) so the wire representation stays
//! self-describing and integers are never conflated with doubles.

use serde::{Deserialize, Serialize};

/// Declared data type of a variable node.
///
/// Fixed at node creation; writes of any other type are rejected, not
/// coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Double,
    Int,
    Bool,
    Text,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Double => "double",
            DataType::Int => "int",
            DataType::Bool => "bool",
            DataType::Text => "text",
        };
        write!(f, "{}", s)
    }
}

/// A scalar value.
///
/// Equality is exact: two values are equal only if they have the same type
/// and identical contents. No numeric coercion, no epsilon tolerance —
/// change detection in the sampler relies on this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Double(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// The data type this value belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Double(_) => DataType::Double,
            Value::Int(_) => DataType::Int,
            Value::Bool(_) => DataType::Bool,
            Value::Text(_) => DataType::Text,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Double(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Read/write access mask of a variable node.
///
/// Immutable metadata, set at node creation. Enforced at the transport
/// boundary for client writes; server-internal writes bypass it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLevel {
    pub read: bool,
    pub write: bool,
}

impl AccessLevel {
    pub const READ_ONLY: AccessLevel = AccessLevel {
        read: true,
        write: false,
    };

    pub const READ_WRITE: AccessLevel = AccessLevel {
        read: true,
        write: true,
    };
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel::READ_WRITE
    }
}

//! Tagged attribute values.
//!
//! Every attribute of the instrument carries exactly one [`AttributeValue`].
//! The variant doubles as the value's kind, so generic engine code can store,
//! compare and validate values without knowing what the attribute means.
//!
//! Kind-checked accessors (`as_real`, `as_flag`, ...) never convert between
//! kinds. Asking a `Real` for an integer is a [`Rejection::TypeMismatch`],
//! not a silent cast.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coercion::Rejection;

/// Opaque handle value (session, resource, or instrument handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// The closed set of attribute value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Signed 64-bit integer.
    Integer,
    /// IEEE-754 double.
    Real,
    /// UTF-8 string.
    Text,
    /// Boolean.
    Flag,
    /// Opaque handle.
    Handle,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "integer",
            ValueKind::Real => "real",
            ValueKind::Text => "text",
            ValueKind::Flag => "flag",
            ValueKind::Handle => "handle",
        };
        f.write_str(name)
    }
}

/// One attribute's value, tagged with its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Integer value.
    Integer(i64),
    /// Real value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Boolean value.
    Flag(bool),
    /// Handle value.
    Handle(Handle),
}

impl AttributeValue {
    /// The kind carried by this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            AttributeValue::Integer(_) => ValueKind::Integer,
            AttributeValue::Real(_) => ValueKind::Real,
            AttributeValue::Text(_) => ValueKind::Text,
            AttributeValue::Flag(_) => ValueKind::Flag,
            AttributeValue::Handle(_) => ValueKind::Handle,
        }
    }

    /// Zero value of a kind (used when a descriptor declares no default).
    pub fn zero(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Integer => AttributeValue::Integer(0),
            ValueKind::Real => AttributeValue::Real(0.0),
            ValueKind::Text => AttributeValue::Text(String::new()),
            ValueKind::Flag => AttributeValue::Flag(false),
            ValueKind::Handle => AttributeValue::Handle(Handle(0)),
        }
    }

    /// Extract an integer, or fail with a type mismatch.
    pub fn as_integer(&self) -> Result<i64, Rejection> {
        match self {
            AttributeValue::Integer(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Integer, other)),
        }
    }

    /// Extract a real, or fail with a type mismatch.
    pub fn as_real(&self) -> Result<f64, Rejection> {
        match self {
            AttributeValue::Real(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Real, other)),
        }
    }

    /// Extract text, or fail with a type mismatch.
    pub fn as_text(&self) -> Result<&str, Rejection> {
        match self {
            AttributeValue::Text(v) => Ok(v),
            other => Err(mismatch(ValueKind::Text, other)),
        }
    }

    /// Extract a flag, or fail with a type mismatch.
    pub fn as_flag(&self) -> Result<bool, Rejection> {
        match self {
            AttributeValue::Flag(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Flag, other)),
        }
    }

    /// Extract a handle, or fail with a type mismatch.
    pub fn as_handle(&self) -> Result<Handle, Rejection> {
        match self {
            AttributeValue::Handle(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Handle, other)),
        }
    }

    /// Bitwise identity: unlike `==`, `Real(NaN)` equals itself and
    /// `Real(0.0)` differs from `Real(-0.0)`.
    pub fn same_bits(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Real(a), AttributeValue::Real(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

fn mismatch(expected: ValueKind, actual: &AttributeValue) -> Rejection {
    Rejection::TypeMismatch {
        expected,
        actual: actual.kind(),
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(v) => write!(f, "{}", v),
            AttributeValue::Real(v) => write!(f, "{}", v),
            AttributeValue::Text(v) => write!(f, "\"{}\"", v),
            AttributeValue::Flag(v) => write!(f, "{}", v),
            AttributeValue::Handle(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Integer(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Real(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Flag(value)
    }
}

impl From<Handle> for AttributeValue {
    fn from(value: Handle) -> Self {
        AttributeValue::Handle(value)
    }
}

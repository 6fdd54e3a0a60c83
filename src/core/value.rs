//! Runtime values and the declared data types of ports.
//!
//! Data types are checked with an assignability predicate rather than strict
//! equality: every type flows into [`DataType::Any`], booleans flow into
//! integers, and [`Value::Null`] satisfies any declared type.

use super::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Prefix marking a default value as a deferred reference to a global variable.
pub const DEFERRED_SIGIL: char = '$';

/// A value carried by a data port, scoped variable or global variable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// The concrete type of this value, `None` for [`Value::Null`].
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::Int(_) => Some(DataType::Int),
            Self::Float(_) => Some(DataType::Float),
            Self::Str(_) => Some(DataType::Str),
            Self::List(_) => Some(DataType::List),
            Self::Map(_) => Some(DataType::Map),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Name of the global variable this value defers to, if it is a deferred reference.
    pub fn deferred_reference(&self) -> Option<&str> {
        match self {
            Self::Str(s) if s.len() > 1 && s.starts_with(DEFERRED_SIGIL) => Some(&s[1..]),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Declared type of a data port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Any => "object",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Map => "dict",
        }
    }

    /// Type-compatibility predicate used for data flows.
    ///
    /// # Example
    ///
    /// ```rust
    /// use statecraft::core::DataType;
    ///
    /// assert!(DataType::Int.is_assignable_to(DataType::Any));
    /// assert!(DataType::Bool.is_assignable_to(DataType::Int));
    /// assert!(!DataType::Str.is_assignable_to(DataType::Int));
    /// ```
    pub fn is_assignable_to(self, target: DataType) -> bool {
        self == target
            || target == DataType::Any
            || (self == DataType::Bool && target == DataType::Int)
    }

    /// True if `value` satisfies this type. `Null` satisfies every type.
    pub fn accepts(self, value: &Value) -> bool {
        value
            .data_type()
            .is_none_or(|actual| actual.is_assignable_to(self))
    }

    /// Parse a textual value into this type.
    pub fn parse_value(self, text: &str) -> Option<Value> {
        match self {
            Self::Bool => match text {
                "True" | "true" => Some(Value::Bool(true)),
                "False" | "false" => Some(Value::Bool(false)),
                _ => None,
            },
            Self::Int => text.trim().parse().ok().map(Value::Int),
            Self::Float => text.trim().parse().ok().map(Value::Float),
            Self::Str | Self::Any => Some(Value::Str(text.to_string())),
            Self::List | Self::Map => serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .map(Value::from)
                .filter(|value| self.accepts(value)),
        }
    }

    /// Convert a value to this type where a lossless-enough numeric conversion exists.
    pub fn convert(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (Self::Int, Value::Float(f)) if f.is_finite() => Some(Value::Int(f.trunc() as i64)),
            _ if self.accepts(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "object" | "any" => Ok(Self::Any),
            "bool" => Ok(Self::Bool),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "str" | "string" => Ok(Self::Str),
            "list" => Ok(Self::List),
            "dict" | "map" => Ok(Self::Map),
            other => Err(ModelError::UnknownDataType(other.to_string())),
        }
    }
}

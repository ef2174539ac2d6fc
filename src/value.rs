//! Local representation of register values.

use std::fmt;

/// Runtime descriptor of the kind of local value a codec produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueType {
  Number,
  Bool,
  Text,
}

/// A decoded register value.
///
/// A register that has no valid value (never polled, or too many failed
/// reads in a row) is represented as `Option<Value>::None`, not as a
/// variant of this enum.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  Number(f64),
  Bool(bool),
  Text(String),
}

impl Value {
  pub fn value_type(&self) -> ValueType {
    match self {
      Value::Number(_) => ValueType::Number,
      Value::Bool(_) => ValueType::Bool,
      Value::Text(_) => ValueType::Text,
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Value::Text(t) => Some(t),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Number(n) => write!(f, "{n}"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Text(t) => f.write_str(t),
    }
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Value {
    Value::Number(n)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Value {
    Value::Bool(b)
  }
}

impl From<String> for Value {
  fn from(t: String) -> Value {
    Value::Text(t)
  }
}

impl From<&str> for Value {
  fn from(t: &str) -> Value {
    Value::Text(t.to_string())
  }
}

//! Boolean codec.

use std::sync::{Arc, OnceLock};

use crate::{
  error::CodecError,
  value::{Value, ValueType},
};
use super::IntCodec;

/// Boolean codec: zero is false, anything else is true; true writes as 1.
///
/// The codec has no state, so all registers share one instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BooleanCodec;

impl BooleanCodec {
  /// The process-wide shared instance.
  pub fn shared() -> Arc<dyn IntCodec> {
    static SHARED: OnceLock<Arc<BooleanCodec>> = OnceLock::new();
    SHARED.get_or_init(|| Arc::new(BooleanCodec)).clone()
  }
}

impl IntCodec for BooleanCodec {
  fn value_type(&self) -> ValueType {
    ValueType::Bool
  }

  fn decode_int(&self, wire: i32) -> Option<Value> {
    Some(Value::Bool(wire != 0))
  }

  fn encode_int(&self, value: &Value) -> Result<i32, CodecError> {
    match value {
      Value::Bool(b) => Ok(i32::from(*b)),
      other => Err(CodecError::NotConvertible(format!(
        "expected a boolean, got {other}"
      ))),
    }
  }
}

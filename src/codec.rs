//! Conversion between device-side values and local typed values.

mod boolean;
mod hex_binary;
mod number;

use std::{fmt::Debug, sync::Arc};

pub use boolean::BooleanCodec;
pub use hex_binary::HexBinaryCodec;
pub use number::NumberCodec;

use crate::{
  error::CodecError,
  value::{Value, ValueType},
};

/// Codec for integer-valued registers.
///
/// Decoding never produces an "invalid" value: a `None` from
/// [`decode_int`](IntCodec::decode_int) is a rejection, which the register
/// treats as a read failure.
pub trait IntCodec: Debug + Send + Sync {
  fn value_type(&self) -> ValueType;

  /// Decodes a device-side value, or rejects it with `None`.
  fn decode_int(&self, wire: i32) -> Option<Value>;

  /// Encodes a local value for the wire.
  fn encode_int(&self, value: &Value) -> Result<i32, CodecError>;
}

/// Codec for binary-valued registers.
pub trait BinaryCodec: Debug + Send + Sync {
  fn value_type(&self) -> ValueType;

  /// Decodes device-side bytes, or rejects them with `None`.
  fn decode_binary(&self, wire: &[u8]) -> Option<Value>;

  /// Encodes a local value as wire bytes.
  fn encode_binary(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

/// The codec capability of one register: integer-valued or binary-valued.
///
/// Codecs are immutable after construction and freely shared between any
/// number of registers.
#[derive(Clone, Debug)]
pub enum RegisterCodec {
  Int(Arc<dyn IntCodec>),
  Binary(Arc<dyn BinaryCodec>),
}

impl RegisterCodec {
  pub fn int(codec: impl IntCodec + 'static) -> RegisterCodec {
    RegisterCodec::Int(Arc::new(codec))
  }

  pub fn binary(codec: impl BinaryCodec + 'static) -> RegisterCodec {
    RegisterCodec::Binary(Arc::new(codec))
  }

  pub fn value_type(&self) -> ValueType {
    match self {
      RegisterCodec::Int(codec) => codec.value_type(),
      RegisterCodec::Binary(codec) => codec.value_type(),
    }
  }
}

//! Hex-string codec for binary registers.

use crate::{
  error::CodecError,
  value::{Value, ValueType},
};
use super::BinaryCodec;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Presents binary register contents as an uppercase hex string, optionally
/// with a space between bytes. Content length is constrained to
/// `min_length..=max_length` bytes in both directions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HexBinaryCodec {
  min_length: usize,
  max_length: usize,
  spaces: bool,
}

impl Default for HexBinaryCodec {
  /// No length constraints, no spaces.
  fn default() -> HexBinaryCodec {
    HexBinaryCodec {
      min_length: 0,
      max_length: usize::MAX,
      spaces: false,
    }
  }
}

impl HexBinaryCodec {
  /// # Panics
  ///
  /// Panics if `min_length` exceeds `max_length`.
  pub fn new(min_length: usize, max_length: usize, spaces: bool) -> HexBinaryCodec {
    assert!(
      min_length <= max_length,
      "min_length must not exceed max_length"
    );
    HexBinaryCodec {
      min_length,
      max_length,
      spaces,
    }
  }

  fn length_ok(&self, length: usize) -> bool {
    (self.min_length..=self.max_length).contains(&length)
  }
}

impl BinaryCodec for HexBinaryCodec {
  fn value_type(&self) -> ValueType {
    ValueType::Text
  }

  fn decode_binary(&self, wire: &[u8]) -> Option<Value> {
    if !self.length_ok(wire.len()) {
      return None;
    }
    let mut text = String::with_capacity(wire.len() * 3);
    for (i, byte) in wire.iter().enumerate() {
      if self.spaces && i > 0 {
        text.push(' ');
      }
      text.push(HEX_DIGITS[(byte >> 4) as usize] as char);
      text.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }
    Some(Value::Text(text))
  }

  fn encode_binary(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
    let Value::Text(text) = value else {
      return Err(CodecError::NotConvertible(format!(
        "expected a hex string, got {value}"
      )));
    };
    // whitespace is tolerated regardless of the `spaces` formatting flag
    let mut nibbles = Vec::with_capacity(text.len());
    for ch in text.chars() {
      if ch.is_ascii_whitespace() {
        continue;
      }
      let nibble = ch.to_digit(16).ok_or_else(|| {
        CodecError::NotConvertible(format!("{ch:?} is not a hex digit"))
      })?;
      nibbles.push(nibble as u8);
    }
    if nibbles.len() % 2 != 0 {
      return Err(CodecError::NotConvertible(
        "odd number of hex digits".to_string(),
      ));
    }
    let bytes: Vec<u8> = nibbles
      .chunks_exact(2)
      .map(|pair| pair[0] << 4 | pair[1])
      .collect();
    if !self.length_ok(bytes.len()) {
      return Err(CodecError::NotConvertible(format!(
        "{} bytes outside the permitted length range",
        bytes.len()
      )));
    }
    Ok(bytes)
  }
}

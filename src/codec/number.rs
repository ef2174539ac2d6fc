//! Scaled numeric codec.

use crate::{
  error::CodecError,
  value::{Value, ValueType},
};
use super::IntCodec;

/// Maps a wire integer `w` to the local number
/// `round(scale · w + shift, decimals)` and back.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberCodec {
  scale: f64,
  shift: f64,
  decimals: u32,
}

impl Default for NumberCodec {
  /// The identity mapping: scale 1, shift 0, no decimals.
  fn default() -> NumberCodec {
    NumberCodec {
      scale: 1.0,
      shift: 0.0,
      decimals: 0,
    }
  }
}

impl NumberCodec {
  /// # Panics
  ///
  /// Panics if `scale` is zero or not finite, or if `shift` is not finite.
  pub fn new(scale: f64, shift: f64, decimals: u32) -> NumberCodec {
    assert!(
      scale.is_finite() && scale != 0.0,
      "scale must be finite and non-zero"
    );
    assert!(shift.is_finite(), "shift must be finite");
    NumberCodec {
      scale,
      shift,
      decimals,
    }
  }

  fn round_to_decimals(&self, x: f64) -> f64 {
    let power = 10f64.powi(self.decimals as i32);
    (x * power).round() / power
  }
}

impl IntCodec for NumberCodec {
  fn value_type(&self) -> ValueType {
    ValueType::Number
  }

  fn decode_int(&self, wire: i32) -> Option<Value> {
    let local = self.round_to_decimals(self.scale * f64::from(wire) + self.shift);
    local.is_finite().then_some(Value::Number(local))
  }

  fn encode_int(&self, value: &Value) -> Result<i32, CodecError> {
    let Value::Number(local) = value else {
      return Err(CodecError::NotConvertible(format!(
        "expected a number, got {value}"
      )));
    };
    let wire = ((local - self.shift) / self.scale).round();
    if !wire.is_finite() || wire < f64::from(i32::MIN) || wire > f64::from(i32::MAX) {
      return Err(CodecError::NotConvertible(format!(
        "{local} does not fit the wire integer range"
      )));
    }
    Ok(wire as i32)
  }
}

#[cfg(test)]
mod tests {
  use test_case::test_case;

  use super::*;

  #[test_case(0; "zero")]
  #[test_case(1; "one")]
  #[test_case(-1; "minus_one")]
  #[test_case(4095; "four_thousand_ninety_five")]
  #[test_case(i32::MIN; "i32_min")]
  #[test_case(i32::MAX; "i32_max")]
  fn identity_codec_round_trips(wire: i32) {
    let codec = NumberCodec::default();
    let local = codec.decode_int(wire).unwrap();
    assert_eq!(local, Value::Number(f64::from(wire)));
    assert_eq!(codec.encode_int(&local), Ok(wire));
  }

  #[test]
  fn applies_scale_and_shift() {
    // a tenth-of-a-degree temperature register with a -40 offset
    let codec = NumberCodec::new(0.1, -40.0, 1);
    assert_eq!(codec.decode_int(652), Some(Value::Number(25.2)));
    assert_eq!(codec.encode_int(&Value::Number(25.2)), Ok(652));
  }

  #[test]
  fn rounds_to_the_requested_decimals() {
    let codec = NumberCodec::new(1.0 / 3.0, 0.0, 2);
    let Some(Value::Number(local)) = codec.decode_int(1) else {
      panic!("decode rejected");
    };
    assert_eq!(local, 0.33);
  }

  #[test]
  fn fractional_round_trip_stays_within_half_a_decimal() {
    let codec = NumberCodec::new(0.1, 0.0, 1);
    for wire in -1000..1000 {
      let Some(Value::Number(local)) = codec.decode_int(wire) else {
        panic!("decode rejected {wire}");
      };
      let reencoded = codec.encode_int(&Value::Number(local)).unwrap();
      assert_eq!(reencoded, wire);
      assert!((local - 0.1 * f64::from(wire)).abs() <= 0.05);
    }
  }

  #[test]
  fn rejects_values_outside_the_wire_range() {
    let codec = NumberCodec::default();
    assert!(codec.encode_int(&Value::Number(3e9)).is_err());
    assert!(codec.encode_int(&Value::Number(f64::NAN)).is_err());
  }

  #[test]
  fn rejects_foreign_value_kinds() {
    let codec = NumberCodec::default();
    assert!(codec.encode_int(&Value::Bool(true)).is_err());
    assert!(codec.encode_int(&Value::Text("12".into())).is_err());
  }
}

//! The wire's signed variable-length integer.
//!
//! The encoding is big-endian continuation style. The first byte carries the
//! sign in bit 6 and the six most significant magnitude bits; each further
//! byte carries seven magnitude bits. Bit 7 marks a continuation byte, so
//! the byte that ends the number has bit 7 clear. `i32::MIN` has no
//! representable positive magnitude and is encoded as the single byte
//! `0x40`: sign set, magnitude zero, terminator.

use crate::error::WireError;

const CONTINUATION_BIT: u8 = 0x80;
const SIGN_BIT: u8 = 0x40;

/// Appends the encoding of `value` to `out`. At most five bytes are
/// written.
pub fn encode_into(value: i32, out: &mut Vec<u8>) {
  if value == i32::MIN {
    out.push(SIGN_BIT);
    return;
  }
  let sign = if value < 0 { SIGN_BIT } else { 0 };
  let magnitude = value.unsigned_abs();
  if magnitude < 64 {
    out.push(sign | magnitude as u8);
    return;
  }
  // Emit from the least significant end, then reverse into wire order.
  let start = out.len();
  out.push((magnitude & 0x7F) as u8);
  let mut rest = magnitude >> 7;
  while rest >= 64 {
    out.push(CONTINUATION_BIT | (rest & 0x7F) as u8);
    rest >>= 7;
  }
  out.push(CONTINUATION_BIT | sign | rest as u8);
  out[start..].reverse();
}

pub fn encode(value: i32) -> Vec<u8> {
  let mut out = Vec::with_capacity(5);
  encode_into(value, &mut out);
  out
}

/// Decodes one integer from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(i32, usize), WireError> {
  let first = *buf.first().ok_or(WireError::Truncated)?;
  let negative = first & SIGN_BIT != 0;
  let mut magnitude = u64::from(first & 0x3F);
  let mut consumed = 1;

  if first & CONTINUATION_BIT == 0 {
    if negative && magnitude == 0 {
      return Ok((i32::MIN, consumed));
    }
  } else {
    loop {
      let byte = *buf.get(consumed).ok_or(WireError::Truncated)?;
      consumed += 1;
      magnitude = magnitude * 128 + u64::from(byte & 0x7F);
      if magnitude > u64::from(u32::MAX) {
        return Err(WireError::IntOutOfRange);
      }
      if byte & CONTINUATION_BIT == 0 {
        break;
      }
    }
  }

  let limit = if negative { 1u64 << 31 } else { (1u64 << 31) - 1 };
  if magnitude > limit {
    return Err(WireError::IntOutOfRange);
  }
  let value = if negative {
    -(magnitude as i64)
  } else {
    magnitude as i64
  };
  Ok((value as i32, consumed))
}

//! Error types shared across the crate.

use thiserror::Error;

/// Failure reported by a [`Messenger`](crate::Messenger) implementation:
/// the socket could not be opened, or a send did not go through.
#[derive(Debug, Error)]
#[error("transport failure: {reason}")]
pub struct TransportError {
  reason: String,
}

impl TransportError {
  pub fn new(reason: impl Into<String>) -> TransportError {
    TransportError {
      reason: reason.into(),
    }
  }
}

/// Malformed wire data in a response.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WireError {
  /// The message ended before the decoder was done.
  #[error("invalid message: truncated")]
  Truncated,
  /// A variable-length integer does not fit the 32-bit value range.
  #[error("invalid message: integer out of range")]
  IntOutOfRange,
}

/// Failure of one request/response cycle through the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("gateway is not running")]
  NotRunning,

  /// No response arrived within the timeout.
  #[error("no response from registry {registry_id}")]
  NoResponse { registry_id: u8 },

  /// The device answered with a non-OK status byte.
  #[error("request failed on registry {registry_id} (status {status:#04x})")]
  RequestFailed { registry_id: u8, status: u8 },

  /// The gateway was stopped while the request was waiting for its
  /// response.
  #[error("request interrupted by gateway shutdown")]
  Interrupted,

  #[error("register id {0} out of range")]
  InvalidRegisterId(u16),

  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("malformed response: {0}")]
  Malformed(#[from] WireError),
}

/// A local value that a codec cannot express on the wire.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CodecError {
  #[error("value not convertible: {0}")]
  NotConvertible(String),
}

/// Failure of [`Register::set_value`](crate::Register::set_value).
#[derive(Debug, Error)]
pub enum RegisterError {
  #[error("register is read-only")]
  ReadOnly,

  #[error("cannot encode value for register {register_id}: {source}")]
  Encode {
    register_id: u16,
    #[source]
    source: CodecError,
  },

  #[error("failed to write register {register_id}: {source}")]
  Write {
    register_id: u16,
    #[source]
    source: GatewayError,
  },
}

/// Invalid data in externally loaded configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
  #[error("bad interval: {0:?}")]
  BadInterval(String),

  #[error("unknown hint strategy: {0:?}")]
  UnknownStrategy(String),

  #[error("bad codec parameters: {0}")]
  BadCodec(String),

  #[error("registry id {0} out of range 0..=15")]
  RegistryIdOutOfRange(u8),

  #[error("register id {0} out of range")]
  RegisterIdOutOfRange(u16),
}

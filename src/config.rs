//! Configuration shape consumed from external loaders.
//!
//! The XML (or other) configuration format itself lives outside this crate;
//! loaders deserialize into these structures and call
//! [`CollectionConfig::instantiate`] to build a collection, its registers
//! and the hint settings for an [`AutoUpdater`](crate::AutoUpdater).

use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::{
  codec::{BooleanCodec, HexBinaryCodec, NumberCodec, RegisterCodec},
  collection::{RegisterCollection, MAX_REGISTRY_ID},
  error::ConfigError,
  gateway::Gateway,
  hints::{HintSettings, HintStrategy},
  register::Register,
  wire::frame::MAX_REGISTER_ID,
};

/// Parses an interval given as a bare number of milliseconds or with an
/// `s` suffix for seconds, e.g. `"1500"` or `"2s"`.
pub fn parse_interval(text: &str) -> Result<u64, ConfigError> {
  let trimmed = text.trim();
  let (number, in_seconds) = match trimmed.strip_suffix(['s', 'S']) {
    Some(rest) => (rest.trim_end(), true),
    None => (trimmed, false),
  };
  let value: f64 = number
    .parse()
    .map_err(|_| ConfigError::BadInterval(text.to_string()))?;
  if !value.is_finite() || value < 0.0 {
    return Err(ConfigError::BadInterval(text.to_string()));
  }
  let millis = if in_seconds { value * 1000.0 } else { value };
  Ok(millis.round() as u64)
}

fn deserialize_interval<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<Option<u64>, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Millis(u64),
    Text(String),
  }
  match Option::<Raw>::deserialize(deserializer)? {
    None => Ok(None),
    Some(Raw::Millis(millis)) => Ok(Some(millis)),
    Some(Raw::Text(text)) => parse_interval(&text)
      .map(Some)
      .map_err(serde::de::Error::custom),
  }
}

/// Codec selection and parameters of one register.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CodecConfig {
  Number {
    #[serde(default = "default_scale")]
    scale: f64,
    #[serde(default)]
    shift: f64,
    #[serde(default)]
    decimals: u32,
  },
  Boolean,
  Binary {
    #[serde(default)]
    minlength: usize,
    #[serde(default = "default_maxlength")]
    maxlength: usize,
    #[serde(default)]
    spaces: bool,
  },
}

fn default_scale() -> f64 {
  1.0
}

fn default_maxlength() -> usize {
  usize::MAX
}

impl CodecConfig {
  /// Builds the codec this configuration describes.
  pub fn build(&self) -> Result<RegisterCodec, ConfigError> {
    match *self {
      CodecConfig::Number {
        scale,
        shift,
        decimals,
      } => {
        if !scale.is_finite() || scale == 0.0 {
          return Err(ConfigError::BadCodec(format!(
            "scale must be finite and non-zero, got {scale}"
          )));
        }
        if !shift.is_finite() {
          return Err(ConfigError::BadCodec(format!(
            "shift must be finite, got {shift}"
          )));
        }
        Ok(RegisterCodec::int(NumberCodec::new(scale, shift, decimals)))
      }
      CodecConfig::Boolean => Ok(RegisterCodec::Int(BooleanCodec::shared())),
      CodecConfig::Binary {
        minlength,
        maxlength,
        spaces,
      } => {
        if minlength > maxlength {
          return Err(ConfigError::BadCodec(format!(
            "minlength {minlength} exceeds maxlength {maxlength}"
          )));
        }
        Ok(RegisterCodec::binary(HexBinaryCodec::new(
          minlength, maxlength, spaces,
        )))
      }
    }
  }
}

/// One register entry of a collection.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegisterConfig {
  pub id: u16,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub read_only: bool,
  #[serde(default, deserialize_with = "deserialize_interval")]
  pub update_interval: Option<u64>,
  #[serde(flatten)]
  pub codec: CodecConfig,
}

/// One device's register collection.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CollectionConfig {
  /// The registry id on the GEP bus.
  pub gepid: u8,
  /// Response timeout override for all of the collection's registers.
  #[serde(default)]
  pub timeout: Option<i64>,
  /// Enables hint probing at this interval (milliseconds).
  #[serde(default)]
  pub hints: Option<i64>,
  #[serde(default)]
  pub strategy: Option<HintStrategy>,
  #[serde(default)]
  pub registers: Vec<RegisterConfig>,
}

/// A collection built from configuration.
#[derive(Debug)]
pub struct BuiltCollection {
  pub collection: Arc<RegisterCollection>,
  pub registers: Vec<Arc<Register>>,
  /// Hand this to [`AutoUpdater::use_registry_hints`](crate::AutoUpdater::use_registry_hints)
  /// to enable the configured probing.
  pub hint_settings: Option<HintSettings>,
}

impl CollectionConfig {
  /// Instantiates the collection and its registers over `gateway`.
  pub fn instantiate(&self, gateway: &Arc<Gateway>) -> Result<BuiltCollection, ConfigError> {
    if self.gepid > MAX_REGISTRY_ID {
      return Err(ConfigError::RegistryIdOutOfRange(self.gepid));
    }
    let collection = RegisterCollection::new(Arc::clone(gateway), self.gepid);

    let mut registers = Vec::with_capacity(self.registers.len());
    for register_config in &self.registers {
      if register_config.id > MAX_REGISTER_ID {
        return Err(ConfigError::RegisterIdOutOfRange(register_config.id));
      }
      let register = Register::new(
        &collection,
        register_config.id,
        register_config.read_only,
        register_config.codec.build()?,
      );
      if let Some(name) = &register_config.name {
        register.set_name(name.clone());
      }
      if let Some(description) = &register_config.description {
        register.set_description(description.clone());
      }
      match register_config.update_interval {
        Some(0) => return Err(ConfigError::BadInterval("0".to_string())),
        Some(interval) => register.set_update_interval_ms(interval),
        None => {}
      }
      if let Some(timeout) = self.timeout {
        let mut settings = register.connection_settings();
        settings.timeout = timeout;
        register.set_connection_settings(settings);
      }
      registers.push(register);
    }

    let hint_settings = match self.hints {
      None => None,
      Some(interval) if interval <= 0 => {
        return Err(ConfigError::BadInterval(interval.to_string()))
      }
      Some(interval) => {
        let mut settings = HintSettings::new(interval);
        if let Some(strategy) = self.strategy {
          settings = settings.with_strategy(strategy);
        }
        if let Some(timeout) = self.timeout {
          // non-positive collection timeouts mean "no timeout"
          settings = settings.with_timeout(timeout.max(0));
        }
        Some(settings)
      }
    };

    Ok(BuiltCollection {
      collection,
      registers,
      hint_settings,
    })
  }
}

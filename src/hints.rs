//! Change-hint probing configuration.
//!
//! Instead of blindly polling every register, a device can be probed for a
//! *change hint*: the id of a register whose value changed since the last
//! probe. The [`AutoUpdater`](crate::AutoUpdater) issues such probes per
//! collection according to these settings.

use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// Default response timeout of a hint probe, in milliseconds.
pub const DEFAULT_HINT_TIMEOUT_MS: i64 = 2000;

/// When the hint timer is advanced after a probe.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HintStrategy {
  /// Probe on a fixed period.
  Simple,
  /// Keep probing back-to-back while hints name managed registers.
  #[default]
  SemiGreedy,
  /// Keep probing back-to-back while the device names any register at all.
  Greedy,
}

impl FromStr for HintStrategy {
  type Err = ConfigError;

  /// Case-insensitive; accepts `SIMPLE`, `SEMI_GREEDY` and `GREEDY`.
  fn from_str(s: &str) -> Result<HintStrategy, ConfigError> {
    if s.eq_ignore_ascii_case("simple") {
      Ok(HintStrategy::Simple)
    } else if s.eq_ignore_ascii_case("semi_greedy") || s.eq_ignore_ascii_case("semi-greedy") {
      Ok(HintStrategy::SemiGreedy)
    } else if s.eq_ignore_ascii_case("greedy") {
      Ok(HintStrategy::Greedy)
    } else {
      Err(ConfigError::UnknownStrategy(s.to_string()))
    }
  }
}

impl<'de> Deserialize<'de> for HintStrategy {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<HintStrategy, D::Error> {
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(serde::de::Error::custom)
  }
}

/// Per-collection change-hint probing settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HintSettings {
  interval: i64,
  timeout: i64,
  strategy: HintStrategy,
}

impl HintSettings {
  /// Probing every `interval_ms` with the default timeout and strategy.
  ///
  /// # Panics
  ///
  /// Panics if `interval_ms` is not positive.
  pub fn new(interval_ms: i64) -> HintSettings {
    assert!(interval_ms > 0, "hint interval must be positive");
    HintSettings {
      interval: interval_ms,
      timeout: DEFAULT_HINT_TIMEOUT_MS,
      strategy: HintStrategy::default(),
    }
  }

  /// # Panics
  ///
  /// Panics if `timeout_ms` is negative. Zero means "no timeout".
  pub fn with_timeout(mut self, timeout_ms: i64) -> HintSettings {
    assert!(timeout_ms >= 0, "hint timeout must not be negative");
    self.timeout = timeout_ms;
    self
  }

  pub fn with_strategy(mut self, strategy: HintStrategy) -> HintSettings {
    self.strategy = strategy;
    self
  }

  pub fn interval_ms(&self) -> i64 {
    self.interval
  }

  pub fn timeout_ms(&self) -> i64 {
    self.timeout
  }

  pub fn strategy(&self) -> HintStrategy {
    self.strategy
  }
}

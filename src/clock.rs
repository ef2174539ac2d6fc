//! Millisecond time sources for interval arithmetic.
//!
//! All polling and hint scheduling in this crate measures time through the
//! [`Clock`] trait, never through the wall clock, so DST changes, leap
//! seconds and NTP adjustments cannot disturb the schedule.

use std::{
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, OnceLock,
  },
  time::Instant,
};

/// Source of millisecond timestamps.
///
/// Implementations must be monotonic: a later call never returns a smaller
/// value than an earlier one.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> u64;
}

/// The process-wide monotonic clock.
///
/// Every instance reads the same epoch, so timestamps taken through
/// different handles are directly comparable.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

static EPOCH: OnceLock<Instant> = OnceLock::new();

impl MonotonicClock {
  /// Shared handle to the process-wide clock.
  pub fn shared() -> Arc<dyn Clock> {
    Arc::new(MonotonicClock)
  }

  /// Milliseconds since the first use of the clock in this process.
  pub fn now() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
  }
}

impl Clock for MonotonicClock {
  fn now_millis(&self) -> u64 {
    MonotonicClock::now()
  }
}

/// Manually driven clock for simulations and scheduler tests.
#[derive(Debug, Default)]
pub struct ManualClock {
  millis: AtomicU64,
}

impl ManualClock {
  pub fn starting_at(millis: u64) -> ManualClock {
    ManualClock {
      millis: AtomicU64::new(millis),
    }
  }

  pub fn advance(&self, millis: u64) {
    self.millis.fetch_add(millis, Ordering::SeqCst);
  }

  pub fn set(&self, millis: u64) {
    self.millis.store(millis, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_millis(&self) -> u64 {
    self.millis.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn monotonic_clock_does_not_go_backward() {
    let clock = MonotonicClock;
    let mut previous = clock.now_millis();
    for _ in 0..1000 {
      let now = clock.now_millis();
      assert!(now >= previous);
      previous = now;
    }
  }

  #[test]
  fn manual_clock_is_driven_by_hand() {
    let clock = ManualClock::starting_at(40);
    assert_eq!(clock.now_millis(), 40);
    clock.advance(60);
    assert_eq!(clock.now_millis(), 100);
    clock.set(25);
    assert_eq!(clock.now_millis(), 25);
  }
}

//! Request counters kept per register collection.

use std::sync::Mutex;

/// Consistent counter pair produced by [`RequestStatistics::snapshot`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatisticsSnapshot {
  pub total: u64,
  pub failed: u64,
}

/// Thread-safe counters of total and failed requests.
///
/// All operations are atomic with respect to each other, so a snapshot never
/// observes a failed count larger than the total.
#[derive(Debug, Default)]
pub struct RequestStatistics {
  counters: Mutex<StatisticsSnapshot>,
}

impl RequestStatistics {
  pub fn new() -> RequestStatistics {
    RequestStatistics::default()
  }

  /// Records one finished request.
  pub fn count_request(&self, failed: bool) {
    let mut counters = self.counters.lock().unwrap();
    counters.total += 1;
    if failed {
      counters.failed += 1;
    }
  }

  pub fn reset(&self) {
    *self.counters.lock().unwrap() = StatisticsSnapshot::default();
  }

  pub fn total(&self) -> u64 {
    self.counters.lock().unwrap().total
  }

  pub fn failed(&self) -> u64 {
    self.counters.lock().unwrap().failed
  }

  pub fn snapshot(&self) -> StatisticsSnapshot {
    *self.counters.lock().unwrap()
  }
}

//! Local mirror of one remote register.

use std::{
  fmt,
  sync::{Arc, Mutex},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  clock::{Clock, MonotonicClock},
  codec::RegisterCodec,
  collection::RegisterCollection,
  error::RegisterError,
  value::Value,
  wire::frame::MAX_REGISTER_ID,
};

/// Poll interval a fresh register starts with.
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 1000;

/// Per-register transfer settings.
///
/// `timeout` ≤ 0 disables the response timeout; `retry_read_after` ≤ 0
/// disables the shortened retry interval after a failed read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConnectionSettings {
  /// Response timeout in milliseconds.
  pub timeout: i64,
  /// Retry interval in milliseconds while reads are failing.
  pub retry_read_after: i64,
  /// Consecutive failures after which the cached value is invalidated.
  pub attempts_to_promote_read_fail: u32,
  /// Growth factor applied to the retry interval per consecutive failure.
  pub retry_read_after_factor: f64,
}

impl Default for ConnectionSettings {
  fn default() -> ConnectionSettings {
    ConnectionSettings {
      timeout: 2000,
      retry_read_after: 250,
      attempts_to_promote_read_fail: 2,
      retry_read_after_factor: 2.0,
    }
  }
}

impl ConnectionSettings {
  /// # Panics
  ///
  /// Panics if `attempts_to_promote_read_fail` is zero or
  /// `retry_read_after_factor` is below 1.
  pub fn new(
    timeout: i64,
    retry_read_after: i64,
    attempts_to_promote_read_fail: u32,
    retry_read_after_factor: f64,
  ) -> ConnectionSettings {
    let settings = ConnectionSettings {
      timeout,
      retry_read_after,
      attempts_to_promote_read_fail,
      retry_read_after_factor,
    };
    settings.validate();
    settings
  }

  fn validate(&self) {
    assert!(
      self.attempts_to_promote_read_fail >= 1,
      "attempts_to_promote_read_fail must be at least 1"
    );
    assert!(
      self.retry_read_after_factor >= 1.0,
      "retry_read_after_factor must be at least 1"
    );
  }
}

/// Change notification callback. Invoked on the thread that observed the
/// change, after the register's lock has been released, so the callback may
/// use the register API freely.
pub type ChangeListener = Arc<dyn Fn(&Register) + Send + Sync>;

struct RegisterState {
  name: String,
  description: String,
  value: Option<Value>,
  last_valid_value: Option<Value>,
  update_interval: u64,
  connection: ConnectionSettings,
  update_time: Option<u64>,
  read_fails_in_row: u32,
  listener: Option<ChangeListener>,
}

/// Local mirror of one remote register: the cached value, the polling
/// state, and the change listener.
///
/// [`update_value`](Register::update_value) never fails: transport and
/// decode problems only advance the failure counter, and after
/// `attempts_to_promote_read_fail` consecutive misses the cached value
/// flips to invalid (`None`). The most recent valid value survives in
/// [`last_valid_value`](Register::last_valid_value).
pub struct Register {
  collection: Arc<RegisterCollection>,
  register_id: u16,
  read_only: bool,
  codec: RegisterCodec,
  clock: Arc<dyn Clock>,
  state: Mutex<RegisterState>,
}

impl fmt::Debug for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Register")
      .field("register_id", &self.register_id)
      .field("registry_id", &self.collection.registry_id())
      .field("read_only", &self.read_only)
      .finish_non_exhaustive()
  }
}

impl Register {
  /// # Panics
  ///
  /// Panics if `register_id` exceeds [`MAX_REGISTER_ID`].
  pub fn new(
    collection: &Arc<RegisterCollection>,
    register_id: u16,
    read_only: bool,
    codec: RegisterCodec,
  ) -> Arc<Register> {
    Register::with_clock(
      collection,
      register_id,
      read_only,
      codec,
      MonotonicClock::shared(),
    )
  }

  /// Like [`Register::new`] with an explicit time source, for simulations
  /// and tests.
  pub fn with_clock(
    collection: &Arc<RegisterCollection>,
    register_id: u16,
    read_only: bool,
    codec: RegisterCodec,
    clock: Arc<dyn Clock>,
  ) -> Arc<Register> {
    assert!(
      register_id <= MAX_REGISTER_ID,
      "register id {register_id} out of range"
    );
    Arc::new(Register {
      collection: Arc::clone(collection),
      register_id,
      read_only,
      codec,
      clock,
      state: Mutex::new(RegisterState {
        name: String::new(),
        description: String::new(),
        value: None,
        last_valid_value: None,
        update_interval: DEFAULT_UPDATE_INTERVAL_MS,
        connection: ConnectionSettings::default(),
        update_time: None,
        read_fails_in_row: 0,
        listener: None,
      }),
    })
  }

  pub fn register_id(&self) -> u16 {
    self.register_id
  }

  pub fn is_read_only(&self) -> bool {
    self.read_only
  }

  pub fn codec(&self) -> &RegisterCodec {
    &self.codec
  }

  pub fn collection(&self) -> &Arc<RegisterCollection> {
    &self.collection
  }

  pub fn name(&self) -> String {
    self.state.lock().unwrap().name.clone()
  }

  pub fn set_name(&self, name: impl Into<String>) {
    self.state.lock().unwrap().name = name.into();
  }

  pub fn description(&self) -> String {
    self.state.lock().unwrap().description.clone()
  }

  pub fn set_description(&self, description: impl Into<String>) {
    self.state.lock().unwrap().description = description.into();
  }

  /// The cached value, or `None` while it is invalid.
  pub fn value(&self) -> Option<Value> {
    self.state.lock().unwrap().value.clone()
  }

  /// The most recent valid value ever observed; survives invalidation.
  pub fn last_valid_value(&self) -> Option<Value> {
    self.state.lock().unwrap().last_valid_value.clone()
  }

  pub fn read_fails_in_row(&self) -> u32 {
    self.state.lock().unwrap().read_fails_in_row
  }

  /// Timestamp of the last poll attempt (successful or not), or `None` if
  /// the register was never polled.
  pub fn update_time_millis(&self) -> Option<u64> {
    self.state.lock().unwrap().update_time
  }

  pub fn update_interval_ms(&self) -> u64 {
    self.state.lock().unwrap().update_interval
  }

  /// # Panics
  ///
  /// Panics if `interval_ms` is zero.
  pub fn set_update_interval_ms(&self, interval_ms: u64) {
    assert!(interval_ms > 0, "update interval must be positive");
    self.state.lock().unwrap().update_interval = interval_ms;
  }

  pub fn connection_settings(&self) -> ConnectionSettings {
    self.state.lock().unwrap().connection
  }

  pub fn set_connection_settings(&self, settings: ConnectionSettings) {
    settings.validate();
    self.state.lock().unwrap().connection = settings;
  }

  /// Installs or clears the change listener. At most one listener exists
  /// per register.
  pub fn set_change_listener(&self, listener: Option<ChangeListener>) {
    self.state.lock().unwrap().listener = listener;
  }

  /// Milliseconds until the next poll is due; zero means due now. While
  /// reads are failing, the wait is shortened to
  /// `retry_read_after · factor^(fails-1)`, never beyond the regular
  /// update interval.
  pub fn millis_to_next_update(&self) -> u64 {
    let state = self.state.lock().unwrap();
    let Some(last) = state.update_time else {
      return 0;
    };
    let now = self.clock.now_millis();
    if now < last {
      // the clock jumped backward; poll immediately
      return 0;
    }
    Register::effective_interval(&state).saturating_sub(now - last)
  }

  fn effective_interval(state: &RegisterState) -> u64 {
    let interval = state.update_interval;
    let retry = state.connection.retry_read_after;
    if state.read_fails_in_row == 0 || retry <= 0 {
      return interval;
    }
    let mut backoff = retry as f64;
    for _ in 1..state.read_fails_in_row {
      if backoff >= interval as f64 {
        break;
      }
      backoff *= state.connection.retry_read_after_factor;
    }
    (backoff as u64).min(interval)
  }

  /// Polls the device and refreshes the cached value.
  ///
  /// Never fails: a transport error or a codec rejection only increments
  /// the failure counter. The change listener fires when the observed
  /// value differs from the cached one, and once when the value is
  /// invalidated after too many failures.
  pub fn update_value(&self) {
    let timeout = self.state.lock().unwrap().connection.timeout;
    let read = self.read_current(timeout);
    let now = self.clock.now_millis();

    let notify = {
      let mut state = self.state.lock().unwrap();
      state.update_time = Some(now);
      match read {
        Some(new_value) => {
          state.read_fails_in_row = 0;
          let changed = state.value.as_ref() != Some(&new_value);
          state.last_valid_value = Some(new_value.clone());
          state.value = Some(new_value);
          changed.then(|| state.listener.clone()).flatten()
        }
        None => {
          state.read_fails_in_row += 1;
          if state.read_fails_in_row >= state.connection.attempts_to_promote_read_fail
            && state.value.is_some()
          {
            debug!(
              "register {}: invalidating value after {} failed reads",
              self.register_id, state.read_fails_in_row
            );
            state.value = None;
            state.listener.clone()
          } else {
            None
          }
        }
      }
    };
    if let Some(listener) = notify {
      listener(self);
    }
  }

  fn read_current(&self, timeout_ms: i64) -> Option<Value> {
    match &self.codec {
      RegisterCodec::Int(codec) => {
        match self.collection.read_int(self.register_id, timeout_ms) {
          Ok(wire) => {
            let decoded = codec.decode_int(wire);
            if decoded.is_none() {
              debug!(
                "register {}: codec rejected wire value {wire}",
                self.register_id
              );
            }
            decoded
          }
          Err(e) => {
            debug!("register {}: read failed: {e}", self.register_id);
            None
          }
        }
      }
      RegisterCodec::Binary(codec) => {
        match self.collection.read_binary(self.register_id, timeout_ms) {
          Ok(wire) => {
            let decoded = codec.decode_binary(&wire);
            if decoded.is_none() {
              debug!(
                "register {}: codec rejected {} wire bytes",
                self.register_id,
                wire.len()
              );
            }
            decoded
          }
          Err(e) => {
            debug!("register {}: read failed: {e}", self.register_id);
            None
          }
        }
      }
    }
  }

  /// Writes `value` to the device, then refreshes the cached view with a
  /// poll regardless of the write's outcome, so the cache reflects what
  /// the device actually holds.
  pub fn set_value(&self, value: &Value) -> Result<(), RegisterError> {
    let result = self.write_value(value);
    if let Err(e) = &result {
      debug!("register {}: write failed: {e}", self.register_id);
    }
    self.update_value();
    result
  }

  fn write_value(&self, value: &Value) -> Result<(), RegisterError> {
    if self.read_only {
      return Err(RegisterError::ReadOnly);
    }
    let timeout = self.state.lock().unwrap().connection.timeout;
    match &self.codec {
      RegisterCodec::Int(codec) => {
        let wire = codec
          .encode_int(value)
          .map_err(|source| RegisterError::Encode {
            register_id: self.register_id,
            source,
          })?;
        self
          .collection
          .write_int(self.register_id, wire, timeout)
          .map_err(|source| RegisterError::Write {
            register_id: self.register_id,
            source,
          })
      }
      RegisterCodec::Binary(codec) => {
        let wire = codec
          .encode_binary(value)
          .map_err(|source| RegisterError::Encode {
            register_id: self.register_id,
            source,
          })?;
        self
          .collection
          .write_binary(self.register_id, &wire, timeout)
          .map_err(|source| RegisterError::Write {
            register_id: self.register_id,
            source,
          })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

  use super::*;
  use crate::{
    clock::ManualClock,
    codec::{HexBinaryCodec, NumberCodec},
    collection::RegisterCollection,
    gateway::Gateway,
    messenger::testing::{Reply, ScriptedMessenger},
  };

  struct Fixture {
    register: Arc<Register>,
    clock: Arc<ManualClock>,
    messenger: Arc<ScriptedMessenger>,
    device_value: Arc<AtomicI64>,
    failing: Arc<AtomicI64>,
  }

  /// A number register over a scripted device whose value and availability
  /// the test controls.
  fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let device_value = Arc::new(AtomicI64::new(0));
    let failing = Arc::new(AtomicI64::new(0));
    let messenger = {
      let device_value = Arc::clone(&device_value);
      let failing = Arc::clone(&failing);
      ScriptedMessenger::new(move |_, request| {
        if failing.load(Ordering::SeqCst) != 0 {
          return Reply::status(0x00);
        }
        match request[0] {
          0x01 => Reply::ok_int(device_value.load(Ordering::SeqCst) as i32),
          0x02 => {
            let (value, _) = crate::wire::varint::decode(&request[2..]).unwrap();
            device_value.store(i64::from(value), Ordering::SeqCst);
            Reply::status(0x01)
          }
          _ => Reply::status(0x00),
        }
      })
    };
    let gateway = Gateway::new(messenger.clone());
    gateway.start().unwrap();
    let collection = RegisterCollection::new(gateway, 1);
    let clock = Arc::new(ManualClock::starting_at(0));
    let register = Register::with_clock(
      &collection,
      7,
      false,
      RegisterCodec::int(NumberCodec::default()),
      clock.clone() as Arc<dyn Clock>,
    );
    Fixture {
      register,
      clock,
      messenger,
      device_value,
      failing,
    }
  }

  fn listener_counter(register: &Register) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    register.set_change_listener(Some(Arc::new(move |_| {
      seen.fetch_add(1, Ordering::SeqCst);
    })));
    count
  }

  #[test]
  fn never_polled_register_is_due_immediately() {
    let f = fixture();
    assert_eq!(f.register.millis_to_next_update(), 0);
    assert_eq!(f.register.value(), None);
  }

  #[test]
  fn poll_schedule_counts_down_to_the_interval() {
    let f = fixture();
    f.device_value.store(42, Ordering::SeqCst);
    f.register.update_value();
    assert_eq!(f.register.value(), Some(Value::Number(42.0)));
    assert_eq!(f.register.update_time_millis(), Some(0));
    assert_eq!(f.register.millis_to_next_update(), 1000);
    f.clock.advance(500);
    assert_eq!(f.register.millis_to_next_update(), 500);
    f.clock.advance(500);
    assert_eq!(f.register.millis_to_next_update(), 0);
  }

  #[test]
  fn listener_fires_only_on_change() {
    let f = fixture();
    let changes = listener_counter(&f.register);
    f.register.update_value();
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    f.register.update_value();
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    f.device_value.store(5, Ordering::SeqCst);
    f.register.update_value();
    assert_eq!(changes.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn backoff_shortens_the_wait_and_promotes_to_invalid() {
    let f = fixture();
    f.register.set_update_interval_ms(5000);
    f.register.set_connection_settings(ConnectionSettings::new(2000, 100, 3, 2.0));
    f.register.update_value();
    assert_eq!(f.register.value(), Some(Value::Number(0.0)));
    let changes = listener_counter(&f.register);

    f.failing.store(1, Ordering::SeqCst);
    f.clock.set(0);
    f.register.update_value();
    assert_eq!(f.register.read_fails_in_row(), 1);
    assert_eq!(f.register.millis_to_next_update(), 100);
    assert_eq!(f.register.value(), Some(Value::Number(0.0)));

    f.clock.set(100);
    f.register.update_value();
    assert_eq!(f.register.read_fails_in_row(), 2);
    assert_eq!(f.register.millis_to_next_update(), 200);

    f.clock.set(300);
    f.register.update_value();
    assert_eq!(f.register.read_fails_in_row(), 3);
    assert_eq!(f.register.value(), None);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(f.register.last_valid_value(), Some(Value::Number(0.0)));

    // still invalid: no further notification
    f.clock.set(700);
    f.register.update_value();
    assert_eq!(changes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn backoff_never_exceeds_the_update_interval() {
    let f = fixture();
    f.register.set_update_interval_ms(300);
    f.register.set_connection_settings(ConnectionSettings::new(2000, 100, 10, 2.0));
    f.failing.store(1, Ordering::SeqCst);
    for _ in 0..6 {
      f.register.update_value();
    }
    assert_eq!(f.register.read_fails_in_row(), 6);
    // 100 · 2^5 would be 3200, but the wait is capped at the interval
    assert_eq!(f.register.millis_to_next_update(), 300);
  }

  #[test]
  fn recovery_resets_the_failure_counter() {
    let f = fixture();
    f.failing.store(1, Ordering::SeqCst);
    f.register.update_value();
    assert_eq!(f.register.read_fails_in_row(), 1);
    f.failing.store(0, Ordering::SeqCst);
    f.register.update_value();
    assert_eq!(f.register.read_fails_in_row(), 0);
    assert!(f.register.value().is_some());
  }

  #[test]
  fn clock_jumping_backward_makes_the_poll_due() {
    let f = fixture();
    f.clock.set(5000);
    f.register.update_value();
    f.clock.set(1000);
    assert_eq!(f.register.millis_to_next_update(), 0);
  }

  #[test]
  fn set_value_writes_and_refreshes() {
    let f = fixture();
    let changes = listener_counter(&f.register);
    f.register.set_value(&Value::Number(64.0)).unwrap();
    assert_eq!(f.device_value.load(Ordering::SeqCst), 64);
    assert_eq!(f.register.value(), Some(Value::Number(64.0)));
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    // write request followed by the refreshing read
    let opcodes: Vec<u8> = f.messenger.sent_payloads().iter().map(|p| p[0]).collect();
    assert_eq!(opcodes, vec![0x02, 0x01]);
  }

  #[test]
  fn set_value_surfaces_the_device_view_when_it_differs() {
    // the device acknowledges the write but actually holds another value
    let messenger = ScriptedMessenger::new(|_, request| match request[0] {
      0x01 => Reply::ok_int(7),
      0x02 => Reply::status(0x01),
      _ => Reply::status(0x00),
    });
    let gateway = Gateway::new(messenger);
    gateway.start().unwrap();
    let collection = RegisterCollection::new(gateway, 1);
    let register = Register::new(
      &collection,
      5,
      false,
      RegisterCodec::int(NumberCodec::default()),
    );
    let changes = listener_counter(&register);
    register.set_value(&Value::Number(10.0)).unwrap();
    assert_eq!(register.value(), Some(Value::Number(7.0)));
    assert_eq!(changes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn set_value_on_read_only_register_is_rejected() {
    let f = fixture();
    let collection = Arc::clone(f.register.collection());
    let read_only = Register::with_clock(
      &collection,
      8,
      true,
      RegisterCodec::int(NumberCodec::default()),
      f.clock.clone() as Arc<dyn Clock>,
    );
    assert!(matches!(
      read_only.set_value(&Value::Number(1.0)),
      Err(RegisterError::ReadOnly)
    ));
  }

  #[test]
  fn failed_write_still_refreshes_the_cache() {
    let f = fixture();
    f.device_value.store(3, Ordering::SeqCst);
    f.register.update_value();

    // the write is rejected but the follow-up read succeeds
    let result = {
      let bad = Value::Text("not a number".to_string());
      f.register.set_value(&bad)
    };
    assert!(matches!(result, Err(RegisterError::Encode { .. })));
    assert_eq!(f.register.value(), Some(Value::Number(3.0)));
  }

  #[test]
  fn decode_rejection_counts_as_a_read_failure() {
    // length-bounded binary codec rejects the two-byte payload
    let messenger = ScriptedMessenger::new(|_, _| Reply::ok(&[0xAB, 0xCD]));
    let gateway = Gateway::new(messenger);
    gateway.start().unwrap();
    let collection = RegisterCollection::new(gateway, 2);
    let register = Register::new(
      &collection,
      9,
      false,
      RegisterCodec::binary(HexBinaryCodec::new(4, 8, false)),
    );
    register.update_value();
    assert_eq!(register.read_fails_in_row(), 1);
    assert_eq!(register.value(), None);
  }

  #[test]
  fn listener_runs_outside_the_register_lock() {
    let f = fixture();
    let observed = Arc::new(Mutex::new(None));
    let into = Arc::clone(&observed);
    f.register.set_change_listener(Some(Arc::new(move |register| {
      // re-entering the register API here must not deadlock
      *into.lock().unwrap() = register.value();
    })));
    f.device_value.store(11, Ordering::SeqCst);
    f.register.update_value();
    assert_eq!(*observed.lock().unwrap(), Some(Value::Number(11.0)));
  }

  #[test]
  fn getters_report_metadata() {
    let f = fixture();
    f.register.set_name("boiler temperature");
    f.register.set_description("hot side, tenths of a degree");
    assert_eq!(f.register.name(), "boiler temperature");
    assert_eq!(f.register.description(), "hot side, tenths of a degree");
    assert_eq!(f.register.register_id(), 7);
    assert!(!f.register.is_read_only());
  }
}

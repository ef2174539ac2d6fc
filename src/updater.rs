//! Background scheduler that keeps a set of registers fresh.

use std::{
  sync::{Arc, Condvar, Mutex, Weak},
  thread,
  time::Duration,
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{
  clock::{Clock, MonotonicClock},
  collection::RegisterCollection,
  hints::{HintSettings, HintStrategy},
  register::Register,
  wire::frame::MAX_REGISTER_ID,
};

/// Upper bound on one idle wait of the update task, so membership changes,
/// disabled hints and dead collections are noticed even without a
/// notification.
const MAX_IDLE_WAIT_MS: u64 = 100;

/// Scheduler state kept per register collection.
struct CollectionState {
  /// Weak on purpose: the updater must not keep a dropped collection
  /// alive. A dead reference is pruned on the next pass.
  collection: Weak<RegisterCollection>,
  registers: Vec<Arc<Register>>,
  hints: Option<HintSettings>,
  last_hint_time: Option<u64>,
  /// A hint id that did not belong to a managed register; the next probe
  /// confirms it so the device can move on.
  unconfirmed_register_id: Option<u16>,
}

struct UpdaterState {
  registers: Vec<Arc<Register>>,
  collections: Vec<CollectionState>,
  /// Identity of the task currently allowed to run the loop. A task that
  /// finds another id here exits; `None` stops the loop entirely.
  active_task: Option<u64>,
  task_seq: u64,
}

struct Inner {
  state: Mutex<UpdaterState>,
  wakeup: Condvar,
  clock: Arc<dyn Clock>,
}

/// A hint probe snapshot, taken under the lock, executed outside it.
struct HintProbe {
  collection: Arc<RegisterCollection>,
  confirmed: Option<u16>,
  timeout: i64,
  strategy: HintStrategy,
}

/// Single background task that calls
/// [`Register::update_value`] on managed registers when their interval (or
/// failure backoff) says so, and probes their collections for change hints.
///
/// The updater holds only weak references to register collections, so
/// dropping a collection (once its registers are removed here) lets it be
/// reclaimed; the task notices and prunes the leftover state.
pub struct AutoUpdater {
  inner: Arc<Inner>,
}

impl Default for AutoUpdater {
  fn default() -> AutoUpdater {
    AutoUpdater::new()
  }
}

impl AutoUpdater {
  pub fn new() -> AutoUpdater {
    AutoUpdater::with_clock(MonotonicClock::shared())
  }

  /// Like [`AutoUpdater::new`] with an explicit time source, for
  /// simulations and tests.
  pub fn with_clock(clock: Arc<dyn Clock>) -> AutoUpdater {
    AutoUpdater {
      inner: Arc::new(Inner {
        state: Mutex::new(UpdaterState {
          registers: Vec::new(),
          collections: Vec::new(),
          active_task: None,
          task_seq: 0,
        }),
        wakeup: Condvar::new(),
        clock,
      }),
    }
  }

  /// Adds registers to the managed set and makes sure the update task is
  /// running. Registers already managed are left alone.
  pub fn add_registers(&self, registers: &[Arc<Register>]) {
    let mut state = self.inner.state.lock().unwrap();
    let mut added = false;
    for register in registers {
      if state.registers.iter().any(|r| Arc::ptr_eq(r, register)) {
        continue;
      }
      state.registers.push(Arc::clone(register));
      let cs = state_for_collection(&mut state.collections, register.collection());
      cs.registers.push(Arc::clone(register));
      added = true;
    }
    if added {
      self.ensure_task(&mut state);
      self.inner.wakeup.notify_all();
    }
  }

  pub fn add_register(&self, register: &Arc<Register>) {
    self.add_registers(std::slice::from_ref(register));
  }

  /// Removes registers from the managed set. When nothing is left to
  /// manage, the update task stops.
  pub fn remove_registers(&self, registers: &[Arc<Register>]) {
    let mut state = self.inner.state.lock().unwrap();
    for register in registers {
      state.registers.retain(|r| !Arc::ptr_eq(r, register));
      for cs in &mut state.collections {
        cs.registers.retain(|r| !Arc::ptr_eq(r, register));
      }
    }
    state
      .collections
      .retain(|cs| !cs.registers.is_empty() || cs.hints.is_some());
    if state.registers.is_empty() {
      state.active_task = None;
    }
    self.inner.wakeup.notify_all();
  }

  pub fn remove_register(&self, register: &Arc<Register>) {
    self.remove_registers(std::slice::from_ref(register));
  }

  pub fn remove_all_registers(&self) {
    let mut state = self.inner.state.lock().unwrap();
    state.registers.clear();
    for cs in &mut state.collections {
      cs.registers.clear();
    }
    state.collections.retain(|cs| cs.hints.is_some());
    state.active_task = None;
    self.inner.wakeup.notify_all();
  }

  /// Configures change-hint probing for `collection`. Settings are copied;
  /// later changes to the caller's value have no effect.
  pub fn use_registry_hints(&self, collection: &Arc<RegisterCollection>, settings: HintSettings) {
    let mut state = self.inner.state.lock().unwrap();
    let cs = state_for_collection(&mut state.collections, collection);
    cs.hints = Some(settings);
    cs.last_hint_time = None;
    cs.unconfirmed_register_id = None;
    self.inner.wakeup.notify_all();
  }

  /// Stops change-hint probing for `collection`.
  pub fn disable_registry_hints(&self, collection: &Arc<RegisterCollection>) {
    let mut state = self.inner.state.lock().unwrap();
    let key = Arc::downgrade(collection);
    if let Some(index) = state
      .collections
      .iter()
      .position(|cs| cs.collection.ptr_eq(&key))
    {
      state.collections[index].hints = None;
      state.collections[index].unconfirmed_register_id = None;
      if state.collections[index].registers.is_empty() {
        state.collections.remove(index);
      }
    }
    self.inner.wakeup.notify_all();
  }

  fn ensure_task(&self, state: &mut UpdaterState) {
    if state.active_task.is_some() {
      return;
    }
    state.task_seq += 1;
    let task_id = state.task_seq;
    state.active_task = Some(task_id);
    let inner = Arc::clone(&self.inner);
    let spawned = thread::Builder::new()
      .name("gep-register-updater".to_string())
      .spawn(move || run_update_task(&inner, task_id));
    if let Err(e) = spawned {
      error!("failed to spawn the update task: {e}");
      state.active_task = None;
    }
  }
}

impl Drop for AutoUpdater {
  fn drop(&mut self) {
    let mut state = self.inner.state.lock().unwrap();
    state.active_task = None;
    self.inner.wakeup.notify_all();
  }
}

fn state_for_collection<'a>(
  collections: &'a mut Vec<CollectionState>,
  collection: &Arc<RegisterCollection>,
) -> &'a mut CollectionState {
  let key = Arc::downgrade(collection);
  match collections.iter().position(|cs| cs.collection.ptr_eq(&key)) {
    Some(index) => &mut collections[index],
    None => {
      collections.push(CollectionState {
        collection: key,
        registers: Vec::new(),
        hints: None,
        last_hint_time: None,
        unconfirmed_register_id: None,
      });
      collections.last_mut().unwrap()
    }
  }
}

fn run_update_task(inner: &Inner, task_id: u64) {
  debug!("update task {task_id} started");
  while run_update_pass(inner, task_id) {}
  debug!("update task {task_id} stopped");
}

/// One pass of the update loop: find due registers and due hint probes,
/// run the probes and the updates with the state lock released, or sleep
/// until something becomes due. Returns false once this task has been
/// replaced or stopped.
fn run_update_pass(inner: &Inner, task_id: u64) -> bool {
  let mut state = inner.state.lock().unwrap();
  if state.active_task != Some(task_id) {
    return false;
  }

  // prune state of collections whose owner dropped them
  state.collections.retain(|cs| {
    let alive = cs.collection.strong_count() > 0;
    if !alive {
      debug!("pruning state of a dropped register collection");
    }
    alive
  });

  let now = inner.clock.now_millis();
  let mut expired: Vec<Arc<Register>> = Vec::new();
  let mut next_due = u64::MAX;
  for register in &state.registers {
    match register.millis_to_next_update() {
      0 => expired.push(Arc::clone(register)),
      remaining => next_due = next_due.min(remaining),
    }
  }

  let mut probes: Vec<HintProbe> = Vec::new();
  for cs in &mut state.collections {
    let Some(hints) = cs.hints else { continue };
    if cs.registers.is_empty() {
      continue;
    }
    let interval = hints.interval_ms().max(0) as u64;
    let elapsed = match cs.last_hint_time {
      None => interval, // never probed: due now
      Some(last) => now.saturating_sub(last),
    };
    if elapsed >= interval {
      match cs.collection.upgrade() {
        Some(collection) => probes.push(HintProbe {
          collection,
          confirmed: cs.unconfirmed_register_id.take(),
          timeout: hints.timeout_ms(),
          strategy: hints.strategy(),
        }),
        None => {
          info!("register collection gone, disabling its change hints");
          cs.hints = None;
        }
      }
    } else {
      next_due = next_due.min(interval - elapsed);
    }
  }

  if expired.is_empty() && probes.is_empty() {
    let wait = next_due.min(MAX_IDLE_WAIT_MS);
    let _ = inner
      .wakeup
      .wait_timeout(state, Duration::from_millis(wait))
      .unwrap();
    return true;
  }

  drop(state);

  for probe in probes {
    let hint = match probe
      .collection
      .get_change_hint_id(probe.confirmed, probe.timeout)
    {
      Ok(id) if (0..=i32::from(MAX_REGISTER_ID)).contains(&id) => Some(id as u16),
      Ok(_) => None,
      Err(e) => {
        debug!("change-hint probe failed: {e}");
        None
      }
    };

    let mut state = inner.state.lock().unwrap();
    if state.active_task != Some(task_id) {
      return false;
    }
    let key = Arc::downgrade(&probe.collection);
    if let Some(cs) = state
      .collections
      .iter_mut()
      .find(|cs| cs.collection.ptr_eq(&key))
    {
      let mut hint_for_managed = false;
      if let Some(id) = hint {
        let matched: Vec<Arc<Register>> = cs
          .registers
          .iter()
          .filter(|r| r.register_id() == id)
          .cloned()
          .collect();
        if matched.is_empty() {
          cs.unconfirmed_register_id = Some(id);
        } else {
          trace!("change hint names managed register {id}");
          hint_for_managed = true;
          for register in matched {
            if !expired.iter().any(|r| Arc::ptr_eq(r, &register)) {
              expired.push(register);
            }
          }
        }
      }
      let advance = match probe.strategy {
        HintStrategy::Simple => true,
        HintStrategy::SemiGreedy => !hint_for_managed,
        HintStrategy::Greedy => hint.is_none(),
      };
      if advance {
        cs.last_hint_time = Some(inner.clock.now_millis());
      }
    }
  }

  for register in expired {
    // somebody may have removed the register while the lock was released
    let still_managed = {
      let state = inner.state.lock().unwrap();
      if state.active_task != Some(task_id) {
        return false;
      }
      state.registers.iter().any(|r| Arc::ptr_eq(r, &register))
    };
    if still_managed {
      register.update_value();
    }
  }
  true
}

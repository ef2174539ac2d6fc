//! The request/response engine over one messenger.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, Weak,
  },
  time::{Duration, Instant},
};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use bytes::Bytes;

use crate::{
  error::{GatewayError, WireError},
  messenger::Messenger,
  wire::{frame, varint},
};

/// Tags cycle through `0..TAG_MODULUS`. Tags are only compared against the
/// single open request, so the small space is sufficient; see the note on
/// [`Gateway`] about wrap-around.
const TAG_MODULUS: u32 = 1000;

#[derive(Debug)]
struct RequestSlot {
  tag_counter: u32,
  open_tag: Option<u32>,
  response: Option<Bytes>,
}

/// Client-side engine owning one messenger and serializing all
/// request/response traffic over it.
///
/// At most one request is in flight at any time: callers queue on a
/// serial-order lock for the whole request/response cycle, which keeps the
/// device-side protocol logic trivially half-duplex. Responses are matched
/// to the open request by tag and anything else is dropped, so a reply to a
/// request that already timed out cannot be misattributed to a later one.
/// The one tolerated exception: a reply that stays queued in the transport
/// for a full cycle of the tag counter (1000 requests) could coincide with
/// a fresh tag and be accepted.
pub struct Gateway {
  messenger: Arc<dyn Messenger>,
  /// Handle to hand out to the messenger callback without keeping the
  /// gateway alive through its own messenger.
  weak_self: Weak<Gateway>,
  serial_lock: Mutex<()>,
  slot: Mutex<RequestSlot>,
  response_cond: Condvar,
  running: AtomicBool,
}

impl std::fmt::Debug for Gateway {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Gateway")
      .field("running", &self.running.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl Gateway {
  /// Creates a gateway over `messenger`. Call [`start`](Gateway::start)
  /// before issuing requests.
  pub fn new(messenger: Arc<dyn Messenger>) -> Arc<Gateway> {
    Arc::new_cyclic(|weak_self| Gateway {
      messenger,
      weak_self: weak_self.clone(),
      serial_lock: Mutex::new(()),
      slot: Mutex::new(RequestSlot {
        tag_counter: 0,
        open_tag: None,
        response: None,
      }),
      response_cond: Condvar::new(),
      running: AtomicBool::new(false),
    })
  }

  /// Opens the messenger and starts accepting requests.
  pub fn start(&self) -> Result<(), GatewayError> {
    let weak = self.weak_self.clone();
    self.messenger.set_handler(Some(Box::new(move |tag, payload| {
      if let Some(gateway) = weak.upgrade() {
        gateway.on_message(tag, payload);
      }
    })));
    if let Err(e) = self.messenger.open() {
      self.messenger.set_handler(None);
      return Err(GatewayError::Transport(e));
    }
    self.running.store(true, Ordering::SeqCst);
    info!("gateway started");
    Ok(())
  }

  /// Stops the messenger. A request currently waiting for its response
  /// fails with [`GatewayError::Interrupted`]. With `wait` set, blocks
  /// until the messenger's receive task has stopped.
  pub fn stop(&self, wait: bool) {
    {
      let _slot = self.slot.lock().unwrap();
      self.running.store(false, Ordering::SeqCst);
      self.response_cond.notify_all();
    }
    self.messenger.close(wait);
    self.messenger.set_handler(None);
    info!("gateway stopped");
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Delivery callback from the messenger's receive task. Must not block on
  /// user code, and does not: it only stores the payload and wakes the
  /// waiting caller.
  fn on_message(&self, tag: u32, payload: Bytes) {
    let mut slot = self.slot.lock().unwrap();
    match slot.open_tag {
      Some(open) if open == tag && slot.response.is_none() => {
        slot.response = Some(payload);
        self.response_cond.notify_all();
      }
      _ => trace!("dropping message with tag {tag}: no matching open request"),
    }
  }

  /// Sends `payload` to registry `dest_id` and waits for the matching
  /// response. Returns `None` when nothing arrived within `timeout_ms`
  /// (a non-positive timeout waits without limit).
  fn send_request(
    &self,
    dest_id: u8,
    payload: &[u8],
    timeout_ms: i64,
  ) -> Result<Option<Bytes>, GatewayError> {
    let _serial = self.serial_lock.lock().unwrap();
    if !self.is_running() {
      return Err(GatewayError::NotRunning);
    }

    let tag = {
      let mut slot = self.slot.lock().unwrap();
      slot.tag_counter = (slot.tag_counter + 1) % TAG_MODULUS;
      slot.open_tag = Some(slot.tag_counter);
      slot.response = None;
      slot.tag_counter
    };

    trace!(
      "request to registry {dest_id}, tag {tag}, {} bytes",
      payload.len()
    );
    if let Err(e) = self.messenger.send(dest_id, tag, payload) {
      let mut slot = self.slot.lock().unwrap();
      slot.open_tag = None;
      slot.response = None;
      return Err(GatewayError::Transport(e));
    }

    let deadline =
      (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));
    let mut slot = self.slot.lock().unwrap();
    let result = loop {
      if slot.response.is_some() {
        break Ok(slot.response.take());
      }
      if !self.is_running() {
        break Err(GatewayError::Interrupted);
      }
      match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            break Ok(None);
          }
          let (guard, _) = self
            .response_cond
            .wait_timeout(slot, deadline - now)
            .unwrap();
          slot = guard;
        }
        None => {
          slot = self.response_cond.wait(slot).unwrap();
        }
      }
    };
    slot.open_tag = None;
    slot.response = None;
    result
  }

  /// One request/response exchange with the status byte checked; returns
  /// the payload after the status.
  fn exchange(
    &self,
    dest_id: u8,
    request: Vec<u8>,
    timeout_ms: i64,
  ) -> Result<Bytes, GatewayError> {
    match self.send_request(dest_id, &request, timeout_ms)? {
      None => {
        debug!("no response from registry {dest_id}");
        Err(GatewayError::NoResponse {
          registry_id: dest_id,
        })
      }
      Some(response) => {
        let status = *response.first().ok_or(WireError::Truncated)?;
        if status != frame::STATUS_OK {
          debug!("registry {dest_id} answered with status {status:#04x}");
          return Err(GatewayError::RequestFailed {
            registry_id: dest_id,
            status,
          });
        }
        Ok(response.slice(1..))
      }
    }
  }

  fn check_register_id(register_id: u16) -> Result<(), GatewayError> {
    if register_id > frame::MAX_REGISTER_ID {
      return Err(GatewayError::InvalidRegisterId(register_id));
    }
    Ok(())
  }

  /// Reads an integer-valued register.
  pub fn read_int_register(
    &self,
    dest_id: u8,
    register_id: u16,
    timeout_ms: i64,
  ) -> Result<i32, GatewayError> {
    Self::check_register_id(register_id)?;
    let payload = self.exchange(dest_id, frame::read_int_request(register_id), timeout_ms)?;
    let (value, _) = varint::decode(&payload)?;
    Ok(value)
  }

  /// Writes an integer-valued register.
  pub fn write_int_register(
    &self,
    dest_id: u8,
    register_id: u16,
    value: i32,
    timeout_ms: i64,
  ) -> Result<(), GatewayError> {
    Self::check_register_id(register_id)?;
    self.exchange(
      dest_id,
      frame::write_int_request(register_id, value),
      timeout_ms,
    )?;
    Ok(())
  }

  /// Reads a binary-valued register.
  pub fn read_binary_register(
    &self,
    dest_id: u8,
    register_id: u16,
    timeout_ms: i64,
  ) -> Result<Bytes, GatewayError> {
    Self::check_register_id(register_id)?;
    self.exchange(dest_id, frame::read_binary_request(register_id), timeout_ms)
  }

  /// Writes a binary-valued register.
  pub fn write_binary_register(
    &self,
    dest_id: u8,
    register_id: u16,
    data: &[u8],
    timeout_ms: i64,
  ) -> Result<(), GatewayError> {
    Self::check_register_id(register_id)?;
    self.exchange(
      dest_id,
      frame::write_binary_request(register_id, data),
      timeout_ms,
    )?;
    Ok(())
  }

  /// Asks the registry for the id of a register whose value changed since
  /// the last probe.
  ///
  /// `confirmed_register_id` acknowledges a previously returned hint so the
  /// device can move on to the next pending one. A negative return value
  /// means the device has no hint to give.
  pub fn get_change_hint(
    &self,
    dest_id: u8,
    confirmed_register_id: Option<u16>,
    timeout_ms: i64,
  ) -> Result<i32, GatewayError> {
    if let Some(id) = confirmed_register_id {
      Self::check_register_id(id)?;
    }
    let payload = self.exchange(
      dest_id,
      frame::change_hint_request(confirmed_register_id),
      timeout_ms,
    )?;
    Ok(varint::decode(&payload)?.0)
  }
}

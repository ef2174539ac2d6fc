//! Message transport between the gateway and a full-duplex stream socket.

use bytes::Bytes;

use crate::error::TransportError;

/// Callback invoked by the messenger's receive task for every inbound
/// `(tag, payload)` message.
pub type MessageHandler = Box<dyn Fn(u32, Bytes) + Send + Sync>;

/// Framing layer over a full-duplex stream socket (serial port, TCP, ...).
///
/// A messenger deals in whole messages: outbound `(dest_id, tag, payload)`
/// triples and inbound `(tag, payload)` pairs. Framing, checksums and
/// addressing are its business; the gateway only ever sees payload bytes.
/// `dest_id` carries the four-bit registry id of the target device; id 0 on
/// the receiving side means "accept all".
pub trait Messenger: Send + Sync {
  /// Opens the underlying socket and starts the receive task. May block.
  fn open(&self) -> Result<(), TransportError>;

  /// Stops the receive task and closes the socket. With `wait` set, the
  /// call returns only once the receive task has stopped; otherwise the
  /// shutdown is best-effort.
  fn close(&self, wait: bool);

  fn is_open(&self) -> bool;

  /// Installs or clears the inbound message handler. The handler runs on
  /// the receive task and must not block.
  fn set_handler(&self, handler: Option<MessageHandler>);

  /// Sends one message to the device identified by `dest_id`.
  fn send(&self, dest_id: u8, tag: u32, payload: &[u8]) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
  };

  use super::*;

  /// What the scripted device does with one request.
  pub(crate) enum Reply {
    /// Respond with these bytes (status byte included).
    Respond(Vec<u8>),
    /// Respond with these bytes under an unrelated tag.
    RespondTagged(u32, Vec<u8>),
    /// Swallow the request so the caller runs into its timeout.
    Ignore,
    /// Fail the send call itself.
    FailSend,
  }

  impl Reply {
    pub(crate) fn ok(payload: &[u8]) -> Reply {
      let mut bytes = vec![0x01];
      bytes.extend_from_slice(payload);
      Reply::Respond(bytes)
    }

    pub(crate) fn ok_int(value: i32) -> Reply {
      Reply::ok(&crate::wire::varint::encode(value))
    }

    pub(crate) fn status(status: u8) -> Reply {
      Reply::Respond(vec![status])
    }
  }

  type Responder = Box<dyn Fn(u8, &[u8]) -> Reply + Send + Sync>;

  /// In-memory messenger that answers requests synchronously from a
  /// scripted responder function.
  pub(crate) struct ScriptedMessenger {
    responder: Responder,
    handler: Mutex<Option<MessageHandler>>,
    open: AtomicBool,
    sent: Mutex<Vec<(u8, u32, Vec<u8>)>>,
  }

  impl ScriptedMessenger {
    pub(crate) fn new(
      responder: impl Fn(u8, &[u8]) -> Reply + Send + Sync + 'static,
    ) -> Arc<ScriptedMessenger> {
      Arc::new(ScriptedMessenger {
        responder: Box::new(responder),
        handler: Mutex::new(None),
        open: AtomicBool::new(false),
        sent: Mutex::new(Vec::new()),
      })
    }

    /// Every request sent so far, as `(dest_id, tag, payload)`.
    pub(crate) fn sent(&self) -> Vec<(u8, u32, Vec<u8>)> {
      self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_payloads(&self) -> Vec<Vec<u8>> {
      self
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|(_, _, payload)| payload.clone())
        .collect()
    }

    /// Injects an inbound message, as the receive task would.
    pub(crate) fn deliver(&self, tag: u32, payload: &[u8]) {
      let handler = self.handler.lock().unwrap();
      if let Some(handler) = handler.as_ref() {
        handler(tag, Bytes::copy_from_slice(payload));
      }
    }
  }

  impl Messenger for ScriptedMessenger {
    fn open(&self) -> Result<(), TransportError> {
      self.open.store(true, Ordering::SeqCst);
      Ok(())
    }

    fn close(&self, _wait: bool) {
      self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
      self.open.load(Ordering::SeqCst)
    }

    fn set_handler(&self, handler: Option<MessageHandler>) {
      *self.handler.lock().unwrap() = handler;
    }

    fn send(&self, dest_id: u8, tag: u32, payload: &[u8]) -> Result<(), TransportError> {
      self.sent.lock().unwrap().push((dest_id, tag, payload.to_vec()));
      match (self.responder)(dest_id, payload) {
        Reply::Respond(bytes) => {
          self.deliver(tag, &bytes);
          Ok(())
        }
        Reply::RespondTagged(other_tag, bytes) => {
          self.deliver(other_tag, &bytes);
          Ok(())
        }
        Reply::Ignore => Ok(()),
        Reply::FailSend => Err(TransportError::new("scripted send failure")),
      }
    }
  }
}

//! Per-device view over the gateway.

use std::sync::Arc;

use bytes::Bytes;

use crate::{error::GatewayError, gateway::Gateway, statistics::RequestStatistics};

/// Largest registry id; the messenger's destination field is four bits.
pub const MAX_REGISTRY_ID: u8 = 15;

/// The registers hosted by one device, seen through a shared [`Gateway`].
///
/// Every request forwarded through the collection is counted in its
/// [`RequestStatistics`], failed or not.
#[derive(Debug)]
pub struct RegisterCollection {
  gateway: Arc<Gateway>,
  registry_id: u8,
  statistics: RequestStatistics,
}

impl RegisterCollection {
  /// # Panics
  ///
  /// Panics if `registry_id` exceeds [`MAX_REGISTRY_ID`].
  pub fn new(gateway: Arc<Gateway>, registry_id: u8) -> Arc<RegisterCollection> {
    assert!(
      registry_id <= MAX_REGISTRY_ID,
      "registry id {registry_id} out of range 0..=15"
    );
    Arc::new(RegisterCollection {
      gateway,
      registry_id,
      statistics: RequestStatistics::new(),
    })
  }

  pub fn registry_id(&self) -> u8 {
    self.registry_id
  }

  pub fn gateway(&self) -> &Arc<Gateway> {
    &self.gateway
  }

  pub fn statistics(&self) -> &RequestStatistics {
    &self.statistics
  }

  fn count<T>(&self, result: Result<T, GatewayError>) -> Result<T, GatewayError> {
    self.statistics.count_request(result.is_err());
    result
  }

  pub fn read_int(&self, register_id: u16, timeout_ms: i64) -> Result<i32, GatewayError> {
    let result = self
      .gateway
      .read_int_register(self.registry_id, register_id, timeout_ms);
    self.count(result)
  }

  pub fn write_int(
    &self,
    register_id: u16,
    value: i32,
    timeout_ms: i64,
  ) -> Result<(), GatewayError> {
    let result = self
      .gateway
      .write_int_register(self.registry_id, register_id, value, timeout_ms);
    self.count(result)
  }

  pub fn read_binary(&self, register_id: u16, timeout_ms: i64) -> Result<Bytes, GatewayError> {
    let result = self
      .gateway
      .read_binary_register(self.registry_id, register_id, timeout_ms);
    self.count(result)
  }

  pub fn write_binary(
    &self,
    register_id: u16,
    data: &[u8],
    timeout_ms: i64,
  ) -> Result<(), GatewayError> {
    let result = self
      .gateway
      .write_binary_register(self.registry_id, register_id, data, timeout_ms);
    self.count(result)
  }

  /// Forwards to [`Gateway::get_change_hint`]. A negative result means the
  /// device has no hint to give.
  pub fn get_change_hint_id(
    &self,
    confirmed_register_id: Option<u16>,
    timeout_ms: i64,
  ) -> Result<i32, GatewayError> {
    let result = self
      .gateway
      .get_change_hint(self.registry_id, confirmed_register_id, timeout_ms);
    self.count(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::messenger::testing::{Reply, ScriptedMessenger};

  #[test]
  fn forwards_with_the_registry_id_and_counts() {
    let messenger = ScriptedMessenger::new(|_, request| match request[0] {
      0x01 => Reply::ok_int(42),
      _ => Reply::status(0x00),
    });
    let gateway = Gateway::new(messenger.clone());
    gateway.start().unwrap();
    let collection = RegisterCollection::new(gateway, 5);

    assert_eq!(collection.read_int(7, 1000).unwrap(), 42);
    assert!(collection.write_int(7, 1, 1000).is_err());
    assert_eq!(collection.statistics().total(), 2);
    assert_eq!(collection.statistics().failed(), 1);
    for (dest_id, _, _) in messenger.sent() {
      assert_eq!(dest_id, 5);
    }
  }

  #[test]
  #[should_panic(expected = "registry id")]
  fn rejects_out_of_range_registry_ids() {
    let messenger = ScriptedMessenger::new(|_, _| Reply::Ignore);
    let gateway = Gateway::new(messenger);
    let _ = RegisterCollection::new(gateway, 16);
  }
}

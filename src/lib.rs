//! Client-side access to registers hosted on GEP devices.
//!
//! A *register* is a named, typed, integer- or binary-valued cell on an
//! embedded device reachable over a serial or TCP stream transport. This
//! crate keeps a local, cached, periodically refreshed view of such
//! registers: it serializes request/response traffic over one socket
//! ([`Gateway`]), mirrors each remote cell locally ([`Register`]) with
//! change notification and failure backoff, and multiplexes any number of
//! registers onto one background task ([`AutoUpdater`]) that can also ask
//! devices *which* register changed instead of polling blindly
//! ([`HintSettings`]).
//!
//! The transport itself stays behind the [`Messenger`] trait: anything that
//! can ship whole `(tag, payload)` messages both ways will do.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gep_registry::{
//!   AutoUpdater, BooleanCodec, Gateway, HintSettings, Messenger, Register,
//!   RegisterCodec, RegisterCollection,
//! };
//!
//! fn run(messenger: Arc<dyn Messenger>) {
//!   let gateway = Gateway::new(messenger);
//!   gateway.start().expect("gateway startup failed");
//!
//!   // the device with registry id 3 hosts a boolean register 5
//!   let collection = RegisterCollection::new(Arc::clone(&gateway), 3);
//!   let register = Register::new(
//!     &collection,
//!     5,
//!     false,
//!     RegisterCodec::Int(BooleanCodec::shared()),
//!   );
//!   register.set_change_listener(Some(Arc::new(|r| {
//!     println!("register {} is now {:?}", r.register_id(), r.value());
//!   })));
//!
//!   let updater = AutoUpdater::new();
//!   updater.add_register(&register);
//!   updater.use_registry_hints(&collection, HintSettings::new(500));
//! }
//! ```

mod clock;
mod codec;
mod collection;
mod config;
mod error;
mod gateway;
mod hints;
mod messenger;
mod register;
mod statistics;
mod updater;
mod value;
pub mod wire;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use codec::{
  BinaryCodec, BooleanCodec, HexBinaryCodec, IntCodec, NumberCodec, RegisterCodec,
};
pub use collection::{RegisterCollection, MAX_REGISTRY_ID};
pub use config::{
  parse_interval, BuiltCollection, CodecConfig, CollectionConfig, RegisterConfig,
};
pub use error::{
  CodecError, ConfigError, GatewayError, RegisterError, TransportError, WireError,
};
pub use gateway::Gateway;
pub use hints::{HintSettings, HintStrategy, DEFAULT_HINT_TIMEOUT_MS};
pub use messenger::{MessageHandler, Messenger};
pub use register::{
  ChangeListener, ConnectionSettings, Register, DEFAULT_UPDATE_INTERVAL_MS,
};
pub use statistics::{RequestStatistics, StatisticsSnapshot};
pub use updater::AutoUpdater;
pub use value::{Value, ValueType};
pub use wire::frame::MAX_REGISTER_ID;

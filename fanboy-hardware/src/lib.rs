//! fanboy-hardware
//!
//! Link driver for the fan controller: the byte transport and port resolver
//! at the bottom, the protocol codec and resync session above them, and the
//! command actor, poller, and notification hub on top. Consumers normally
//! only touch [`FanDriver`].
//!
//! Public API:
//! - `driver::FanDriver` - start/stop the driver, read snapshots, submit speed requests
//! - `notifier::Notifier` - listener registry fed after each completed poll
//! - `serial_driver::{SerialTransport, Connector}` - transport seams, with the
//!   `tokio-serial` backed `SerialDriver`/`SerialConnector`
//! - `protocol` - frame builders and response decoders

pub mod driver;
pub mod fan_controller;
pub mod notifier;
pub mod poller;
pub mod port_resolver;
pub mod protocol;
pub mod serial_driver;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use driver::FanDriver;
pub use fan_controller::{FanController, Request};
pub use notifier::{ListenerId, Notifier};
pub use poller::Poller;
pub use port_resolver::resolve_port;
pub use serial_driver::{Connector, SerialConnector, SerialDriver, SerialTransport};
pub use session::{Session, SessionState};

//! Driver and command-line controller for the Philips AS111 alarm-clock dock.
//!
//! The dock is reached either over Bluetooth RFCOMM or over a USB serial
//! port. Both speak the same small request/response protocol (see
//! [`protocol`]); a [`DeviceSession`] wraps one open link and turns
//! high-level intents (set the clock, change volume, show a number, run a
//! countdown) into request frames.
//!
//! # Long-running display operations
//!
//! Countdowns and held displays block the calling thread and tick once per
//! second. They poll a [`CancelSignal`] each tick; the command-line tool uses
//! a [`StopFile`] so that `as111 stop` in another terminal ends a running
//! countdown within a second.
//!
//! ```ignore
//! let mut session = DeviceSession::connect_address("00:1D:DF:52:F1:91", SessionConfig::default())?
//!     .with_cancel(StopFile::shared());
//! println!("{}", session.device().report());
//! session.set_volume(12)?;
//! session.countdown(1, 30, Direction::Down)?;
//! session.disconnect();
//! ```

pub mod alias;
pub mod bluetooth;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod device;
pub mod discovery;
mod errors;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod transport;

pub use bluetooth::{BluetoothConnector, RfcommStream, RfcommTransport};
pub use cancel::{CancelSignal, StopFile};
pub use config::SessionConfig;
pub use device::Device;
pub use errors::*;
pub use protocol::{Capability, Codec};
pub use session::{DeviceSession, Direction, SessionState, TimedRun};
pub use transport::{SerialTransport, Transport, TransportKind};

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] BluetoothError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("cannot resolve target: {0}")]
    Resolution(String),
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl DriverError {
    /// True when the failure happened on an already-open link.
    pub fn is_transport(&self) -> bool {
        matches!(self, DriverError::Transport(_))
    }
}

/// Failure of a single request/response exchange.
///
/// A short or empty response is reported here rather than decoded into a
/// default value, so a dead link can never read as "volume 0".
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("transport already closed")]
    Closed,
    #[error("response too short: needed {needed} bytes, got {actual}")]
    ShortResponse { needed: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("connection not established: {0}")]
    NotConnected(String),
    #[error("rfcomm connection failed: {0}")]
    Connection(String),
    #[error("device enumeration failed: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;

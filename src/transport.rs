//! Link layer shared by the Bluetooth and serial docks.
//!
//! The session only ever does one thing with a link: write a request frame
//! and collect whatever answer arrives before the read timeout. How many
//! bytes to wait for is known per command, see [`crate::protocol::NAME_RESPONSE_LEN`]
//! and its siblings.

use std::fmt;
use std::io::{self, Read, Write};

use log::{debug, info};
use serde::Serialize;

use crate::config::SerialSettings;
use crate::errors::{Result, TransportError};

/// Which kind of link a dock is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Bluetooth,
    Serial,
}

impl TransportKind {
    /// Pick a transport from the shape of an address.
    ///
    /// `XX:XX:XX:XX:XX:XX` is a Bluetooth MAC; `/dev/...`, `tty...` and
    /// `COMn` are serial ports. Anything else is not directly connectable.
    pub fn classify(address: &str) -> Option<Self> {
        if is_mac_address(address) {
            Some(TransportKind::Bluetooth)
        } else if is_port_name(address) {
            Some(TransportKind::Serial)
        } else {
            None
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Bluetooth => f.write_str("bluetooth"),
            TransportKind::Serial => f.write_str("serial"),
        }
    }
}

pub fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

pub fn is_port_name(s: &str) -> bool {
    if s.starts_with("/dev/") || s.starts_with("tty") {
        return true;
    }
    let upper = s.to_ascii_uppercase();
    upper
        .strip_prefix("COM")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// A request/response link to one dock.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Send `request` and return the response bytes.
    ///
    /// `expected_len` is how many bytes the caller hopes for. A shorter
    /// answer is returned as is; only a link failure is an error.
    fn exchange(
        &mut self,
        request: &[u8],
        expected_len: usize,
    ) -> std::result::Result<Vec<u8>, TransportError>;

    /// Release the underlying handle.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serial-over-USB link.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, settings: &SerialSettings) -> Result<Self> {
        let port = serialport::new(path, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()?;
        info!(
            "serial port opened: path={}, baud={}",
            path, settings.baud_rate
        );
        Ok(Self { port })
    }

    pub fn from_port(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn exchange(
        &mut self,
        request: &[u8],
        expected_len: usize,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        self.port.write_all(request)?;
        self.port.flush()?;

        // No framing on the wire: read until the expected size or the timeout.
        let mut response = vec![0u8; expected_len];
        let mut filled = 0;
        while filled < expected_len {
            match self.port.read(&mut response[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        response.truncate(filled);
        debug!("serial rx: {:02X?}", response);
        Ok(response)
    }
}

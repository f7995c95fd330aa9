//! Tunables and well-known paths.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::bluetooth::BluetoothConnector;

/// Default serial baud rate for USB-attached docks
pub const SERIAL_BAUD_RATE: u32 = 115_200;

/// Serial reads give up after this long without data
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// One display tick of the timed operations
pub const TICK: Duration = Duration::from_secs(1);

/// How long `date` keeps day and month on the display
pub const DATE_HOLD_SECS: u32 = 5;

/// Longest duration a command-line timed operation accepts
pub const MAX_TIMED_SECS: u32 = 24 * 60 * 60;

pub const STOP_FILE_NAME: &str = ".as111_stop";
pub const ALIAS_FILE_NAME: &str = ".as111_aliases";

pub const STOP_FILE_ENV: &str = "AS111_STOP_FILE";
pub const ALIAS_FILE_ENV: &str = "AS111_ALIASES";

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: SERIAL_BAUD_RATE,
            read_timeout: SERIAL_READ_TIMEOUT,
        }
    }
}

/// Everything a session needs besides the address.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bluetooth: BluetoothConnector,
    pub serial: SerialSettings,
    /// Period of countdown/display loops; blinking runs at half of it.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bluetooth: BluetoothConnector::default(),
            serial: SerialSettings::default(),
            tick: TICK,
        }
    }
}

/// `<temp_dir>/.as111_stop`, unless `AS111_STOP_FILE` says otherwise.
pub fn stop_file_path() -> PathBuf {
    env::var_os(STOP_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join(STOP_FILE_NAME))
}

/// `$HOME/.as111_aliases`, unless `AS111_ALIASES` says otherwise.
pub fn alias_file_path() -> Option<PathBuf> {
    env::var_os(ALIAS_FILE_ENV)
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(ALIAS_FILE_NAME)))
}

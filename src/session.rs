//! One open connection to one dock.
//!
//! A session owns the link, the request sequence counter and the cached
//! [`Device`] record. Its life is one-way:
//!
//! ```text
//! Disconnected --handshake--> Connected --disconnect--> Closed
//! ```
//!
//! A closed session cannot be reopened; connect again to get a new one.
//! There is no automatic reconnect: a link failure is returned to the
//! caller as [`TransportError`] and the session stays as it was.
//!
//! # Timed operations
//!
//! Countdowns, blinking and held displays send one request per tick and
//! then sleep for the rest of the tick, so request latency does not
//! accumulate. The cancellation signal is polled after each sleep.

use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Timelike};
use log::{debug, error, info, warn};

use crate::bluetooth::RfcommTransport;
use crate::cancel::{CancelSignal, Never};
use crate::config::SessionConfig;
use crate::device::Device;
use crate::errors::{DriverError, Result, TransportError};
use crate::protocol::{
    decode_capabilities, extract_bytes, extract_string, extract_volume, split_pairs, Codec,
    DisplayFields, CAPABILITIES_RESPONSE_LEN, CAPABILITIES_SPAN, CMD_QUERY_CAPABILITIES,
    CMD_QUERY_NAME, CMD_QUERY_VERSION, CMD_QUERY_VOLUME, CMD_SET, MAX_VOLUME,
    NAME_RESPONSE_LEN, NAME_SPAN, SELECT_ALARM_LED, SELECT_VOLUME, SET_RESPONSE_LEN,
    VERSION_RESPONSE_LEN, VERSION_SPAN, VOLUME_RESPONSE_LEN,
};
use crate::transport::{SerialTransport, Transport, TransportKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Link open, handshake not run yet.
    Disconnected,
    Connected,
    /// Terminal.
    Closed,
}

/// Which way a countdown runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `total, total - 1, ..., 0`
    Down,
    /// `0, 1, ..., total`
    Up,
}

/// How a timed operation ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimedRun {
    /// Ticks actually shown.
    pub ticks: u32,
    /// Stopped early by the cancellation signal.
    pub cancelled: bool,
}

pub struct DeviceSession {
    device: Device,
    transport: Option<Box<dyn Transport>>,
    codec: Codec,
    config: SessionConfig,
    cancel: Box<dyn CancelSignal>,
    state: SessionState,
}

impl DeviceSession {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open a link to `device` and run the handshake.
    ///
    /// Nothing is left open on failure.
    pub fn connect(device: Device, config: SessionConfig) -> Result<Self> {
        info!("connecting to {} over {}", device.address, device.kind);
        let transport: Box<dyn Transport> = match device.kind {
            TransportKind::Bluetooth => Box::new(RfcommTransport::new(
                config.bluetooth.connect(&device.address)?,
            )),
            TransportKind::Serial => {
                Box::new(SerialTransport::open(&device.address, &config.serial)?)
            }
        };

        let mut session = Self::from_transport(device, transport, config);
        if let Err(e) = session.handshake() {
            session.disconnect();
            return Err(e);
        }
        Ok(session)
    }

    /// Connect to a raw address, picking the transport from its shape.
    pub fn connect_address(address: &str, config: SessionConfig) -> Result<Self> {
        let kind = TransportKind::classify(address).ok_or_else(|| {
            DriverError::Resolution(format!("{address} is neither a MAC address nor a port"))
        })?;
        Self::connect(Device::new(kind, address), config)
    }

    /// Wrap an already open link. Call [`handshake`](Self::handshake) next.
    pub fn from_transport(
        device: Device,
        transport: Box<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        Self {
            device,
            transport: Some(transport),
            codec: Codec::new(),
            config,
            cancel: Box::new(Never),
            state: SessionState::Disconnected,
        }
    }

    /// Replace the signal polled by timed operations.
    pub fn with_cancel(mut self, cancel: impl CancelSignal + 'static) -> Self {
        self.cancel = Box::new(cancel);
        self
    }

    /// Sync the clock, then read name, version, volume and capabilities once.
    pub fn handshake(&mut self) -> Result<()> {
        self.sync_time()?;
        self.query_name()?;
        self.query_version()?;
        self.query_volume()?;
        self.query_capabilities()?;

        self.device.connected = true;
        self.state = SessionState::Connected;
        info!(
            "connected: {} (version={}, volume={:?})",
            self.device,
            self.device.version.as_deref().unwrap_or("?"),
            self.device.volume
        );
        Ok(())
    }

    /// Close the link. Safe to call more than once; close errors are logged.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                debug!("closing {} failed: {}", self.device.address, e);
            }
            info!("disconnected from {}", self.device.address);
        }
        self.device.connected = false;
        self.state = SessionState::Closed;
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sequence number of the last request sent.
    pub fn sequence(&self) -> u8 {
        self.codec.sequence()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn query_name(&mut self) -> Result<String> {
        let response = self.request(CMD_QUERY_NAME, &[], NAME_RESPONSE_LEN)?;
        let name = extract_string(&response, NAME_SPAN.0, NAME_SPAN.1);
        debug!("name: {}", name);
        self.device.name = name.clone();
        Ok(name)
    }

    pub fn query_version(&mut self) -> Result<String> {
        let response = self.request(CMD_QUERY_VERSION, &[], VERSION_RESPONSE_LEN)?;
        let version = extract_string(&response, VERSION_SPAN.0, VERSION_SPAN.1);
        debug!("version: {}", version);
        self.device.version = Some(version.clone());
        Ok(version)
    }

    /// Current volume. An empty or truncated answer is a transport error.
    pub fn query_volume(&mut self) -> Result<u8> {
        let response = self.request(CMD_QUERY_VOLUME, &[SELECT_VOLUME], VOLUME_RESPONSE_LEN)?;
        let volume = extract_volume(&response).map_err(|e| {
            error!("volume query to {} failed: {}", self.device.address, e);
            e
        })?;
        debug!("volume: {}", volume);
        self.device.volume = Some(volume);
        Ok(volume)
    }

    pub fn query_capabilities(&mut self) -> Result<()> {
        let response = self.request(CMD_QUERY_CAPABILITIES, &[], CAPABILITIES_RESPONSE_LEN)?;
        let bitmask = extract_bytes(&response, CAPABILITIES_SPAN.0, CAPABILITIES_SPAN.1);
        self.device.capabilities = decode_capabilities(bitmask);
        debug!("capabilities: {:?}", self.device.capabilities);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Set the dock's clock to local wall time.
    pub fn sync_time(&mut self) -> Result<()> {
        let fields = DisplayFields::from_datetime(&now());
        self.send_display(fields)?;
        self.device.display = Some(fields.to_string());
        info!("time set on {}: {}", self.device.address, fields);
        Ok(())
    }

    /// Set the volume, clamped to `0..=32`. Returns the value sent.
    ///
    /// The cached volume is updated without asking the dock again.
    pub fn set_volume(&mut self, volume: i32) -> Result<u8> {
        let volume = volume.clamp(0, MAX_VOLUME as i32) as u8;
        self.request(CMD_SET, &[SELECT_VOLUME, volume], SET_RESPONSE_LEN)?;
        self.device.volume = Some(volume);
        info!("volume set to {}", volume);
        Ok(volume)
    }

    /// Move the volume by `delta` from its last known value.
    pub fn change_volume(&mut self, delta: i32) -> Result<u8> {
        let current = match self.device.volume {
            Some(v) => v,
            None => self.query_volume()?,
        };
        self.set_volume(i32::from(current).saturating_add(delta))
    }

    pub fn mute(&mut self) -> Result<u8> {
        self.set_volume(0)
    }

    pub fn set_alarm_led(&mut self, on: bool) -> Result<()> {
        self.request(CMD_SET, &[SELECT_ALARM_LED, on as u8], SET_RESPONSE_LEN)?;
        Ok(())
    }

    /// Show two digit pairs in the hour and minute positions.
    pub fn display_pairs(&mut self, first: u8, second: u8) -> Result<()> {
        let fields = DisplayFields::from_datetime(&now()).with_pairs(first, second);
        self.send_display(fields)?;
        self.device.display = Some(format!("{first:02}:{second:02}"));
        Ok(())
    }

    /// Show a four-digit number and keep it up for `hold_secs` seconds.
    ///
    /// `8765` is shown as `87:65`.
    pub fn display_number(&mut self, hold_secs: u32, number: u16) -> Result<TimedRun> {
        let (first, second) = split_pairs(number);
        self.display_pairs(first, second)?;
        info!("showing {:04} for {}s", number, hold_secs);
        self.hold(hold_secs)
    }

    /// Show day and month, then hold them.
    pub fn display_date(&mut self, hold_secs: u32) -> Result<TimedRun> {
        let today = now();
        let fields = DisplayFields::from_datetime(&today);
        self.display_pairs(fields.day, fields.month + 1)?;
        self.hold(hold_secs)
    }

    /// Block for `secs` ticks without sending anything, unless cancelled.
    pub fn hold(&mut self, secs: u32) -> Result<TimedRun> {
        let tick = self.config.tick;
        self.run_ticks(secs, tick, |_, _| Ok(()))
    }

    /// For `duration` ticks, show the wall clock's minutes and seconds.
    pub fn display_minutes_and_seconds(&mut self, duration: u32) -> Result<TimedRun> {
        let tick = self.config.tick;
        self.run_ticks(duration, tick, |session, _| {
            let t = now();
            session.display_pairs(t.minute() as u8, t.second().min(59) as u8)
        })
    }

    /// Count from `minutes:seconds` down to zero, or from zero up to it.
    pub fn countdown(
        &mut self,
        minutes: u32,
        seconds: u32,
        direction: Direction,
    ) -> Result<TimedRun> {
        let total = minutes.saturating_mul(60).saturating_add(seconds);
        let tick = self.config.tick;
        info!("counting {:?} over {}s", direction, total);
        self.run_ticks(total.saturating_add(1), tick, |session, i| {
            let value = match direction {
                Direction::Down => total - i,
                Direction::Up => i,
            };
            let (mm, ss) = ((value / 60).min(99) as u8, (value % 60) as u8);
            session.display_pairs(mm, ss)
        })
    }

    /// Blink the alarm LED for `seconds`, two half-tick phases per second.
    ///
    /// The LED is switched off if the blinking is cancelled while lit.
    pub fn blink_led(&mut self, seconds: u32) -> Result<TimedRun> {
        let half = self.config.tick / 2;
        let mut lit = false;
        let run = self.run_ticks(seconds.saturating_mul(2), half, |session, i| {
            lit = i % 2 == 0;
            session.set_alarm_led(lit)
        })?;
        if lit {
            self.set_alarm_led(false)?;
        }
        Ok(run)
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn send_display(&mut self, fields: DisplayFields) -> Result<()> {
        self.request(CMD_SET, &fields.to_payload(), SET_RESPONSE_LEN)?;
        Ok(())
    }

    /// Send one request frame and return the raw response.
    fn request(&mut self, command: u8, payload: &[u8], expected: usize) -> Result<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        let frame = self.codec.build_request(command, payload);
        debug!("tx: {:02X?}", frame);

        let response = match transport.exchange(&frame, expected) {
            Ok(response) => response,
            Err(e) => {
                error!(
                    "command {} to {} failed: {}",
                    command, self.device.address, e
                );
                return Err(e.into());
            }
        };

        if response.len() < expected {
            warn!(
                "short response to command {}: expected {} bytes, got {}",
                command,
                expected,
                response.len()
            );
        }
        Ok(response)
    }

    /// Run `step` `count` times, one per `period`, until done or cancelled.
    fn run_ticks<F>(&mut self, count: u32, period: Duration, mut step: F) -> Result<TimedRun>
    where
        F: FnMut(&mut Self, u32) -> Result<()>,
    {
        let mut run = TimedRun::default();
        for i in 0..count {
            let started = Instant::now();
            step(self, i)?;
            run.ticks += 1;

            thread::sleep(period.saturating_sub(started.elapsed()));

            if self.cancel.is_cancelled() {
                info!("stopped after {} of {} ticks", run.ticks, count);
                run.cancelled = true;
                break;
            }
        }
        Ok(run)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

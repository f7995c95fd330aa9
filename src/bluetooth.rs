use std::fs::File;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::thread;
use std::time::Duration;

#[cfg(feature = "bluez")]
use bluer::rfcomm::{SocketAddr, Stream};
#[cfg(feature = "bluez")]
use bluer::{Address, Session};
use log::{debug, info, warn};
use nix::sys::socket::{shutdown, Shutdown};
#[cfg(feature = "bluez")]
use tokio::runtime::Runtime;

use crate::errors::{BluetoothError, DriverError, Result, TransportError};
use crate::transport::{Transport, TransportKind};

#[cfg(not(feature = "bluez"))]
const AF_BLUETOOTH: libc::c_ushort = 31;
#[cfg(not(feature = "bluez"))]
const BTPROTO_RFCOMM: libc::c_int = 3;

/// The dock answers on the first RFCOMM channel
const RFCOMM_CHANNEL: u8 = 1;
const DEFAULT_IO_TIMEOUT_SECS: u64 = 2;
const MAX_CONNECT_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 500;
/// Largest response read in one go
const MAX_RESPONSE_LEN: usize = 255;

/// Opens RFCOMM sockets to already-paired docks without needing root.
///
/// Behavior depends on build features:
/// - Default: raw RFCOMM socket through libc.
/// - With `bluez`: the socket is opened through BlueZ (`bluer`).
#[derive(Debug, Clone)]
pub struct BluetoothConnector {
    pub channel: u8,
    pub io_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for BluetoothConnector {
    fn default() -> Self {
        Self {
            channel: RFCOMM_CHANNEL,
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            max_retries: MAX_CONNECT_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

impl BluetoothConnector {
    /// Connect to `mac`, retrying with exponential backoff.
    pub fn connect(&self, mac: &str) -> Result<RfcommStream> {
        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay * (1 << (attempt - 1).min(3));
                warn!(
                    "retrying RFCOMM connection after {:?} (mac={}, attempt={})",
                    delay, mac, attempt
                );
                thread::sleep(delay);
            }

            match self.open(mac) {
                Ok(stream) => {
                    if let Err(e) = stream.verify_connected() {
                        warn!("connection verification failed: mac={}, error={}", mac, e);
                        last_error = Some(e);
                        continue;
                    }
                    info!("RFCOMM connection established: mac={}", mac);
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(
                        "RFCOMM connection attempt failed: mac={}, attempt={}, error={}",
                        mac, attempt, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DriverError::Bluetooth(BluetoothError::NotConnected("max retries exceeded".into()))
        }))
    }

    #[cfg(not(feature = "bluez"))]
    fn open(&self, mac: &str) -> Result<RfcommStream> {
        let bdaddr = parse_bdaddr(mac)?;
        open_rfcomm_raw(bdaddr, self.channel, self.io_timeout)
    }

    #[cfg(feature = "bluez")]
    fn open(&self, mac: &str) -> Result<RfcommStream> {
        let address: Address = mac.parse().map_err(|_| {
            DriverError::Bluetooth(BluetoothError::Connection("invalid mac".into()))
        })?;
        let rt = Runtime::new().map_err(|e| {
            DriverError::Bluetooth(BluetoothError::Connection(format!(
                "tokio runtime init failed: {e}"
            )))
        })?;
        rt.block_on(open_rfcomm(address, self.channel, self.io_timeout))
    }
}

/// Blocking RFCOMM socket.
pub struct RfcommStream {
    file: File,
    io_timeout: Duration,
}

impl RfcommStream {
    /// Verify the connection is actually established and usable.
    pub fn verify_connected(&self) -> Result<()> {
        let mut err: libc::c_int = 0;
        let mut len: libc::socklen_t = mem::size_of::<libc::c_int>() as libc::socklen_t;

        let ret = unsafe {
            libc::getsockopt(
                self.file.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if ret < 0 {
            return Err(DriverError::Io(io::Error::last_os_error()));
        }

        if err != 0 {
            return Err(DriverError::Bluetooth(BluetoothError::NotConnected(
                io::Error::from_raw_os_error(err).to_string(),
            )));
        }

        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

impl Read for RfcommStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for RfcommStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Bluetooth link: one send, one receive of up to 255 bytes.
pub struct RfcommTransport {
    stream: RfcommStream,
}

impl RfcommTransport {
    pub fn new(stream: RfcommStream) -> Self {
        Self { stream }
    }
}

impl Transport for RfcommTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn exchange(
        &mut self,
        request: &[u8],
        _expected_len: usize,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        self.stream.write_all(request)?;

        let mut buf = [0u8; MAX_RESPONSE_LEN];
        loop {
            match self.stream.read(&mut buf) {
                Ok(n) => {
                    debug!("rfcomm rx: {:02X?}", &buf[..n]);
                    return Ok(buf[..n].to_vec());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(TransportError::Timeout(self.stream.io_timeout()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        shutdown(self.stream.file.as_raw_fd(), Shutdown::Both).map_err(io::Error::from)
    }
}

/// Set send and receive timeouts so no read or write can hang.
fn set_io_timeouts(fd: RawFd, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    for opt in [libc::SO_RCVTIMEO, libc::SO_SNDTIMEO] {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &tv as *const _ as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Close `fd` and turn the last OS error into a connection error.
fn fail_fd(fd: RawFd) -> DriverError {
    let err = io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    DriverError::Bluetooth(BluetoothError::Connection(err.to_string()))
}

/// Paired Bluetooth devices as `(address, name)` pairs, via BlueZ.
#[cfg(feature = "bluez")]
pub fn paired_devices() -> Result<Vec<(String, String)>> {
    let rt = Runtime::new()
        .map_err(|e| DriverError::Bluetooth(BluetoothError::Discovery(e.to_string())))?;
    rt.block_on(async {
        let session = Session::new()
            .await
            .map_err(|e| DriverError::Bluetooth(BluetoothError::Discovery(e.to_string())))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| DriverError::Bluetooth(BluetoothError::Discovery(e.to_string())))?;
        let addresses = adapter
            .device_addresses()
            .await
            .map_err(|e| DriverError::Bluetooth(BluetoothError::Discovery(e.to_string())))?;

        let mut paired = Vec::new();
        for address in addresses {
            let Ok(device) = adapter.device(address) else {
                continue;
            };
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            let name = device.name().await.ok().flatten().unwrap_or_default();
            paired.push((address.to_string(), name));
        }
        Ok(paired)
    })
}

#[cfg(feature = "bluez")]
async fn open_rfcomm(address: Address, channel: u8, timeout: Duration) -> Result<RfcommStream> {
    debug!("opening RFCOMM socket: mac={}, channel={}", address, channel);

    let target = SocketAddr::new(address, channel);
    let stream = tokio::time::timeout(timeout, Stream::connect(target))
        .await
        .map_err(|_| DriverError::Timeout("rfcomm connect timed out".into()))
        .and_then(|r| {
            r.map_err(|e| DriverError::Bluetooth(BluetoothError::Connection(e.to_string())))
        })?;

    // Own a blocking duplicate of the fd, independent of the async stream.
    let fd = unsafe { libc::dup(stream.as_raw_fd()) };
    if fd < 0 {
        return Err(DriverError::Bluetooth(BluetoothError::Connection(
            io::Error::last_os_error().to_string(),
        )));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(fail_fd(fd));
    }
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
        return Err(fail_fd(fd));
    }
    if set_io_timeouts(fd, timeout).is_err() {
        return Err(fail_fd(fd));
    }

    let file = unsafe { File::from_raw_fd(fd) };
    Ok(RfcommStream {
        file,
        io_timeout: timeout,
    })
}

#[cfg(not(feature = "bluez"))]
#[repr(C)]
#[derive(Copy, Clone)]
struct BdAddr {
    b: [u8; 6],
}

#[cfg(not(feature = "bluez"))]
#[repr(C)]
struct SockAddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: BdAddr,
    rc_channel: u8,
}

#[cfg(not(feature = "bluez"))]
fn parse_bdaddr(mac: &str) -> Result<BdAddr> {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(DriverError::Bluetooth(BluetoothError::Connection(
            "invalid mac".into(),
        )));
    }

    let mut bytes = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        bytes[i] = u8::from_str_radix(part, 16).map_err(|_| {
            DriverError::Bluetooth(BluetoothError::Connection("invalid mac".into()))
        })?;
    }

    // bdaddr_t is little-endian
    bytes.reverse();
    Ok(BdAddr { b: bytes })
}

#[cfg(not(feature = "bluez"))]
fn open_rfcomm_raw(address: BdAddr, channel: u8, timeout: Duration) -> Result<RfcommStream> {
    debug!(
        "opening RFCOMM socket: channel={}, addr_bytes={:02X?}",
        channel, address.b
    );

    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH as libc::c_int,
            libc::SOCK_STREAM,
            BTPROTO_RFCOMM,
        )
    };
    if fd < 0 {
        return Err(DriverError::Bluetooth(BluetoothError::Connection(
            io::Error::last_os_error().to_string(),
        )));
    }

    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(fail_fd(fd));
    }

    let addr = SockAddrRc {
        rc_family: AF_BLUETOOTH as libc::sa_family_t,
        rc_bdaddr: address,
        rc_channel: channel,
    };

    let ret = unsafe {
        libc::connect(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<SockAddrRc>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(fail_fd(fd));
    }

    if set_io_timeouts(fd, timeout).is_err() {
        return Err(fail_fd(fd));
    }

    let file = unsafe { File::from_raw_fd(fd) };
    Ok(RfcommStream {
        file,
        io_timeout: timeout,
    })
}

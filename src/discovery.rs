//! Finding docks to talk to.
//!
//! Bluetooth docks are taken from the paired-device list of the local
//! adapter (BlueZ through `bluer` with the `bluez` feature, `bluetoothctl`
//! otherwise); USB docks from the serial ports the OS reports.

#[cfg(not(feature = "bluez"))]
use std::process::Command;

use log::{debug, warn};
use serialport::SerialPortType;

use crate::alias::AliasBook;
use crate::device::Device;
#[cfg(not(feature = "bluez"))]
use crate::errors::{BluetoothError, DriverError};
use crate::errors::Result;
use crate::transport::{is_mac_address, TransportKind};

/// Substrings (upper case) that mark a device name as an AS111 dock.
pub const DOCK_NAME_MARKERS: [&str; 2] = ["AS111", "PHILIPS"];

pub fn is_dock_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    DOCK_NAME_MARKERS.iter().any(|m| upper.contains(m))
}

/// Every dock that can be reached right now, aliases attached.
///
/// A source that cannot be enumerated is logged and skipped.
pub fn docks(aliases: &AliasBook) -> Vec<Device> {
    let mut found = Vec::new();

    match bluetooth_docks() {
        Ok(docks) => found.extend(docks),
        Err(e) => warn!("bluetooth docks not listed: {}", e),
    }
    match serial_docks() {
        Ok(docks) => found.extend(docks),
        Err(e) => warn!("serial docks not listed: {}", e),
    }

    for device in &mut found {
        device.alias = aliases.alias_for(&device.address).map(str::to_string);
    }
    debug!("{} docks found", found.len());
    found
}

pub fn bluetooth_docks() -> Result<Vec<Device>> {
    let paired = paired_bluetooth_devices()?;
    Ok(paired
        .into_iter()
        .filter(|(_, name)| is_dock_name(name))
        .map(|(address, name)| Device::new(TransportKind::Bluetooth, address).with_name(name))
        .collect())
}

pub fn serial_docks() -> Result<Vec<Device>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => {
                let label = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                is_dock_name(&label)
                    .then(|| Device::new(TransportKind::Serial, port.port_name).with_name(label))
            }
            _ => None,
        })
        .collect())
}

#[cfg(feature = "bluez")]
fn paired_bluetooth_devices() -> Result<Vec<(String, String)>> {
    crate::bluetooth::paired_devices()
}

#[cfg(not(feature = "bluez"))]
fn paired_bluetooth_devices() -> Result<Vec<(String, String)>> {
    let output = Command::new("bluetoothctl")
        .args(["devices", "Paired"])
        .output()
        .map_err(|e| DriverError::Bluetooth(BluetoothError::Discovery(e.to_string())))?;
    if !output.status.success() {
        return Err(DriverError::Bluetooth(BluetoothError::Discovery(format!(
            "bluetoothctl exited with {}",
            output.status
        ))));
    }
    Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `Device <mac> <name>` lines as printed by `bluetoothctl`.
pub fn parse_device_list(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (address, name) = rest.split_once(' ').unwrap_or((rest, ""));
            is_mac_address(address).then(|| (address.to_string(), name.trim().to_string()))
        })
        .collect()
}

//! Board detection and connection status types.
//!
//! Detects MicroPython-capable boards on USB serial ports and defines the
//! status values the link manager reports to its subscriber.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};

/// Manufacturer strings that identify a MicroPython runtime without probing.
pub const SUPPORTED_MANUFACTURERS: &[&str] = &["MicroPython"];

/// Immutable snapshot of a connected board.
///
/// Created at successful connect, replaced on reconnect, discarded on
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroDevice {
    /// Serial port path (e.g., "/dev/cu.usbmodem1234" or "COM3").
    pub port: String,
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
    /// Product name (if available).
    pub product: Option<String>,
    /// Manufacturer name (if available).
    pub manufacturer: Option<String>,
    /// Device serial number (if available).
    pub serial_number: Option<String>,
    /// Whether the board runs a MicroPython interpreter.
    pub is_micropython: bool,
}

impl MicroDevice {
    /// Get a display label for this board.
    pub fn display_label(&self) -> String {
        if let Some(ref name) = self.product {
            name.clone()
        } else if self.is_micropython {
            format!("MicroPython board ({})", self.port)
        } else {
            format!("Serial device ({})", self.port)
        }
    }
}

/// Classified connection failure, suitable for localized display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionError {
    /// Enumeration returned nothing usable.
    NoDevices,
    /// Device found but claim/open/configure failed.
    CantOpenPort,
    /// The OS denied access to the port.
    PermissionDenied,
    /// Any I/O failure on an open link, or an explicit disconnect.
    ConnectionLost,
}

/// Current state of the serial link, emitted to a single subscriber.
///
/// A new status always supersedes the previous one; there is no error queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "data")]
pub enum ConnectionStatus {
    Connecting,
    Connected(MicroDevice),
    Error {
        error: ConnectionError,
        message: String,
    },
}

impl ConnectionStatus {
    pub(crate) fn error(error: ConnectionError) -> Self {
        ConnectionStatus::Error {
            error,
            message: String::new(),
        }
    }
}

/// Find all boards attached on USB serial ports.
///
/// On macOS, `tty.*` ports are skipped to avoid duplicates (each device
/// appears as both `cu.*` and `tty.*`; `cu.*` does not block on DCD).
pub fn find_boards() -> Vec<MicroDevice> {
    let mut boards = Vec::new();

    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(_) => return boards,
    };

    for port in ports {
        #[cfg(target_os = "macos")]
        if port.port_name.contains("/dev/tty.") {
            continue;
        }

        if let SerialPortType::UsbPort(usb_info) = &port.port_type {
            let is_micropython = usb_info
                .manufacturer
                .as_deref()
                .map(|m| SUPPORTED_MANUFACTURERS.contains(&m))
                .unwrap_or(false);

            boards.push(MicroDevice {
                port: port.port_name.clone(),
                vid: usb_info.vid,
                pid: usb_info.pid,
                product: usb_info.product.clone(),
                manufacturer: usb_info.manufacturer.clone(),
                serial_number: usb_info.serial_number.clone(),
                is_micropython,
            });
        }
    }

    boards
}

/// Pick the best connection candidate: a known MicroPython board or a
/// previously-seen product first, else the first enumerated device.
pub(crate) fn pick_board(
    boards: &[MicroDevice],
    known_products: &HashSet<u16>,
) -> Option<MicroDevice> {
    boards
        .iter()
        .find(|b| b.is_micropython || known_products.contains(&b.pid))
        .or_else(|| boards.first())
        .cloned()
}

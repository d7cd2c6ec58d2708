//! DFU error types.

use thiserror::Error;

/// Result type alias for DFU operations.
pub type DfuResult<T> = Result<T, DfuError>;

/// Errors that can occur during DFU operations.
///
/// These never cross the engine's public boundary directly: the engine
/// converts them to a `false` result plus a progress-log message.
#[derive(Debug, Error)]
pub enum DfuError {
    /// USB control transfer failed.
    #[error("USB transfer error: {0}")]
    Usb(#[from] nusb::transfer::TransferError),

    /// Standard I/O error (device open / interface claim / file read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No DFU-capable device found on the bus.
    #[error("no DFU device found")]
    NoDeviceFound,

    /// The OS denied access to the USB device.
    #[error("permission denied opening USB device")]
    PermissionDenied,

    /// Another part of the application already owns the USB session.
    #[error("USB session already in use")]
    SessionBusy,

    /// The device did not reach an idle state within the wait budget.
    #[error("timed out waiting for idle state")]
    StatusTimeout,

    /// The device reported the DFU error state.
    #[error("device reported error state (status code {status})")]
    DeviceError { status: u8 },

    /// GETSTATUS answered with fewer bytes than the status layout needs.
    #[error("short status response ({len} bytes)")]
    ShortStatus { len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            DfuError::StatusTimeout.to_string(),
            "timed out waiting for idle state"
        );
        assert_eq!(
            DfuError::DeviceError { status: 0x0A }.to_string(),
            "device reported error state (status code 10)"
        );
        assert_eq!(
            DfuError::ShortStatus { len: 2 }.to_string(),
            "short status response (2 bytes)"
        );
    }
}

//! USB transport layer for DFU communication.
//!
//! A thin wrapper over the host's USB stack: find the bootloader, open and
//! claim its interface, and move class control transfers. All retry and
//! timing policy lives in the protocol engine, not here.

use std::io;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use nusb::transfer::{Control, ControlType, Recipient};
use nusb::{Device, DeviceInfo, Interface};

use super::config::{is_dfu_device, CONTROL_TRANSFER_TIMEOUT, DFU_INTERFACE};
use super::error::{DfuError, DfuResult};
use crate::session::SessionToken;

/// Trait for DFU control-transfer operations.
///
/// This abstraction allows mocking the bootloader in engine tests.
#[cfg_attr(test, automock)]
pub trait UsbTransport: Send {
    /// Host-to-device class request on the DFU interface.
    ///
    /// Returns the number of bytes transferred.
    fn control_out(&mut self, request: u8, value: u16, data: &[u8]) -> DfuResult<usize>;

    /// Device-to-host class request on the DFU interface.
    ///
    /// Returns the number of bytes the device answered with.
    fn control_in(&mut self, request: u8, value: u16, buffer: &mut [u8]) -> DfuResult<usize>;
}

/// Find the first DFU-capable device on the bus.
pub fn find_dfu_device() -> Option<DeviceInfo> {
    nusb::list_devices()
        .ok()?
        .find(|d| is_dfu_device(d.vendor_id(), d.product_id()))
}

/// Real transport over an open, claimed USB interface.
///
/// The claim is held for the lifetime of the value and released on drop,
/// which is also what closes the session for the engine.
pub struct NusbTransport {
    // Kept alive so the interface claim stays valid.
    _device: Device,
    interface: Interface,
    timeout: Duration,
    // Bus ownership for the lifetime of the DFU session.
    _session: SessionToken,
}

impl NusbTransport {
    /// Open `info` and claim the DFU interface.
    ///
    /// Fails with [`DfuError::SessionBusy`] while the serial link holds the
    /// bus. There is no separate permission negotiation on desktop hosts: an
    /// access-denied open is surfaced as [`DfuError::PermissionDenied`].
    pub fn open(info: &DeviceInfo) -> DfuResult<Self> {
        let session = SessionToken::acquire().ok_or(DfuError::SessionBusy)?;

        let device = info.open().map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                DfuError::PermissionDenied
            } else {
                DfuError::Io(e)
            }
        })?;
        let interface = device.claim_interface(DFU_INTERFACE)?;

        Ok(Self {
            _device: device,
            interface,
            timeout: CONTROL_TRANSFER_TIMEOUT,
            _session: session,
        })
    }

    fn control(&self, request: u8, value: u16) -> Control {
        Control {
            control_type: ControlType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: u16::from(DFU_INTERFACE),
        }
    }
}

impl UsbTransport for NusbTransport {
    fn control_out(&mut self, request: u8, value: u16, data: &[u8]) -> DfuResult<usize> {
        let n = self
            .interface
            .control_out_blocking(self.control(request, value), data, self.timeout)?;
        Ok(n)
    }

    fn control_in(&mut self, request: u8, value: u16, buffer: &mut [u8]) -> DfuResult<usize> {
        let n = self
            .interface
            .control_in_blocking(self.control(request, value), buffer, self.timeout)?;
        Ok(n)
    }
}

//! USB-DFU firmware update engine for STM32 targets.
//!
//! Reprograms on-chip flash over USB DFU class control transfers, using the
//! vendor's "DfuSe" container format when present.
//!
//! # Protocol Overview
//!
//! A flash operation consists of:
//! 1. **Device lookup** - Find the DFU bootloader by USB VID/PID
//! 2. **Session setup** - Open the device and claim the DFU interface
//! 3. **Container parse** - Split a DfuSe file into segments, or fall back
//!    to a flat binary at the flash base address
//! 4. **Per segment** - Erase the target sector, wait for idle, then stream
//!    the payload in fixed-size DNLOAD chunks with a status wait per chunk
//! 5. **Manifest** - Set the address pointer back to base and issue a
//!    zero-length DNLOAD so the device boots the new firmware
//!
//! # Example
//!
//! ```ignore
//! use microlink::dfu::{find_dfu_device, read_firmware_file, DfuSeEngine, NusbTransport};
//!
//! let info = find_dfu_device().ok_or("no bootloader on the bus")?;
//! let transport = NusbTransport::open(&info)?;
//! let mut engine = DfuSeEngine::new(transport);
//!
//! let image = read_firmware_file("firmware.dfu")?;
//! let ok = engine.flash_firmware(&image, |msg| println!("{msg}")).await;
//! ```

mod config;
mod error;
mod firmware;
mod protocol;
mod transport;

#[cfg(test)]
pub(crate) mod testutil;

// Device identity and tunables
pub use config::{is_dfu_device, DfuTimeouts, FLASH_BASE_ADDRESS, STM32_PIDS, STM32_VID};

// Errors
pub use error::{DfuError, DfuResult};

// Container parsing
pub use firmware::{parse_dfu_file, read_firmware_file, DfuSegment};

// Engine and transport
pub use protocol::{DfuSeEngine, DfuStatus};
pub use transport::{find_dfu_device, NusbTransport, UsbTransport};

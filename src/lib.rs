//! Device communication core for MicroPython boards.
//!
//! Two independent subsystems share this crate:
//!
//! - [`board`] — the serial link: owns the USB serial port, runs the REPL
//!   byte protocol, multiplexes between interactive terminal traffic and
//!   silent machine-driven command execution, and fans incoming data out to
//!   registered listeners.
//! - [`dfu`] — the firmware updater: drives the STM32 USB-DFU bootloader
//!   through erase/program/manifest sequencing, with DfuSe container parsing
//!   and a flat-binary fallback.
//!
//! The two subsystems are mutually exclusive users of a physical device.
//! That exclusion is enforced by [`session::SessionToken`]: each real
//! connection path claims the token before touching hardware and holds it
//! for the lifetime of the session, so the other side's open fails fast
//! instead of corrupting an active transfer.

pub mod board;
pub mod dfu;
pub mod session;

pub use board::{
    find_boards, BoardLink, ConnectionError, ConnectionStatus, ExecutionMode, MicroDevice,
    Terminal,
};
pub use dfu::{
    find_dfu_device, parse_dfu_file, read_firmware_file, DfuError, DfuResult, DfuSeEngine,
    DfuSegment, DfuStatus, DfuTimeouts, NusbTransport, UsbTransport,
};
pub use session::SessionToken;

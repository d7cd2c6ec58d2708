//! Serial-link side of the crate.
//!
//! [`link::BoardLink`] owns the physical port and multiplexes data between a
//! human-typed REPL session and machine-driven silent command execution.
//! [`commands`] holds the stateless REPL control protocol, [`device`] the
//! discovery and status model, and [`terminal`] the REPL-level operations a
//! UI invokes.

pub mod commands;
pub mod device;
pub mod link;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testutil;

pub use device::{find_boards, ConnectionError, ConnectionStatus, MicroDevice};
pub use link::{BoardLink, ExecutionMode};
pub use terminal::Terminal;

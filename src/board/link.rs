//! Serial link manager.
//!
//! Owns exactly one open serial port at a time and mediates all reads and
//! writes to it. Incoming bytes are routed by execution mode: interactive
//! chunks fan out to registered listeners, silent-mode chunks accumulate
//! until the end-of-output marker arrives and the one-shot result callback
//! fires.
//!
//! A background thread performs blocking reads and delivers chunks one at a
//! time, so listeners never observe interleaved partial updates from two
//! read events. Any I/O error on the open port tears the whole link down; a
//! corrupted stream cannot be trusted, and reconnection is always
//! caller-initiated.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use serialport::SerialPort;

use super::commands;
use super::device::{find_boards, pick_board, ConnectionError, ConnectionStatus, MicroDevice};
use crate::session::SessionToken;

/// Fixed line configuration: 115200 baud, 8-N-1.
pub const BAUD_RATE: u32 = 115_200;

/// Budget for a single write before the link is considered broken.
const WRITE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Poll timeout for the background read loop. Short so writers waiting on
/// the port lock are not starved.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(10);

const READ_BUFFER_SIZE: usize = 1024;

/// Routing for incoming bytes.
///
/// Owned exclusively by the link manager; toggled only by the silent-write
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Bytes fan out to registered listeners.
    Interactive,
    /// Bytes accumulate until the silent end marker arrives.
    Script,
}

/// Operations the link needs from an open port.
///
/// Implemented by the real serial port; tests substitute a scripted fake.
pub(crate) trait SerialIo: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()>;
}

struct PortIo(Box<dyn SerialPort>);

impl SerialIo for PortIo {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.0, data)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.0, buffer)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn set_control_lines(&mut self, dtr: bool, rts: bool) -> io::Result<()> {
        self.0
            .write_data_terminal_ready(dtr)
            .and_then(|_| self.0.write_request_to_send(rts))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

type DataListener = Arc<dyn Fn(&str) + Send + Sync>;
type SilentCallback = Box<dyn FnOnce(String) + Send>;

struct SilentState {
    mode: ExecutionMode,
    buffer: String,
    on_result: Option<SilentCallback>,
}

struct Shared {
    port: Mutex<Option<Box<dyn SerialIo>>>,
    silent: Mutex<SilentState>,
    listeners: RwLock<Vec<DataListener>>,
    on_status: Box<dyn Fn(ConnectionStatus) + Send + Sync>,
    running: AtomicBool,
    session: Mutex<Option<SessionToken>>,
}

impl Shared {
    fn emit(&self, status: ConnectionStatus) {
        (self.on_status)(status);
    }

    /// Best-effort teardown. Transport errors are swallowed; the subscriber
    /// always sees `ConnectionLost` so "disconnect requested" and "link
    /// dropped" render identically.
    fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(mut io) = self.port.lock().unwrap().take() {
            io.set_control_lines(false, false).ok();
        }
        self.session.lock().unwrap().take();

        {
            let mut silent = self.silent.lock().unwrap();
            silent.mode = ExecutionMode::Interactive;
            silent.buffer.clear();
            // A pending silent callback is abandoned with the link.
            silent.on_result = None;
        }

        self.emit(ConnectionStatus::Error {
            error: ConnectionError::ConnectionLost,
            message: "Disconnected".to_string(),
        });
    }

    /// Write to the port if open; a write to a closed port is a silent no-op
    /// so fire-and-forget collaborators never crash the caller. A failed
    /// write tears down the whole link.
    fn write_bytes(&self, data: &[u8]) {
        let mut guard = self.port.lock().unwrap();
        let Some(io) = guard.as_mut() else {
            return;
        };

        if let Err(e) = timed_write(&mut **io, data) {
            drop(guard);
            warn!("serial write failed, dropping link: {}", e);
            self.disconnect();
        }
    }

    /// Route one incoming chunk according to the current execution mode.
    fn dispatch(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        let mut silent = self.silent.lock().unwrap();
        match silent.mode {
            ExecutionMode::Script => {
                silent.buffer.push_str(chunk);
                // The marker may arrive whole in this chunk or split across
                // several, so the accumulated buffer is checked as well.
                if commands::is_silent_execution_done(chunk)
                    || commands::is_silent_execution_done(&silent.buffer)
                {
                    let result = commands::trim_silent_result(&silent.buffer);
                    let callback = silent.on_result.take();
                    silent.mode = ExecutionMode::Interactive;
                    silent.buffer.clear();
                    drop(silent);

                    if let Some(callback) = callback {
                        callback(result);
                    }
                }
            }
            ExecutionMode::Interactive => {
                drop(silent);
                // Snapshot under the read lock, deliver outside it: a
                // listener registered mid-delivery joins from the next chunk
                // and never disrupts this one.
                let snapshot: Vec<DataListener> =
                    self.listeners.read().unwrap().clone();
                for listener in snapshot {
                    listener(chunk);
                }
            }
        }
    }
}

fn timed_write(io: &mut dyn SerialIo, data: &[u8]) -> io::Result<()> {
    io.set_timeout(WRITE_TIMEOUT)?;
    io.write_all(data)?;
    io.set_timeout(READ_POLL_TIMEOUT)?;
    Ok(())
}

fn run_read_loop(shared: Arc<Shared>) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    while shared.running.load(Ordering::SeqCst) {
        let read = {
            let mut guard = shared.port.lock().unwrap();
            match guard.as_mut() {
                Some(io) => io.read(&mut buffer),
                None => break,
            }
        };

        match read {
            Ok(0) => continue,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buffer[..n]).into_owned();
                shared.dispatch(&chunk);
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => {
                warn!("serial read failed, dropping link: {}", e);
                shared.disconnect();
                break;
            }
        }
    }

    debug!("read loop stopped");
}

/// The serial link manager.
///
/// Status changes are emitted to the single subscriber passed at
/// construction; data chunks fan out to every registered listener.
pub struct BoardLink {
    shared: Arc<Shared>,
    device: Mutex<Option<MicroDevice>>,
    known_products: Mutex<HashSet<u16>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BoardLink {
    /// Create an unconnected link reporting status changes to `on_status`.
    pub fn new(on_status: impl Fn(ConnectionStatus) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                port: Mutex::new(None),
                silent: Mutex::new(SilentState {
                    mode: ExecutionMode::Interactive,
                    buffer: String::new(),
                    on_result: None,
                }),
                listeners: RwLock::new(Vec::new()),
                on_status: Box::new(on_status),
                running: AtomicBool::new(false),
                session: Mutex::new(None),
            }),
            device: Mutex::new(None),
            known_products: Mutex::new(HashSet::new()),
            reader: Mutex::new(None),
        }
    }

    /// Enumerate attached boards, pick the best match, and open it.
    ///
    /// Emits `Connecting` then `Connected`, or a classified `Error`. No
    /// automatic retry is performed; the caller re-invokes on failure.
    pub fn discover_and_connect(&self) {
        if self.is_connected() {
            self.disconnect();
        }

        let boards = find_boards();
        if boards.is_empty() {
            self.shared
                .emit(ConnectionStatus::error(ConnectionError::NoDevices));
            return;
        }

        let board = {
            let known = self.known_products.lock().unwrap();
            match pick_board(&boards, &known) {
                Some(board) => board,
                None => {
                    self.shared
                        .emit(ConnectionStatus::error(ConnectionError::NoDevices));
                    return;
                }
            }
        };

        // The serial link and the DFU engine may not share the bus.
        let Some(session) = SessionToken::acquire() else {
            self.shared.emit(ConnectionStatus::Error {
                error: ConnectionError::CantOpenPort,
                message: "USB session already in use".to_string(),
            });
            return;
        };

        self.shared.emit(ConnectionStatus::Connecting);

        match open_port(&board.port) {
            Ok(io) => {
                info!("connected to {} ({:04x}:{:04x})", board.port, board.vid, board.pid);
                self.known_products.lock().unwrap().insert(board.pid);
                *self.shared.session.lock().unwrap() = Some(session);
                self.attach(io, board);
            }
            Err(error) => {
                drop(session);
                self.shared.emit(ConnectionStatus::error(error));
            }
        }
    }

    /// Take ownership of an open port and start the background reader.
    fn attach(&self, io: Box<dyn SerialIo>, board: MicroDevice) {
        {
            let mut silent = self.shared.silent.lock().unwrap();
            silent.mode = ExecutionMode::Interactive;
            silent.buffer.clear();
            silent.on_result = None;
        }

        *self.shared.port.lock().unwrap() = Some(io);
        *self.device.lock().unwrap() = Some(board.clone());
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("board-link-reader".to_string())
            .spawn(move || run_read_loop(shared));

        match handle {
            Ok(handle) => {
                *self.reader.lock().unwrap() = Some(handle);
                self.shared.emit(ConnectionStatus::Connected(board));
            }
            Err(_) => {
                self.shared.disconnect();
            }
        }
    }

    /// Tear the link down and notify the subscriber with `ConnectionLost`.
    pub fn disconnect(&self) {
        self.shared.disconnect();
        *self.device.lock().unwrap() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.port.lock().unwrap().is_some()
    }

    /// Snapshot of the currently connected board, if any.
    pub fn device(&self) -> Option<MicroDevice> {
        self.device.lock().unwrap().clone()
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.shared.silent.lock().unwrap().mode
    }

    /// Write `code` wrapped in carriage-return delimiters.
    pub fn write(&self, code: &str) {
        let cmd = format!("{}{}{}", commands::LINE_END, code, commands::LINE_END);
        self.shared.write_bytes(cmd.as_bytes());
    }

    /// Write bytes unmodified (control sequences).
    pub fn write_raw(&self, data: &[u8]) {
        self.shared.write_bytes(data);
    }

    /// Execute `code` silently: the echo is captured and consumed internally
    /// instead of reaching the terminal listeners.
    ///
    /// The interrupt sequence guarantees a clean prompt, the trailing soft
    /// reset produces the end-of-output marker, and `on_result` fires exactly
    /// once with the trimmed output. Issuing a second silent write while one
    /// is pending replaces the pending callback; the earlier caller is never
    /// invoked.
    pub fn write_silently(&self, code: &str, on_result: impl FnOnce(String) + Send + 'static) {
        {
            let mut silent = self.shared.silent.lock().unwrap();
            silent.mode = ExecutionMode::Script;
            silent.buffer.clear();
            silent.on_result = Some(Box::new(on_result));
        }

        self.write_raw(commands::SOFT_INTERRUPT);
        self.write_raw(commands::ENTER_PASTE_MODE);
        self.write(code);
        self.write_raw(commands::SOFT_RESET);
    }

    /// Register an additional byte-stream listener. Multiple listeners are
    /// supported; registration never disrupts an in-progress delivery.
    pub fn add_listener(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.shared
            .listeners
            .write()
            .unwrap()
            .push(Arc::new(listener));
    }

    #[cfg(test)]
    pub(crate) fn attach_for_tests(&self, io: Box<dyn SerialIo>, board: MicroDevice) {
        self.attach(io, board);
    }
}

impl Drop for BoardLink {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.port.lock().unwrap().take();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            handle.join().ok();
        }
    }
}

/// Open `port_name` at the fixed line configuration with DTR/RTS asserted.
fn open_port(port_name: &str) -> Result<Box<dyn SerialIo>, ConnectionError> {
    let mut port = serialport::new(port_name, BAUD_RATE)
        .timeout(READ_POLL_TIMEOUT)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                ConnectionError::PermissionDenied
            }
            _ => ConnectionError::CantOpenPort,
        })?;

    port.write_data_terminal_ready(true)
        .and_then(|_| port.write_request_to_send(true))
        .map_err(|_| ConnectionError::CantOpenPort)?;

    Ok(Box::new(PortIo(port)))
}

//! Shared test doubles for the board-side tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::device::{ConnectionStatus, MicroDevice};
use super::link::SerialIo;

/// A board fixture the link tests attach to.
pub(crate) fn micropython_board() -> MicroDevice {
    MicroDevice {
        port: "/dev/ttyACM0".to_string(),
        vid: 0x2E8A,
        pid: 0x0005,
        product: Some("Pyboard".to_string()),
        manufacturer: Some("MicroPython".to_string()),
        serial_number: Some("385B39283033".to_string()),
        is_micropython: true,
    }
}

#[derive(Default)]
struct FakeState {
    writes: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    break_reads: AtomicBool,
}

/// Test-side handle to a scripted serial port: feed bytes the link will
/// read, inspect bytes the link wrote, and inject failures.
pub(crate) struct FakePort {
    tx: Sender<Vec<u8>>,
    state: Arc<FakeState>,
}

impl FakePort {
    pub fn new() -> (FakePort, Box<dyn SerialIo>) {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(FakeState::default());
        let io = FakeIo {
            rx,
            state: Arc::clone(&state),
        };
        (FakePort { tx, state }, Box::new(io))
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.tx.send(bytes.to_vec()).unwrap();
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.writes.lock().unwrap().clone()
    }

    pub fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn break_reads(&self) {
        self.state.break_reads.store(true, Ordering::SeqCst);
    }
}

struct FakeIo {
    rx: Receiver<Vec<u8>>,
    state: Arc<FakeState>,
}

impl SerialIo for FakeIo {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.state.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if self.state.break_reads.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        match self.rx.recv_timeout(Duration::from_millis(10)) {
            Ok(data) => {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            // A dropped test handle just looks like a quiet line.
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::from(io::ErrorKind::TimedOut))
            }
        }
    }

    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn set_control_lines(&mut self, _dtr: bool, _rts: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Captures every status emission for later assertions.
#[derive(Default, Clone)]
pub(crate) struct StatusRecorder {
    statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
}

impl StatusRecorder {
    pub fn listener(&self) -> impl Fn(ConnectionStatus) + Send + Sync + 'static {
        let statuses = Arc::clone(&self.statuses);
        move |status| statuses.lock().unwrap().push(status)
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

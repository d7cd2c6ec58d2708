//! REPL-level operations composed from link writes.
//!
//! Everything here is a thin orchestration over [`BoardLink`]: interrupt and
//! reset sequences, code evaluation, and script execution. The UI layer calls
//! these and renders whatever comes back through its listeners.

use std::sync::Arc;
use std::time::Duration;

use super::commands;
use super::device::MicroDevice;
use super::link::BoardLink;

/// Settle time after a soft reset before more input is pushed at the board.
const RESET_SETTLE: Duration = Duration::from_millis(100);

pub struct Terminal {
    link: Arc<BoardLink>,
}

impl Terminal {
    pub fn new(link: Arc<BoardLink>) -> Self {
        Self { link }
    }

    /// Interrupt whatever is currently running.
    pub fn terminate(&self) {
        self.link.write_raw(commands::SOFT_INTERRUPT);
    }

    /// Hard-reset the board. Only MicroPython targets expose `machine.reset`.
    pub fn reset(&self, device: &MicroDevice) {
        let cmd = if device.is_micropython {
            "machine.reset()"
        } else {
            ""
        };
        self.link.write(cmd);
    }

    /// Soft-reset the interpreter, keeping the connection.
    pub fn soft_reset(&self) {
        self.link.write_raw(commands::SOFT_RESET);
    }

    /// Evaluate a single line of code interactively.
    pub fn eval(&self, code: &str) {
        self.link.write(code.trim());
    }

    /// Evaluate a multi-line block by folding newlines into carriage returns.
    pub fn eval_multiline(&self, code: &str) {
        self.link.write(code.replace('\n', "\r").trim());
        self.link.write(commands::LINE_END);
    }

    /// Run a script stored on the board: enter its directory and import it.
    ///
    /// `name` is the module name without extension.
    pub fn run_script(&self, name: &str, dir: &str) {
        self.link.write_raw(commands::SOFT_RESET);
        self.link.write(&commands::change_dir(dir));
        self.link.write(&format!("import {}", name));
        self.link.write_raw(commands::SOFT_RESET);
        self.link.write_raw(commands::ENTER_REPL);
    }

    /// Run a script held on the host by pasting its body to the board.
    pub fn run_local_script(&self, content: &str) {
        self.link.write_raw(commands::SOFT_RESET);
        std::thread::sleep(RESET_SETTLE);
        self.link.write_raw(commands::ENTER_PASTE_MODE);
        self.link.write_raw(format!("print()\r\n{}", content).as_bytes());
        self.link.write_raw(commands::SOFT_RESET);
        self.link.write_raw(commands::ENTER_REPL);
    }

    /// Send a raw command string unmodified.
    pub fn send(&self, command: &str) {
        self.link.write_raw(command.as_bytes());
    }

    /// Probe the board's identity without surfacing the exchange in the
    /// terminal. The answer carries the `#ID:` tag the UI layer scans for.
    pub fn probe_device_id(&self, on_result: impl FnOnce(String) + Send + 'static) {
        let probe = commands::device_id_probe(commands::DEVICE_ID_EXPR);
        self.link.write_silently(probe.trim_end(), on_result);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{micropython_board, FakePort, StatusRecorder};
    use super::*;

    fn terminal_over_fake() -> (Terminal, FakePort) {
        let recorder = StatusRecorder::default();
        let link = Arc::new(BoardLink::new(recorder.listener()));
        let (fake, io) = FakePort::new();
        link.attach_for_tests(io, micropython_board());
        (Terminal::new(link), fake)
    }

    #[test]
    fn test_terminate_sends_double_interrupt() {
        let (terminal, fake) = terminal_over_fake();

        terminal.terminate();

        assert_eq!(fake.writes(), vec![b"\x03\x03".to_vec()]);
    }

    #[test]
    fn test_reset_micropython_board() {
        let (terminal, fake) = terminal_over_fake();

        terminal.reset(&micropython_board());

        assert_eq!(fake.writes(), vec![b"\rmachine.reset()\r".to_vec()]);
    }

    #[test]
    fn test_run_script_changes_dir_and_imports() {
        let (terminal, fake) = terminal_over_fake();

        terminal.run_script("blink", "/scripts");

        let writes = fake.writes();
        assert_eq!(writes[0], b"\x04".to_vec());
        assert_eq!(writes[1], b"\rimport os\ros.chdir('/scripts')\r".to_vec());
        assert_eq!(writes[2], b"\rimport blink\r".to_vec());
        assert_eq!(writes[3], b"\x04".to_vec());
        assert_eq!(writes[4], b"\x02".to_vec());
    }

    #[test]
    fn test_run_local_script_brackets_body_with_paste_mode() {
        let (terminal, fake) = terminal_over_fake();

        terminal.run_local_script("print('hi')");

        let writes = fake.writes();
        assert_eq!(writes[0], b"\x04".to_vec());
        assert_eq!(writes[1], b"\x05".to_vec());
        assert_eq!(writes[2], b"print()\r\nprint('hi')".to_vec());
        assert_eq!(writes[3], b"\x04".to_vec());
        assert_eq!(writes[4], b"\x02".to_vec());
    }

    #[test]
    fn test_probe_device_id_round_trip() {
        let (terminal, fake) = terminal_over_fake();

        let (tx, rx) = std::sync::mpsc::channel();
        terminal.probe_device_id(move |result| tx.send(result).unwrap());

        fake.feed(b"print('#ID:' + getattr(machine, 'DEVICE_ID', 'Basic'))\r\n");
        fake.feed(b"#ID:Basic\r\n");
        fake.feed(b"MPY: soft reboot\r\n");

        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, "#ID:Basic");
    }
}

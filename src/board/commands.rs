//! MicroPython REPL control sequences and silent-execution helpers.
//!
//! Stateless building blocks used by the link manager: the well-known
//! control bytes understood by the MicroPython REPL, the marker that ends a
//! silent command's echo, and builders for composite command strings.

// ============================================================================
// REPL Control Bytes
// ============================================================================

/// Interrupt a running program (Ctrl-C). Sent twice so a second interrupt
/// lands even if the first one is consumed by a blocking read on the board.
pub const SOFT_INTERRUPT: &[u8] = b"\x03\x03";

/// Soft-reset the interpreter (Ctrl-D at the prompt).
pub const SOFT_RESET: &[u8] = b"\x04";

/// Return to the friendly interactive REPL (Ctrl-B).
pub const ENTER_REPL: &[u8] = b"\x02";

/// Begin a silent/paste block (Ctrl-E). Terminated with [`EXIT_PASTE_MODE`].
pub const ENTER_PASTE_MODE: &[u8] = b"\x05";

/// End a paste block and execute it (Ctrl-D inside paste mode).
pub const EXIT_PASTE_MODE: &[u8] = b"\x04";

/// Universal line terminator for command submission and input echo.
pub const LINE_END: &str = "\r";

// ============================================================================
// Silent Execution Markers
// ============================================================================

/// Banner the interpreter prints after the soft reset that closes every
/// silent write. Its arrival means the command's full echo is in the buffer.
pub const SILENT_DONE_MARKER: &str = "MPY: soft reboot";

/// Prefix of the identification probe's answer, scanned for by the UI layer.
pub const DEVICE_ID_PREFIX: &str = "#ID:";

/// Python expression probed for the board's identity. Boards that do not
/// define the attribute answer with the fallback name.
pub const DEVICE_ID_EXPR: &str = "getattr(machine, 'DEVICE_ID', 'Basic')";

/// True once `buffer` contains the end-of-silent-output marker.
///
/// The marker can arrive split across read chunks, so callers check both the
/// latest chunk and the full accumulated buffer.
pub fn is_silent_execution_done(buffer: &str) -> bool {
    buffer.contains(SILENT_DONE_MARKER)
}

/// Strip the echoed input and the end marker from a silent-execution buffer,
/// returning only the meaningful output text.
pub fn trim_silent_result(buffer: &str) -> String {
    let body = match buffer.find(SILENT_DONE_MARKER) {
        Some(end) => &buffer[..end],
        None => buffer,
    };

    // The first line is the echo of the submitted command; later prompt
    // artifacts show up when the board replays its banner.
    let output: Vec<&str> = body
        .lines()
        .skip(1)
        .map(str::trim_end)
        .filter(|line| {
            let t = line.trim_start();
            !t.is_empty()
                && !t.starts_with(">>>")
                && !t.starts_with("===")
                && !t.starts_with("paste mode")
        })
        .collect();

    output.join("\n").trim().to_string()
}

// ============================================================================
// Command Builders
// ============================================================================

/// Build the command that changes the interpreter's working directory.
pub fn change_dir(path: &str) -> String {
    format!("import os\ros.chdir('{}')", path)
}

/// Build the identification probe: interrupt twice for a clean prompt, then
/// print the board identity with the [`DEVICE_ID_PREFIX`] tag.
pub fn device_id_probe(id_expr: &str) -> String {
    format!("\x03\x03\r\nprint('{}' + {})\r\n", DEVICE_ID_PREFIX, id_expr)
}

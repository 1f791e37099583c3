//! Raw byte relay between the controlling terminal and the child.
//!
//! Once the login is done the real terminal goes into raw mode and every
//! keystroke goes straight to the child, Ctrl-C included. Output keeps
//! arriving through the same channel the matcher used.

use std::io::{self, IsTerminal, Read, Write};

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use hopper_expect::{ByteSource, Chunk, Interrupt, POLL_SLICE};

use crate::pty::PtyError;

/// Why the relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The child closed its output (it exited or hung up).
    ChildClosed,
    /// The operator interrupt was raised, e.g. by SIGTERM.
    Interrupted,
}

/// Puts the controlling terminal in raw mode and restores it on drop.
///
/// Does nothing when stdin is not a terminal.
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn enter() -> Result<Self, PtyError> {
        if !io::stdin().is_terminal() {
            log::debug!("stdin is not a terminal, relaying without raw mode");
            return Ok(Self { enabled: false });
        }
        enable_raw_mode().map_err(|e| PtyError::Terminal(format!("failed to enable raw mode: {e}")))?;
        Ok(Self { enabled: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = disable_raw_mode() {
                log::warn!("failed to restore terminal mode: {e}");
            }
        }
    }
}

/// Relay stdin to `writer` and `source` to stdout until the child closes.
///
/// `pending` is output that arrived before the handoff but was never
/// consumed by a match, as raw bytes; it is written first.
pub(crate) fn relay<S: ByteSource>(
    pending: Vec<u8>,
    source: &mut S,
    writer: Box<dyn Write + Send>,
    interrupt: Option<&Interrupt>,
) -> Result<RelayEnd, PtyError> {
    let _raw = RawModeGuard::enter()?;

    let mut stdout = io::stdout().lock();
    if !pending.is_empty() {
        stdout.write_all(&pending)?;
        stdout.flush()?;
    }

    start_input_pump(io::stdin(), writer)?;
    relay_output(source, &mut stdout, interrupt)
}

/// Copy child output to `out` until the source closes or `interrupt` is raised.
fn relay_output<S: ByteSource, W: Write>(
    source: &mut S,
    out: &mut W,
    interrupt: Option<&Interrupt>,
) -> Result<RelayEnd, PtyError> {
    loop {
        if interrupt.is_some_and(Interrupt::is_raised) {
            return Ok(RelayEnd::Interrupted);
        }
        match source.next_chunk(POLL_SLICE) {
            Chunk::Data(bytes) => {
                out.write_all(&bytes)?;
                out.flush()?;
            }
            Chunk::Idle => {}
            Chunk::Closed => return Ok(RelayEnd::ChildClosed),
        }
    }
}

/// Forward operator keystrokes to the child on a background thread.
///
/// The thread is left blocked in `read` when the child exits; it goes away
/// with the process.
fn start_input_pump<R: Read + Send + 'static>(
    input: R,
    writer: Box<dyn Write + Send>,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-relay".to_string())
        .spawn(move || pump_input(input, writer))?;
    Ok(())
}

fn pump_input<R: Read, W: Write>(mut input: R, mut writer: W) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("stdin relay ended: {e}");
                return;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
            log::debug!("child input closed: {e}");
            return;
        }
    }
}

//! Asking the person at the keyboard for a one-time passcode.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};

use hopper_expect::{Interrupt, POLL_SLICE};

/// Source of one-time passcodes.
pub trait Operator {
    /// Ask for a code. `None` means no code is coming (interrupted, or the
    /// input was closed).
    fn one_time_code(&mut self) -> Option<String>;
}

/// Prompts on stdout and reads a line from stdin.
pub struct TerminalOperator {
    interrupt: Interrupt,
}

impl TerminalOperator {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

impl Operator for TerminalOperator {
    fn one_time_code(&mut self) -> Option<String> {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "Enter your 2FA code: ");
        let _ = stdout.flush();

        // The read happens on a helper thread so an interrupt is noticed
        // while the operator is still typing.
        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("otp-prompt".to_string())
            .spawn(move || {
                let _ = tx.send(read_code(io::stdin().lock()));
            });
        if let Err(e) = spawned {
            log::warn!("could not start prompt thread: {e}");
            return read_code(io::stdin().lock());
        }

        loop {
            if self.interrupt.is_raised() {
                return None;
            }
            match rx.recv_timeout(POLL_SLICE) {
                Ok(code) => return code,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Read one line, dropping only the line terminator.
fn read_code<R: BufRead>(mut input: R) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Some(line)
        }
        Err(e) => {
            log::warn!("failed to read passcode: {e}");
            None
        }
    }
}

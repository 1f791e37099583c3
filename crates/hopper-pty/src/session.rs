use std::sync::mpsc::{self as std_mpsc, Receiver};
use std::sync::{Arc, Mutex};

use hopper_expect::{Conversation, ExpectBuffer, Expectation, Interrupt, Matcher, Outcome};
use tokio::sync::mpsc;

use crate::io_thread::start_io_thread;
use crate::passthrough;
use crate::pty::{master_size, resize_master, PtyDimensions, PtyError, PtyHandle, SharedMaster};

/// Where a session is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Output is being pattern-matched and answered.
    Authenticating,
    /// Raw bytes are relayed between the real terminal and the child.
    Passthrough,
    /// The child has exited or the session was dropped.
    Closed,
}

/// How passthrough ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughEnd {
    /// The child exited on its own with this status.
    ChildExited(u32),
    /// The operator interrupt was raised and the child was killed.
    Interrupted,
}

type SharedLifecycle = Arc<Mutex<Lifecycle>>;

fn read_lifecycle(cell: &SharedLifecycle) -> Lifecycle {
    cell.lock().map(|l| *l).unwrap_or(Lifecycle::Closed)
}

fn set_lifecycle(cell: &SharedLifecycle, next: Lifecycle) {
    if let Ok(mut current) = cell.lock() {
        log::debug!("session {:?} -> {next:?}", *current);
        *current = next;
    }
}

/// Cloneable handle for resizing the session's PTY from another thread.
#[derive(Clone)]
pub struct ResizeHandle {
    master: SharedMaster,
    lifecycle: SharedLifecycle,
}

impl ResizeHandle {
    /// Update the PTY window size. Ignored once the session is closed.
    pub fn resize(&self, dimensions: PtyDimensions) -> Result<(), PtyError> {
        if read_lifecycle(&self.lifecycle) == Lifecycle::Closed {
            log::debug!("ignoring resize of closed session");
            return Ok(());
        }
        resize_master(&self.master, dimensions)
    }

    /// Size as currently reported by the PTY.
    pub fn size(&self) -> Result<PtyDimensions, PtyError> {
        master_size(&self.master)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        read_lifecycle(&self.lifecycle)
    }
}

/// Session settings beyond the command and size.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Raised by the operator to abandon waits and the passthrough relay.
    pub interrupt: Option<Interrupt>,
    /// Cap on unconsumed output; `None` uses the matcher default.
    pub max_buffer: Option<usize>,
}

/// A child process on a PTY, driven line by line until it is handed over
/// to the real terminal.
pub struct Session {
    pty: PtyHandle,
    matcher: Matcher<Receiver<Vec<u8>>>,
    lifecycle: SharedLifecycle,
    interrupt: Option<Interrupt>,
    write_error: Option<PtyError>,
    io_stop: mpsc::Sender<()>,
}

impl Session {
    /// Spawn `command` on a PTY of `dimensions` and start reading its output.
    pub fn spawn(
        command: &str,
        dimensions: PtyDimensions,
        options: SessionOptions,
    ) -> Result<Self, PtyError> {
        let mut pty = PtyHandle::spawn(command, dimensions)?;
        let reader = pty
            .take_reader()
            .ok_or_else(|| PtyError::SpawnFailed("PTY reader unavailable".to_string()))?;

        let (output_tx, output_rx) = std_mpsc::channel();
        let (io_stop, stop_rx) = mpsc::channel(1);
        start_io_thread(reader, output_tx, stop_rx)?;

        let buffer = options
            .max_buffer
            .map(ExpectBuffer::with_capacity_limit)
            .unwrap_or_default();
        let mut matcher = Matcher::with_buffer(output_rx, buffer);
        if let Some(interrupt) = options.interrupt.clone() {
            matcher = matcher.with_interrupt(interrupt);
        }

        Ok(Self {
            pty,
            matcher,
            lifecycle: Arc::new(Mutex::new(Lifecycle::Authenticating)),
            interrupt: options.interrupt,
            write_error: None,
            io_stop,
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        read_lifecycle(&self.lifecycle)
    }

    /// A handle the resize listener can keep for the life of the process.
    pub fn resize_handle(&self) -> ResizeHandle {
        ResizeHandle {
            master: self.pty.shared_master(),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    pub fn resize(&self, dimensions: PtyDimensions) -> Result<(), PtyError> {
        self.pty.resize(dimensions)
    }

    pub fn size(&self) -> Result<PtyDimensions, PtyError> {
        self.pty.size()
    }

    /// Hand the child over to the controlling terminal.
    ///
    /// Output received since the last match is replayed first, byte for
    /// byte. Blocks until the child closes its output or the operator
    /// interrupt is raised. The session is consumed; nothing can be matched
    /// against it afterwards.
    pub fn enter_passthrough(mut self) -> Result<PassthroughEnd, PtyError> {
        set_lifecycle(&self.lifecycle, Lifecycle::Passthrough);

        let writer = self.pty.take_writer().ok_or_else(|| {
            PtyError::Terminal("PTY writer unavailable for passthrough".to_string())
        })?;
        let pending = self.matcher.take_raw();
        let interrupt = self.interrupt.clone();

        let result = passthrough::relay(
            pending,
            self.matcher.source_mut(),
            writer,
            interrupt.as_ref(),
        );

        let code = match result {
            Ok(passthrough::RelayEnd::ChildClosed) => {
                self.pty.wait().map(PassthroughEnd::ChildExited)
            }
            Ok(passthrough::RelayEnd::Interrupted) => {
                self.pty.kill();
                Ok(PassthroughEnd::Interrupted)
            }
            Err(e) => {
                self.pty.kill();
                Err(e)
            }
        };
        set_lifecycle(&self.lifecycle, Lifecycle::Closed);
        code
    }
}

impl Conversation for Session {
    fn send_line(&mut self, text: &str) {
        if self.write_error.is_some() {
            return;
        }
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        if let Err(e) = self.pty.write(&line) {
            log::warn!("failed to write to child: {e}");
            self.write_error = Some(e);
        }
    }

    /// A failed `send_line` shows up here as end of stream.
    fn await_pattern(&mut self, expectation: &Expectation) -> Outcome {
        if let Some(e) = &self.write_error {
            log::debug!("not waiting, earlier write failed: {e}");
            return Outcome::EndOfStream;
        }
        self.matcher.await_pattern(expectation)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.io_stop.try_send(());
        if read_lifecycle(&self.lifecycle) != Lifecycle::Closed {
            self.pty.kill();
            set_lifecycle(&self.lifecycle, Lifecycle::Closed);
        }
    }
}

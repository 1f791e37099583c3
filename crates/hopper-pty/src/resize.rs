//! Forwarding of controlling-terminal resizes to the child's PTY.

use std::thread::JoinHandle;

use signal_hook::consts::SIGWINCH;
use signal_hook::iterator::{Handle, Signals};

use crate::pty::{PtyDimensions, PtyError};
use crate::session::ResizeHandle;

/// Anything whose window size can be updated from the resize listener.
pub trait ResizeTarget: Send + 'static {
    fn resize(&self, dimensions: PtyDimensions) -> Result<(), PtyError>;
}

impl ResizeTarget for ResizeHandle {
    fn resize(&self, dimensions: PtyDimensions) -> Result<(), PtyError> {
        ResizeHandle::resize(self, dimensions)
    }
}

/// Size of the controlling terminal, or 24x80 if it cannot be determined.
pub fn terminal_dimensions() -> PtyDimensions {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => PtyDimensions::new(rows, cols),
        Ok(_) => PtyDimensions::FALLBACK,
        Err(e) => {
            log::debug!("terminal size unavailable ({e}), using fallback");
            PtyDimensions::FALLBACK
        }
    }
}

/// Background listener that re-reads the terminal size on every SIGWINCH
/// and posts it to a [`ResizeTarget`].
///
/// It never touches the output stream, so it is safe while a wait or the
/// passthrough relay is in progress. Dropping it stops the listener.
pub struct ResizePropagator {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl ResizePropagator {
    /// Start listening, sizing from the controlling terminal.
    pub fn start<T: ResizeTarget>(target: T) -> Result<Self, PtyError> {
        Self::with_query(target, terminal_dimensions)
    }

    /// Start listening with a custom size query.
    pub fn with_query<T, Q>(target: T, query: Q) -> Result<Self, PtyError>
    where
        T: ResizeTarget,
        Q: Fn() -> PtyDimensions + Send + 'static,
    {
        let mut signals = Signals::new([SIGWINCH])?;
        let handle = signals.handle();

        let thread = std::thread::Builder::new()
            .name("resize".to_string())
            .spawn(move || {
                for _ in signals.forever() {
                    let dimensions = query();
                    log::debug!(
                        "terminal resized to {}x{}",
                        dimensions.cols,
                        dimensions.rows
                    );
                    if let Err(e) = target.resize(dimensions) {
                        log::warn!("{e}");
                    }
                }
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stop listening and wait for the listener thread to finish.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ResizePropagator {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

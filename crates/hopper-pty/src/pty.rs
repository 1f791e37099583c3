use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug)]
pub enum PtyError {
    SpawnFailed(String),
    IoError(std::io::Error),
    ResizeFailed(String),
    Terminal(String),
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::SpawnFailed(msg) => write!(f, "PTY spawn failed: {msg}"),
            PtyError::IoError(err) => write!(f, "PTY I/O error: {err}"),
            PtyError::ResizeFailed(msg) => write!(f, "PTY resize failed: {msg}"),
            PtyError::Terminal(msg) => write!(f, "terminal error: {msg}"),
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PtyError {
    fn from(err: std::io::Error) -> Self {
        PtyError::IoError(err)
    }
}

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtyDimensions {
    pub rows: u16,
    pub cols: u16,
}

impl PtyDimensions {
    /// Size assumed when the controlling terminal cannot be queried.
    pub const FALLBACK: PtyDimensions = PtyDimensions { rows: 24, cols: 80 };

    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for PtyDimensions {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl From<PtySize> for PtyDimensions {
    fn from(size: PtySize) -> Self {
        Self {
            rows: size.rows,
            cols: size.cols,
        }
    }
}

/// Shared PTY master, so resizes can come from another thread.
pub(crate) type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

/// Owns a portable-pty child process, master, reader, and writer.
pub struct PtyHandle {
    master: SharedMaster,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Spawn `command` on a new PTY of the given size.
    ///
    /// The command line is split on whitespace into program and arguments;
    /// no shell quoting is interpreted. The child starts in the current
    /// working directory.
    pub fn spawn(command: &str, dimensions: PtyDimensions) -> Result<Self, PtyError> {
        let mut words = command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| PtyError::SpawnFailed("empty command".to_string()))?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(dimensions.to_pty_size())
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(words);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("failed to spawn {program}: {e}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to take writer: {e}")))?;

        log::debug!(
            "spawned {program} on a {}x{} PTY",
            dimensions.cols,
            dimensions.rows
        );

        Ok(Self {
            master: Arc::new(Mutex::new(pair.master)),
            reader: Some(reader),
            writer: Some(writer),
            child,
        })
    }

    /// Resize the PTY.
    pub fn resize(&self, dimensions: PtyDimensions) -> Result<(), PtyError> {
        resize_master(&self.master, dimensions)
    }

    /// Current size as reported by the PTY.
    pub fn size(&self) -> Result<PtyDimensions, PtyError> {
        master_size(&self.master)
    }

    pub(crate) fn shared_master(&self) -> SharedMaster {
        Arc::clone(&self.master)
    }

    /// Write bytes to the PTY master (our input -> child).
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            PtyError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "PTY writer was handed off",
            ))
        })?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Take the PTY reader for a dedicated I/O thread. Returns `None` if
    /// it was already taken.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Take the PTY writer, e.g. for a stdin relay thread.
    pub fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Block until the child exits.
    pub fn wait(&mut self) -> Result<u32, PtyError> {
        Ok(self.child.wait()?.exit_code())
    }

    /// Kill the child if it is still running.
    pub fn kill(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                log::debug!("failed to kill child: {e}");
            }
            let _ = self.child.wait();
        }
    }
}

pub(crate) fn resize_master(master: &SharedMaster, dimensions: PtyDimensions) -> Result<(), PtyError> {
    let master = master
        .lock()
        .map_err(|_| PtyError::ResizeFailed("PTY master lock poisoned".to_string()))?;
    master
        .resize(dimensions.to_pty_size())
        .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
}

pub(crate) fn master_size(master: &SharedMaster) -> Result<PtyDimensions, PtyError> {
    let master = master
        .lock()
        .map_err(|_| PtyError::ResizeFailed("PTY master lock poisoned".to_string()))?;
    master
        .get_size()
        .map(PtyDimensions::from)
        .map_err(|e| PtyError::ResizeFailed(format!("{e}")))
}

//! hopper-pty: the child process, its PTY, and the handoff to the real terminal.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: Low-level PTY process management (spawn, write, resize, reap).
//! - [`Session`]: A `PtyHandle` plus an I/O thread and a matcher; the line-in,
//!   pattern-out side used during login, then [`Session::enter_passthrough`].
//! - [`ResizeHandle`] / [`ResizePropagator`]: SIGWINCH-driven window size updates
//!   that may arrive at any point in the session's life.

pub mod io_thread;
pub mod passthrough;
pub mod pty;
pub mod resize;
pub mod session;

pub use passthrough::RelayEnd;
pub use pty::{PtyDimensions, PtyError, PtyHandle};
pub use resize::{terminal_dimensions, ResizePropagator, ResizeTarget};
pub use session::{Lifecycle, PassthroughEnd, ResizeHandle, Session, SessionOptions};

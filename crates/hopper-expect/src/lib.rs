//! hopper-expect: expect/respond matching over a child's terminal output.
//!
//! # Architecture
//!
//! - [`Pattern`] / [`Expectation`]: what to wait for, and for how long.
//! - [`ExpectBuffer`]: decoded, escape-stripped output not yet consumed.
//! - [`ByteSource`]: where output comes from (a reader-thread channel in
//!   production, [`ScriptedSource`] in tests).
//! - [`Matcher`]: waits for the first pattern to match, the stream to
//!   close, the timeout to pass, or an [`Interrupt`].
//! - [`Conversation`]: the send-line / await-pattern seam the login state
//!   machine is written against.

pub mod buffer;
pub mod interrupt;
pub mod matcher;
pub mod pattern;
pub mod source;

pub use buffer::{ExpectBuffer, DEFAULT_MAX_BUFFER};
pub use interrupt::Interrupt;
pub use matcher::{Conversation, Matcher, Outcome, POLL_SLICE};
pub use pattern::{Expectation, Pattern, PatternError};
pub use source::{ByteSource, Chunk, ScriptedSource};

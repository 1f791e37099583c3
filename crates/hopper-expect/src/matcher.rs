use std::time::{Duration, Instant};

use crate::buffer::ExpectBuffer;
use crate::interrupt::Interrupt;
use crate::pattern::Expectation;
use crate::source::{ByteSource, Chunk};

/// How long a single poll of the source may block before the interrupt
/// flag and deadline are checked again.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Result of one wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Pattern `index` of the expectation matched.
    Matched {
        index: usize,
        /// Text consumed ahead of the match.
        before: String,
        /// The matched text itself.
        text: String,
    },
    /// The child closed its output before anything matched.
    EndOfStream,
    /// Nothing matched within the expectation's timeout.
    TimedOut,
    /// The operator interrupted the wait.
    Interrupted,
}

impl Outcome {
    /// Index of the matched pattern, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Outcome::Matched { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Something the authenticator can talk to: a line goes in, patterns come out.
pub trait Conversation {
    /// Send `text` followed by a line terminator.
    fn send_line(&mut self, text: &str);

    /// Wait for the first of the expectation's patterns.
    fn await_pattern(&mut self, expectation: &Expectation) -> Outcome;
}

/// Incremental pattern matcher over a [`ByteSource`].
pub struct Matcher<S> {
    source: S,
    buffer: ExpectBuffer,
    interrupt: Option<Interrupt>,
    closed: bool,
}

impl<S: ByteSource> Matcher<S> {
    pub fn new(source: S) -> Self {
        Self::with_buffer(source, ExpectBuffer::new())
    }

    pub fn with_buffer(source: S, buffer: ExpectBuffer) -> Self {
        Self {
            source,
            buffer,
            interrupt: None,
            closed: false,
        }
    }

    /// Abort waits with [`Outcome::Interrupted`] once `interrupt` is raised.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Text received but not consumed by any match.
    pub fn buffered(&self) -> &str {
        self.buffer.as_str()
    }

    /// Take the unconsumed output as the raw bytes it arrived as.
    pub fn take_raw(&mut self) -> Vec<u8> {
        self.buffer.take_raw()
    }

    /// Wait until one of the patterns matches the unconsumed output.
    ///
    /// After every appended chunk the patterns are tried in list order and
    /// the first hit wins. The buffer is consumed through the end of the
    /// match.
    pub fn await_pattern(&mut self, expectation: &Expectation) -> Outcome {
        let deadline = Instant::now() + expectation.timeout();

        loop {
            if let Some((index, start, end)) = expectation.first_match(self.buffer.as_str()) {
                let mut before = self.buffer.consume(end);
                let text = before.split_off(start);
                log::debug!(
                    "matched {} (pattern {index})",
                    expectation.patterns()[index]
                );
                return Outcome::Matched {
                    index,
                    before,
                    text,
                };
            }

            if self.closed {
                log::debug!("end of stream with {} bytes unmatched", self.buffer.len());
                return Outcome::EndOfStream;
            }

            if self.interrupt.as_ref().is_some_and(Interrupt::is_raised) {
                return Outcome::Interrupted;
            }

            let now = Instant::now();
            if now >= deadline {
                log::debug!("timed out after {:?}", expectation.timeout());
                return Outcome::TimedOut;
            }

            match self.source.next_chunk(POLL_SLICE.min(deadline - now)) {
                Chunk::Data(bytes) => self.buffer.push(&bytes),
                Chunk::Idle => {}
                Chunk::Closed => self.closed = true,
            }
        }
    }
}

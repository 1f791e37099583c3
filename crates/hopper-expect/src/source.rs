use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

/// One poll of a byte source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes produced by the child.
    Data(Vec<u8>),
    /// Nothing arrived within the poll slice.
    Idle,
    /// The child closed its output. Every later poll returns `Closed` too.
    Closed,
}

/// A stream of child output the matcher can poll with a timeout.
pub trait ByteSource {
    /// Wait up to `timeout` for the next chunk.
    fn next_chunk(&mut self, timeout: Duration) -> Chunk;
}

/// Chunks forwarded by a reader thread. A dropped sender means end of stream.
impl ByteSource for Receiver<Vec<u8>> {
    fn next_chunk(&mut self, timeout: Duration) -> Chunk {
        match self.recv_timeout(timeout) {
            Ok(bytes) => Chunk::Data(bytes),
            Err(RecvTimeoutError::Timeout) => Chunk::Idle,
            Err(RecvTimeoutError::Disconnected) => Chunk::Closed,
        }
    }
}

/// A fixed list of chunks, handed out one per poll.
///
/// Once drained it reports `Idle` forever, or `Closed` if built with
/// [`ScriptedSource::closing`].
#[derive(Debug, Default)]
pub struct ScriptedSource {
    chunks: VecDeque<Vec<u8>>,
    close_when_drained: bool,
}

impl ScriptedSource {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            close_when_drained: false,
        }
    }

    /// Same as [`ScriptedSource::new`], but report `Closed` once drained.
    pub fn closing<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            close_when_drained: true,
            ..Self::new(chunks)
        }
    }

    /// Queue more output, e.g. a scripted reply to a line the caller sent.
    pub fn push(&mut self, bytes: impl Into<Vec<u8>>) {
        self.chunks.push_back(bytes.into());
    }

    /// Whether a drained source reports `Closed` rather than `Idle`.
    pub fn set_close_when_drained(&mut self, close: bool) {
        self.close_when_drained = close;
    }
}

impl ByteSource for ScriptedSource {
    fn next_chunk(&mut self, timeout: Duration) -> Chunk {
        match self.chunks.pop_front() {
            Some(bytes) => Chunk::Data(bytes),
            None if self.close_when_drained => Chunk::Closed,
            None => {
                std::thread::sleep(timeout);
                Chunk::Idle
            }
        }
    }
}

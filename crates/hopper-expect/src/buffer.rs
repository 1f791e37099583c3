//! Decoded output buffer that the matcher scans.
//!
//! Raw PTY bytes go through a `vte` parser so escape sequences (colours,
//! cursor movement, window titles) never reach the patterns, and UTF-8
//! characters split across reads are reassembled. The raw bytes behind the
//! unconsumed text are kept alongside it, so whatever is left over at the
//! end can be replayed to a real terminal unchanged.

use vte::{Parser, Perform};

/// Default cap on unconsumed text.
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

/// Raw bytes kept per byte of text allowed, for output heavy in escapes.
const RAW_PER_TEXT: usize = 4;

/// Collects printable text from the `vte` parser.
#[derive(Default)]
struct TextSink {
    text: String,
}

impl Perform for TextSink {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.text.push(byte as char);
        }
    }
}

/// Text received from the child that no wait has consumed yet.
pub struct ExpectBuffer {
    parser: Parser,
    sink: TextSink,
    max_len: usize,
    /// Bytes as received, from the start of the unconsumed text.
    raw: Vec<u8>,
    /// `(text_end, raw_end)` after every input byte that produced text.
    marks: Vec<(usize, usize)>,
}

impl ExpectBuffer {
    pub fn new() -> Self {
        Self::with_capacity_limit(DEFAULT_MAX_BUFFER)
    }

    /// Create a buffer that keeps at most `max_len` bytes of unconsumed text.
    pub fn with_capacity_limit(max_len: usize) -> Self {
        Self {
            parser: Parser::new(),
            sink: TextSink::default(),
            max_len: max_len.max(1),
            raw: Vec::new(),
            marks: Vec::new(),
        }
    }

    /// Feed raw bytes from the child.
    pub fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let text_len = self.sink.text.len();
            self.raw.push(byte);
            self.parser.advance(&mut self.sink, &[byte]);
            if self.sink.text.len() != text_len {
                self.marks.push((self.sink.text.len(), self.raw.len()));
            }
        }
        self.trim();
    }

    /// Unconsumed text.
    pub fn as_str(&self) -> &str {
        &self.sink.text
    }

    pub fn len(&self) -> usize {
        self.sink.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sink.text.is_empty()
    }

    /// Drop everything up to byte offset `end` and return it.
    pub fn consume(&mut self, end: usize) -> String {
        self.drop_raw_through(end);
        let rest = self.sink.text.split_off(end);
        std::mem::replace(&mut self.sink.text, rest)
    }

    /// Take all unconsumed text.
    pub fn take(&mut self) -> String {
        self.raw.clear();
        self.marks.clear();
        std::mem::take(&mut self.sink.text)
    }

    /// Take the bytes behind the unconsumed text exactly as received,
    /// escape sequences included.
    pub fn take_raw(&mut self) -> Vec<u8> {
        self.sink.text.clear();
        self.marks.clear();
        std::mem::take(&mut self.raw)
    }

    /// Forget the raw bytes that produced the first `text_end` bytes of text.
    fn drop_raw_through(&mut self, text_end: usize) {
        let raw_end = self
            .marks
            .iter()
            .take_while(|(text, _)| *text <= text_end)
            .last()
            .map_or(0, |&(_, raw)| raw);
        self.marks.retain(|(text, _)| *text > text_end);
        for (text, raw) in &mut self.marks {
            *text -= text_end;
            *raw = raw.saturating_sub(raw_end);
        }
        self.raw.drain(..raw_end.min(self.raw.len()));
    }

    fn trim(&mut self) {
        let text = &mut self.sink.text;
        if text.len() <= self.max_len {
            return;
        }
        let mut cut = text.len() - self.max_len;
        while !text.is_char_boundary(cut) {
            cut += 1;
        }
        log::debug!("expect buffer over {} bytes, dropping {cut}", self.max_len);
        text.drain(..cut);
        self.drop_raw_through(cut);

        let raw_limit = self.max_len.saturating_mul(RAW_PER_TEXT);
        if self.raw.len() > raw_limit {
            let excess = self.raw.len() - raw_limit;
            self.raw.drain(..excess);
            for (_, raw) in &mut self.marks {
                *raw = raw.saturating_sub(excess);
            }
        }
    }
}

impl Default for ExpectBuffer {
    fn default() -> Self {
        Self::new()
    }
}

//! Receive buffer with escape stripping and incremental pattern search.
//!
//! Console output arrives in arbitrary chunks. Each chunk is passed through a
//! persistent VT parser so colour codes, cursor movement and carriage returns never
//! reach the matcher, even when an escape sequence is split across two reads.
//!
//! Searching is incremental: after a cycle finds nothing, only the newly arrived
//! bytes plus the last `search_depth` bytes of the old data are searched again.
//! Large outputs (full kernel logs, `lspci -vvv`) therefore cost O(new data) per
//! cycle rather than O(buffer).

use std::fmt;

use bytes::{Buf, BytesMut};
use vte::{Parser, Perform};

use super::patterns::{PatternMatch, PatternSet};

/// Collects printable text out of a VT byte stream.
#[derive(Default)]
struct Printable {
    out: Vec<u8>,
}

impl Perform for Printable {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        // Keep line structure; drop CR, BEL, BS and the other C0 controls.
        if byte == b'\n' || byte == b'\t' {
            self.out.push(byte);
        }
    }
}

/// Unconsumed console output, normalised and searchable.
pub struct PatternBuffer {
    /// Normalised (escape-free) unconsumed output.
    buffer: BytesMut,

    /// Bytes at the front of `buffer` already searched without a match.
    scanned: usize,

    /// Overlap re-searched on each cycle so matches spanning chunks are found.
    search_depth: usize,

    parser: Parser,
    printable: Printable,
}

impl PatternBuffer {
    /// `search_depth` bytes of already-searched data are re-examined per cycle;
    /// it must cover the longest expected match.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            search_depth,
            parser: Parser::new(),
            printable: Printable::default(),
        }
    }

    /// Feed raw stream bytes; only printable text and newlines are kept.
    pub fn extend(&mut self, data: &[u8]) {
        self.parser.advance(&mut self.printable, data);
        self.buffer.extend_from_slice(&self.printable.out);
        self.printable.out.clear();
    }

    /// Forget how much was searched; the next [`search`](Self::search) starts over.
    ///
    /// Needed whenever the pattern set changes between calls.
    pub fn rewind(&mut self) {
        self.scanned = 0;
    }

    /// Search for the first matching pattern and consume up to the end of the match.
    ///
    /// On a match, the consumed bytes are removed from the front of the buffer so the
    /// next read starts right after the match. On no match, nothing is consumed.
    pub fn search(&mut self, patterns: &PatternSet) -> Option<PatternMatch> {
        let scan_from = self.scanned.saturating_sub(self.search_depth);
        match patterns.find_from(&self.buffer, scan_from) {
            Some(m) => {
                self.buffer.advance(m.end);
                self.scanned = 0;
                Some(m)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Take all unconsumed output as text and reset.
    pub fn take_text(&mut self) -> String {
        self.scanned = 0;
        let data = self.buffer.split();
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Unconsumed normalised text.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard everything, including any half-parsed escape sequence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.parser = Parser::new();
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("len", &self.buffer.len())
            .field("scanned", &self.scanned)
            .field("search_depth", &self.search_depth)
            .finish()
    }
}

//! Session read buffer with a send mark and tail-limited search.
//!
//! Prompt detection only ever looks at the bytes received since the last
//! input was sent, and of those only the last `search_depth` bytes. The
//! full buffer stays intact so output can be sliced out afterwards.

use std::sync::LazyLock;

use regex::bytes::Regex;

/// Longest unfinished escape held back for the next chunk.
const MAX_PENDING_ESCAPE: usize = 32;

/// ANSI CSI sequences and the short ESC forms some devices emit.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\x1b(?:\[[0-?]*[ -/]*[@-~]|[()][0-9A-Za-z]|[=>78])")
        .expect("static ANSI pattern is valid")
});

/// Buffer for accumulating session output.
#[derive(Debug)]
pub struct PatternBuffer {
    /// The accumulated output buffer.
    buffer: Vec<u8>,

    /// How many bytes from the end to search for prompts.
    /// Default is 1000 bytes.
    search_depth: usize,

    /// Buffer offset where the last send happened.
    mark: usize,

    /// Start of an escape sequence cut off at the end of the last chunk.
    pending_escape: Vec<u8>,
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
            mark: 0,
            pending_escape: Vec::new(),
        }
    }

    /// Extend the buffer with new data, stripping ANSI escape codes.
    ///
    /// An escape sequence split across chunks is held back until the rest
    /// of it arrives.
    pub fn extend(&mut self, data: &[u8]) {
        let mut data = if self.pending_escape.is_empty() {
            data.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.pending_escape);
            joined.extend_from_slice(data);
            joined
        };

        if let Some(start) = unfinished_escape(&data) {
            self.pending_escape = data.split_off(start);
        }

        let cleaned = ANSI_ESCAPE.replace_all(&data, &b""[..]);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// Record the current end of the buffer as the start of the next response.
    pub fn set_mark(&mut self) {
        self.mark = self.buffer.len();
    }

    /// Everything received since the mark.
    pub fn since_mark(&self) -> &[u8] {
        &self.buffer[self.mark..]
    }

    /// The region the prompt detector may inspect: after the mark and
    /// within the last `search_depth` bytes.
    pub fn tail_since_mark(&self) -> &[u8] {
        let start = self
            .buffer
            .len()
            .saturating_sub(self.search_depth)
            .max(self.mark);
        &self.buffer[start..]
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Offset of a trailing escape sequence that has not reached its final byte.
fn unfinished_escape(data: &[u8]) -> Option<usize> {
    let start = memchr::memrchr(0x1b, data)?;
    let tail = &data[start..];
    if tail.len() > MAX_PENDING_ESCAPE {
        return None;
    }

    let unfinished = match tail {
        [_] => true,
        [_, b'(' | b')'] => true,
        [_, b'[', rest @ ..] => rest.iter().all(|b| (0x20..=0x3f).contains(b)),
        _ => false,
    };
    unfinished.then_some(start)
}

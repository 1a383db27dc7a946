/// Outcome of one readiness callback for a resumable reader.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadPoll<T> {
    /// Wait for the next readiness notification; nothing was lost.
    Pending,
    Ready(T),
}

impl<T> ReadPoll<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Owned byte buffer that survives across readiness callbacks.
///
/// `cursor` is the number of valid bytes; `target` is how many the current
/// stage wants in total. The buffer never shrinks while a read is in flight.
#[derive(Debug, Default, Clone)]
pub struct ReadAccumulator {
    buf: Vec<u8>,
    cursor: usize,
    target: usize,
}

impl ReadAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from bytes an earlier stage already pulled off the wire.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        let cursor = bytes.len();
        Self {
            buf: bytes,
            cursor,
            target: cursor,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_target(&mut self, target: usize) {
        self.target = target;
    }

    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.cursor)
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.target
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }

    /// Writable window of `len` bytes right after the cursor.
    pub fn spare(&mut self, len: usize) -> &mut [u8] {
        let end = self.cursor + len;
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        &mut self.buf[self.cursor..end]
    }

    /// Commit `n` bytes written into the last [`spare`](Self::spare) window.
    pub fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.buf.len());
    }

    /// Split at `at`, keeping the head and returning the tail as a new
    /// accumulator.
    pub fn split_off(&mut self, at: usize) -> Self {
        let at = at.min(self.cursor);
        self.buf.truncate(self.cursor);
        let tail = self.buf.split_off(at);
        self.cursor = at;
        self.target = self.target.min(at);
        Self::with_bytes(tail)
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.truncate(self.cursor);
        self.buf
    }
}

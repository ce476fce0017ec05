//! Elastic byte buffer used for a connection's inbound and outbound bytes.
//!
//! The storage is split by two cursors:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0      <=      read_pos      <=      write_pos     <=    capacity
//! ```
//!
//! Appending never disturbs the readable region. When the tail is too small
//! the buffer either slides the readable bytes back to offset 0 (reclaiming
//! the prependable region) or, if that still isn't enough, grows the storage.

use std::io::{self, IoSliceMut, Read, Write};

/// Default storage size for a fresh buffer.
pub const INITIAL_CAPACITY: usize = 1024;

/// Size of the on-stack overflow area used by [`Buffer::read_from`].
const SCRATCH_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Buffer {
    storage: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Bytes appended but not yet retrieved.
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Free bytes after the write cursor.
    pub fn writable_bytes(&self) -> usize {
        self.storage.len() - self.write_pos
    }

    /// Already retrieved bytes in front of the read cursor, reclaimable by compaction.
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The unread region.
    pub fn peek(&self) -> &[u8] {
        &self.storage[self.read_pos..self.write_pos]
    }

    /// Marks `len` bytes as consumed.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`readable_bytes`](Self::readable_bytes).
    pub fn retrieve(&mut self, len: usize) {
        assert!(
            len <= self.readable_bytes(),
            "retrieve({len}) exceeds readable bytes ({})",
            self.readable_bytes()
        );
        self.read_pos += len;
    }

    /// Resets both cursors and zeroes the storage so no stale bytes survive reuse.
    pub fn retrieve_all(&mut self) {
        self.storage.fill(0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Takes the unread region as an owned vector and resets the buffer.
    pub fn retrieve_all_to_vec(&mut self) -> Vec<u8> {
        let bytes = self.peek().to_vec();
        self.retrieve_all();
        bytes
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        self.storage[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    pub fn append_str(&mut self, data: &str) {
        self.append(data.as_bytes());
    }

    /// Guarantees at least `len` writable bytes after the call.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.storage.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.storage.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Reads from `src` with a single vectored call.
    ///
    /// Bytes land in the writable tail first; whatever does not fit spills
    /// into a 64 KiB stack area and is appended afterwards, so a short read
    /// never forces the buffer to grow up front.
    pub fn read_from<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable_bytes();

        let n = {
            let tail = &mut self.storage[self.write_pos..];
            let mut bufs = [IoSliceMut::new(tail), IoSliceMut::new(&mut scratch)];
            src.read_vectored(&mut bufs)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.storage.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region to `dst` and advances past whatever was accepted.
    pub fn write_to<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<usize> {
        let n = dst.write(self.peek())?;
        self.read_pos += n;
        Ok(n)
    }
}

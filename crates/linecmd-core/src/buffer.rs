//! Bounded FIFO byte queue used for both directions of a connection.
//!
//! # Why bounded? (for beginners)
//!
//! A peer that sends faster than we parse, or a peer that stops reading our
//! replies, would otherwise make a connection's memory grow without limit.
//! Every buffer therefore has a fixed capacity, and a write that would exceed
//! it is *rejected as a whole* rather than silently truncated.  The connection
//! turns that rejection into a terminal "buffer full" error.
//!
//! The storage is a [`bytes::BytesMut`], so consuming from the front is an
//! O(1) `advance` rather than a memmove of the remaining bytes.

use bytes::{Buf, Bytes, BytesMut};

/// Returned when a push would take the buffer past its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    /// Bytes already stored.
    pub stored: usize,
    /// Bytes the rejected push tried to add.
    pub requested: usize,
    /// The buffer's fixed capacity.
    pub capacity: usize,
}

/// A byte queue whose stored length never exceeds its capacity.
///
/// # Examples
///
/// ```rust
/// use linecmd_core::BoundedBuffer;
///
/// let mut buf = BoundedBuffer::new(8);
/// buf.push(b"hello").unwrap();
/// assert!(buf.push(b"world").is_err()); // 10 > 8, nothing is stored
/// assert_eq!(buf.split_to(3).as_ref(), b"hel");
/// assert_eq!(buf.as_slice(), b"lo");
/// ```
#[derive(Debug)]
pub struct BoundedBuffer {
    bytes: BytesMut,
    capacity: usize,
}

impl BoundedBuffer {
    /// Creates an empty buffer that will hold at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::new(),
            capacity,
        }
    }

    /// The fixed maximum number of stored bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently stored.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// How many more bytes can be pushed before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    /// Appends `data` in full, or stores nothing and reports [`Overflow`].
    pub fn push(&mut self, data: &[u8]) -> Result<(), Overflow> {
        if data.len() > self.remaining() {
            return Err(Overflow {
                stored: self.bytes.len(),
                requested: data.len(),
                capacity: self.capacity,
            });
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// The stored bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// Removes and returns the first `n` bytes.
    ///
    /// `n` is clamped to the stored length.
    pub fn split_to(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.bytes.len(), "split_to({n}) exceeds buffer length {}", self.bytes.len());
        let n = n.min(self.bytes.len());
        self.bytes.split_to(n).freeze()
    }

    /// Discards the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.bytes.len());
        self.bytes.advance(n);
    }

    /// Discards everything and returns the backing allocation.
    pub fn release(&mut self) {
        self.bytes = BytesMut::new();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

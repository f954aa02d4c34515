//! In-memory endpoints and a hand-driven execution context.
//!
//! A [`Pipe`] is a shared byte queue with a reader end and a writer end.  Two
//! pipes cross-wired make a duplex link between two connections in the same
//! thread, which is how the round-trip tests talk to themselves.
//!
//! [`ManualRunLoop`] records registrations; the caller delivers events by
//! calling `handle_stream_event` directly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use super::{ExecutionContext, InputStream, OutputStream};

#[derive(Debug, Default)]
struct PipeState {
    data: VecDeque<u8>,
    /// Writer side finished; readers see EOF once `data` drains.
    write_closed: bool,
    /// Maximum bytes held at once; writers see `WouldBlock` beyond it.
    capacity: Option<usize>,
    /// Error returned by the next read or write.
    fail_with: Option<io::ErrorKind>,
    fail_open: bool,
    reader_closed: bool,
    writer_closed: bool,
}

/// A single-threaded in-memory byte pipe.
///
/// Cloning a `Pipe` yields another handle to the same queue.
#[derive(Debug, Clone, Default)]
pub struct Pipe {
    state: Rc<RefCell<PipeState>>,
}

impl Pipe {
    /// Creates an unbounded, empty pipe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipe that holds at most `capacity` unread bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        let pipe = Self::default();
        pipe.state.borrow_mut().capacity = Some(capacity);
        pipe
    }

    /// Returns an [`InputStream`] that reads from this pipe.
    pub fn reader(&self) -> PipeReader {
        PipeReader { pipe: self.clone() }
    }

    /// Returns an [`OutputStream`] that writes into this pipe.
    pub fn writer(&self) -> PipeWriter {
        PipeWriter { pipe: self.clone() }
    }

    /// Appends bytes as if a peer had sent them, ignoring the capacity.
    pub fn feed(&self, bytes: &[u8]) {
        self.state.borrow_mut().data.extend(bytes);
    }

    /// Marks the writing side finished; readers get EOF after draining.
    pub fn close_write(&self) {
        self.state.borrow_mut().write_closed = true;
    }

    /// Makes the next read or write fail with `kind`.
    pub fn fail_with(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().fail_with = Some(kind);
    }

    /// Makes `open()` on either end fail.
    pub fn fail_open(&self) {
        self.state.borrow_mut().fail_open = true;
    }

    /// Removes and returns every unread byte.
    pub fn take(&self) -> Vec<u8> {
        self.state.borrow_mut().data.drain(..).collect()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.state.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().data.is_empty()
    }

    /// Changes the capacity; `None` means unbounded.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        self.state.borrow_mut().capacity = capacity;
    }

    /// `true` once the reader end has been closed by its owner.
    pub fn is_reader_closed(&self) -> bool {
        self.state.borrow().reader_closed
    }

    /// `true` once the writer end has been closed by its owner.
    pub fn is_writer_closed(&self) -> bool {
        self.state.borrow().writer_closed
    }
}

/// Reading end of a [`Pipe`].
#[derive(Debug)]
pub struct PipeReader {
    pipe: Pipe,
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.pipe.state.borrow_mut();
        if let Some(kind) = state.fail_with.take() {
            return Err(kind.into());
        }
        if state.data.is_empty() {
            return if state.write_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.data.len());
        for (slot, byte) in buf.iter_mut().zip(state.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl InputStream for PipeReader {
    fn open(&mut self) -> io::Result<()> {
        if self.pipe.state.borrow().fail_open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "pipe refused to open"));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.pipe.state.borrow_mut().reader_closed = true;
    }
}

/// Writing end of a [`Pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    pipe: Pipe,
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.pipe.state.borrow_mut();
        if let Some(kind) = state.fail_with.take() {
            return Err(kind.into());
        }
        let room = match state.capacity {
            Some(cap) => cap.saturating_sub(state.data.len()),
            None => buf.len(),
        };
        if room == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = room.min(buf.len());
        state.data.extend(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputStream for PipeWriter {
    fn open(&mut self) -> io::Result<()> {
        if self.pipe.state.borrow().fail_open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "pipe refused to open"));
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.pipe.state.borrow_mut();
        state.writer_closed = true;
        state.write_closed = true;
    }
}

/// Two cross-wired pipes: what `a` writes, `b` reads, and vice versa.
#[derive(Debug, Clone, Default)]
pub struct Duplex {
    /// Bytes travelling from side A to side B.
    pub a_to_b: Pipe,
    /// Bytes travelling from side B to side A.
    pub b_to_a: Pipe,
}

impl Duplex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoints for side A: reads `b_to_a`, writes `a_to_b`.
    pub fn side_a(&self) -> (PipeReader, PipeWriter) {
        (self.b_to_a.reader(), self.a_to_b.writer())
    }

    /// Endpoints for side B: reads `a_to_b`, writes `b_to_a`.
    pub fn side_b(&self) -> (PipeReader, PipeWriter) {
        (self.a_to_b.reader(), self.b_to_a.writer())
    }
}

/// An execution context driven by hand.
///
/// Keeps track of which connections are registered and how many times
/// register/deregister were called, so tests can check the "exactly once
/// per open/close pair" contract.
#[derive(Debug, Default)]
pub struct ManualRunLoop {
    registered: RefCell<Vec<String>>,
    registrations: RefCell<usize>,
    deregistrations: RefCell<usize>,
}

impl ManualRunLoop {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Names of the connections currently registered.
    pub fn registered(&self) -> Vec<String> {
        self.registered.borrow().clone()
    }

    pub fn registration_count(&self) -> usize {
        *self.registrations.borrow()
    }

    pub fn deregistration_count(&self) -> usize {
        *self.deregistrations.borrow()
    }
}

impl ExecutionContext for ManualRunLoop {
    fn register(&self, name: &str) {
        self.registered.borrow_mut().push(name.to_string());
        *self.registrations.borrow_mut() += 1;
    }

    fn deregister(&self, name: &str) {
        let mut registered = self.registered.borrow_mut();
        if let Some(pos) = registered.iter().position(|n| n == name) {
            registered.remove(pos);
        }
        *self.deregistrations.borrow_mut() += 1;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

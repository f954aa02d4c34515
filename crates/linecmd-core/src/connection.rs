//! The leaf layer: a duplex byte stream with bounded buffers.
//!
//! [`ByteStreamConnection`] owns an input endpoint, an output endpoint, one
//! [`BoundedBuffer`] per direction and a handle to the [`ExecutionContext`]
//! that delivers readiness events.  It knows nothing about commands; the
//! framer layer above drives it.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──open()──► Open ──close()──────────────► Closed   (no notification)
//!    │                 └──close_with_error(e)────► Closed   (notification pending)
//!    └────close_with_error(e)───────────────────► Closed   (notification pending)
//! ```
//!
//! Every terminal condition (stream error, EOF, buffer overflow) goes through
//! [`close_with_error`](ByteStreamConnection::close_with_error), which marks a
//! close notification as pending.  The framer delivers that notification to
//! its handler exactly once.  An explicit [`close`](ByteStreamConnection::close)
//! by the owner never produces one.
//!
//! [`close_when_flushed`](ByteStreamConnection::close_when_flushed) is the
//! graceful form of `close`: the connection stops reading and sending, and
//! closes (without notification) once the send buffer has drained.

use std::io;
use std::rc::Rc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::BoundedBuffer;
use crate::error::ConnectionError;
use crate::stream::{ExecutionContext, InputStream, OutputStream};

/// Buffer capacity used when the configured capacity is 0.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Largest single read from the input endpoint.
const READ_CHUNK_SIZE: usize = 4096;

/// Per-connection settings.  Must be chosen before the connection is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Label used in log output.
    #[serde(default = "default_name")]
    pub name: String,
    /// Receive buffer capacity in bytes; 0 selects [`DEFAULT_BUFFER_CAPACITY`].
    #[serde(default)]
    pub input_buffer_capacity: usize,
    /// Send buffer capacity in bytes; 0 selects [`DEFAULT_BUFFER_CAPACITY`].
    #[serde(default)]
    pub output_buffer_capacity: usize,
}

fn default_name() -> String {
    "connection".to_string()
}

fn effective_capacity(configured: usize) -> usize {
    if configured == 0 {
        DEFAULT_BUFFER_CAPACITY
    } else {
        configured
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            input_buffer_capacity: 0,
            output_buffer_capacity: 0,
        }
    }
}

impl ConnectionConfig {
    /// Default settings with the given debug name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Where a connection is in its open/close lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Open,
    Closed,
}

/// Result of one bounded read from the input endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the receive buffer.
    Data(usize),
    /// The endpoint has nothing more right now.
    Drained,
    /// The connection is (now) closed.
    Closed,
}

/// A duplex byte stream with bounded send and receive buffers.
pub struct ByteStreamConnection {
    name: String,
    input: Box<dyn InputStream>,
    output: Box<dyn OutputStream>,
    context: Rc<dyn ExecutionContext>,
    input_buffer: BoundedBuffer,
    output_buffer: BoundedBuffer,
    state: ConnectionState,
    error: Option<ConnectionError>,
    close_pending: bool,
    close_after_flush: bool,
}

impl std::fmt::Debug for ByteStreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStreamConnection")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("buffered_in", &self.input_buffer.len())
            .field("buffered_out", &self.output_buffer.len())
            .field("error", &self.error)
            .finish()
    }
}

impl ByteStreamConnection {
    /// Creates a connection over the supplied endpoints.  Nothing happens
    /// until [`open`](Self::open) is called.
    pub fn new(
        input: impl InputStream + 'static,
        output: impl OutputStream + 'static,
        context: Rc<dyn ExecutionContext>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            name: config.name,
            input: Box::new(input),
            output: Box::new(output),
            context,
            input_buffer: BoundedBuffer::new(effective_capacity(config.input_buffer_capacity)),
            output_buffer: BoundedBuffer::new(effective_capacity(config.output_buffer_capacity)),
            state: ConnectionState::Idle,
            error: None,
            close_pending: false,
            close_after_flush: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// The error the connection closed with, if any.  `None` after a clean
    /// EOF, an explicit close, or while still open.
    pub fn error(&self) -> Option<&ConnectionError> {
        self.error.as_ref()
    }

    /// `true` while output is queued but not yet accepted by the endpoint.
    pub fn wants_write(&self) -> bool {
        self.is_open() && !self.output_buffer.is_empty()
    }

    /// `true` while open and not draining towards a close.
    pub fn wants_read(&self) -> bool {
        self.is_open() && !self.close_after_flush
    }

    /// `true` after [`close_when_flushed`](Self::close_when_flushed) while
    /// output is still draining.
    pub fn is_closing(&self) -> bool {
        self.is_open() && self.close_after_flush
    }

    pub fn input_capacity(&self) -> usize {
        self.input_buffer.capacity()
    }

    pub fn output_capacity(&self) -> usize {
        self.output_buffer.capacity()
    }

    /// Bytes received but not yet consumed by the framer.
    pub fn buffered_input(&self) -> &[u8] {
        self.input_buffer.as_slice()
    }

    /// Bytes queued for sending.
    pub fn buffered_output(&self) -> &[u8] {
        self.output_buffer.as_slice()
    }

    /// Opens both endpoints and registers with the execution context.
    ///
    /// If either endpoint fails to open, the connection closes with that
    /// error and a close notification becomes pending.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if the connection has already
    /// been opened (or closed); the connection is left untouched.
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Idle {
            return Err(ConnectionError::InvalidState("connection already opened"));
        }
        debug!(connection = %self.name, "open");
        self.state = ConnectionState::Open;
        self.context.register(&self.name);

        let opened = self.input.open().and_then(|()| self.output.open());
        if let Err(e) = opened {
            warn!(connection = %self.name, "endpoint failed to open: {e}");
            self.close_with_error(Some(ConnectionError::Transport(e)));
        }
        Ok(())
    }

    /// Closes the connection without producing a close notification.
    ///
    /// Safe to call before `open()` (no-op) and safe to call repeatedly.
    /// Any notification that was pending but not yet delivered is discarded,
    /// along with its error.
    pub fn close(&mut self) {
        if self.close_pending {
            self.close_pending = false;
            self.error = None;
        }
        if self.state == ConnectionState::Open {
            debug!(connection = %self.name, "close");
            self.tear_down();
        }
    }

    /// Closes without notification once all queued output has been written.
    ///
    /// Closes at once if nothing is queued.  Otherwise the connection stays
    /// open for writing only: reads stop, later sends are ignored, and the
    /// close happens in the [`flush`](Self::flush) that empties the buffer.
    /// A write failure meanwhile still closes with an error.
    pub fn close_when_flushed(&mut self) {
        if !self.is_open() {
            return;
        }
        if self.output_buffer.is_empty() {
            self.close();
        } else {
            debug!(
                connection = %self.name,
                queued = self.output_buffer.len(),
                "closing once output drains"
            );
            self.close_after_flush = true;
        }
    }

    /// Closes the connection and records `error` (`None` means clean EOF).
    ///
    /// Returns `true` if this call closed the connection, in which case a
    /// close notification is now pending.  Returns `false` if the connection
    /// was already closed.
    pub fn close_with_error(&mut self, error: Option<ConnectionError>) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        match &error {
            Some(e) => debug!(connection = %self.name, "closing with error: {e}"),
            None => debug!(connection = %self.name, "closing at end of stream"),
        }
        if self.state == ConnectionState::Open {
            self.tear_down();
        }
        self.state = ConnectionState::Closed;
        self.error = error;
        self.close_pending = true;
        true
    }

    /// Claims the pending close notification, if there is one.
    ///
    /// Returns `true` at most once per connection.
    pub fn take_close_notification(&mut self) -> bool {
        std::mem::take(&mut self.close_pending)
    }

    /// Queues `bytes` for sending and tries to flush immediately.
    ///
    /// If the bytes do not fit in the send buffer, the connection closes with
    /// [`ConnectionError::OutputBufferFull`].  Sending on a connection that is
    /// not open is ignored.
    pub fn send(&mut self, bytes: &[u8]) {
        if !self.wants_read() {
            debug!(connection = %self.name, len = bytes.len(), "send on closed connection ignored");
            return;
        }
        if let Err(overflow) = self.output_buffer.push(bytes) {
            self.close_with_error(Some(ConnectionError::OutputBufferFull {
                queued: overflow.stored,
                requested: overflow.requested,
                capacity: overflow.capacity,
            }));
            return;
        }
        self.flush();
    }

    /// Writes as much queued output as the output endpoint accepts.
    pub fn flush(&mut self) {
        while self.is_open() && !self.output_buffer.is_empty() {
            match self.output.write(self.output_buffer.as_slice()) {
                Ok(0) => {
                    self.close_with_error(Some(ConnectionError::Transport(io::Error::from(
                        io::ErrorKind::WriteZero,
                    ))));
                }
                Ok(n) => self.output_buffer.consume(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close_with_error(Some(ConnectionError::Transport(e)));
                }
            }
        }
        if self.is_closing() && self.output_buffer.is_empty() {
            self.close();
        }
    }

    /// Performs one bounded read into the receive buffer.
    ///
    /// Reads at most the free space left in the buffer.  When the buffer is
    /// already full, a one-byte probe distinguishes "peer is idle" from
    /// "peer sent more than we can hold"; the latter closes the connection
    /// with [`ConnectionError::InputBufferFull`].
    pub fn read_chunk(&mut self) -> ReadOutcome {
        if !self.is_open() {
            return ReadOutcome::Closed;
        }
        if self.close_after_flush {
            return ReadOutcome::Drained;
        }
        let mut scratch = [0u8; READ_CHUNK_SIZE];
        let want = self.input_buffer.remaining().min(READ_CHUNK_SIZE);
        let probing = want == 0;
        let window = if probing { &mut scratch[..1] } else { &mut scratch[..want] };

        loop {
            match self.input.read(window) {
                Ok(0) => {
                    self.close_with_error(None);
                    return ReadOutcome::Closed;
                }
                Ok(_) if probing => {
                    let capacity = self.input_buffer.capacity();
                    self.close_with_error(Some(ConnectionError::InputBufferFull { capacity }));
                    return ReadOutcome::Closed;
                }
                Ok(n) => {
                    // `want` never exceeds the free space, so this cannot overflow.
                    if self.input_buffer.push(&window[..n]).is_err() {
                        let capacity = self.input_buffer.capacity();
                        self.close_with_error(Some(ConnectionError::InputBufferFull { capacity }));
                        return ReadOutcome::Closed;
                    }
                    return ReadOutcome::Data(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Drained,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close_with_error(Some(ConnectionError::Transport(e)));
                    return ReadOutcome::Closed;
                }
            }
        }
    }

    /// Removes the first `n` received bytes and returns them.
    pub fn take_input(&mut self, n: usize) -> Bytes {
        self.input_buffer.split_to(n)
    }

    fn tear_down(&mut self) {
        self.context.deregister(&self.name);
        self.input.close();
        self.output.close();
        self.input_buffer.release();
        self.output_buffer.release();
        self.state = ConnectionState::Closed;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::stream::memory::{ManualRunLoop, Pipe};

    struct Fixture {
        run_loop: Rc<ManualRunLoop>,
        incoming: Pipe,
        outgoing: Pipe,
        conn: ByteStreamConnection,
    }

    fn fixture(config: ConnectionConfig) -> Fixture {
        let run_loop = ManualRunLoop::new();
        let incoming = Pipe::new();
        let outgoing = Pipe::new();
        let conn = ByteStreamConnection::new(
            incoming.reader(),
            outgoing.writer(),
            run_loop.clone(),
            config,
        );
        Fixture {
            run_loop,
            incoming,
            outgoing,
            conn,
        }
    }

    #[test]
    fn test_config_zero_capacity_selects_default() {
        let fx = fixture(ConnectionConfig::default());
        assert_eq!(fx.conn.input_capacity(), DEFAULT_BUFFER_CAPACITY);
        assert_eq!(fx.conn.output_capacity(), DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_open_registers_with_context_once() {
        // Arrange
        let mut fx = fixture(ConnectionConfig::named("c1"));

        // Act
        fx.conn.open().unwrap();

        // Assert
        assert!(fx.conn.is_open());
        assert_eq!(fx.run_loop.registered(), vec!["c1".to_string()]);
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();

        let second = fx.conn.open();

        assert!(matches!(second, Err(ConnectionError::InvalidState(_))));
        assert_eq!(fx.run_loop.registration_count(), 1);
        assert!(fx.conn.is_open());
    }

    #[test]
    fn test_open_failure_closes_with_pending_notification() {
        // Arrange
        let mut fx = fixture(ConnectionConfig::default());
        fx.incoming.fail_open();

        // Act
        fx.conn.open().unwrap();

        // Assert
        assert_eq!(fx.conn.state(), ConnectionState::Closed);
        assert_eq!(fx.conn.error().map(ConnectionError::kind), Some(ErrorKind::Transport));
        assert!(fx.conn.take_close_notification());
        assert_eq!(fx.run_loop.deregistration_count(), 1);
    }

    #[test]
    fn test_close_before_open_is_noop() {
        let mut fx = fixture(ConnectionConfig::default());

        fx.conn.close();
        fx.conn.close();

        assert_eq!(fx.conn.state(), ConnectionState::Idle);
        assert!(!fx.conn.take_close_notification());
        assert_eq!(fx.run_loop.deregistration_count(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_silent() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();

        fx.conn.close();
        fx.conn.close();

        assert_eq!(fx.conn.state(), ConnectionState::Closed);
        assert!(!fx.conn.take_close_notification());
        assert_eq!(fx.run_loop.deregistration_count(), 1);
        assert!(fx.incoming.is_reader_closed());
        assert!(fx.outgoing.is_writer_closed());
    }

    #[test]
    fn test_close_when_flushed_with_nothing_queued_closes_now() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();

        fx.conn.close_when_flushed();

        assert_eq!(fx.conn.state(), ConnectionState::Closed);
        assert!(!fx.conn.take_close_notification());
        assert_eq!(fx.run_loop.deregistration_count(), 1);
    }

    #[test]
    fn test_close_when_flushed_waits_for_queued_output() {
        // Arrange
        let mut fx = fixture(ConnectionConfig::default());
        fx.outgoing.set_capacity(Some(4));
        fx.conn.open().unwrap();
        fx.conn.send(b"+ Goodbye\r\n");

        // Act
        fx.conn.close_when_flushed();
        fx.incoming.feed(b"more\r\n");
        let read = fx.conn.read_chunk();
        fx.conn.send(b"ignored");

        // Assert: still draining, reads and sends are off.
        assert!(fx.conn.is_closing());
        assert!(fx.conn.wants_write());
        assert!(!fx.conn.wants_read());
        assert!(matches!(read, ReadOutcome::Drained));
        let mut written = fx.outgoing.take();

        // Act: the peer makes room and the rest goes out.
        fx.outgoing.set_capacity(None);
        fx.conn.flush();
        written.extend(fx.outgoing.take());

        // Assert
        assert_eq!(written, b"+ Goodbye\r\n");
        assert_eq!(fx.conn.state(), ConnectionState::Closed);
        assert!(!fx.conn.take_close_notification());
        assert!(fx.outgoing.is_writer_closed());
    }

    #[test]
    fn test_write_failure_while_draining_notifies() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.outgoing.set_capacity(Some(2));
        fx.conn.open().unwrap();
        fx.conn.send(b"abcdef");
        fx.conn.close_when_flushed();

        fx.outgoing.fail_with(io::ErrorKind::BrokenPipe);
        fx.conn.flush();

        assert_eq!(fx.conn.error().map(ConnectionError::kind), Some(ErrorKind::Transport));
        assert!(fx.conn.take_close_notification());
    }

    #[test]
    fn test_close_with_error_notifies_exactly_once() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();

        let first = fx.conn.close_with_error(Some(ConnectionError::InputUnexpected));
        let second = fx.conn.close_with_error(None);

        assert!(first);
        assert!(!second);
        assert!(fx.conn.take_close_notification());
        assert!(!fx.conn.take_close_notification());
        assert_eq!(fx.conn.error().map(ConnectionError::kind), Some(ErrorKind::InputUnexpected));
    }

    #[test]
    fn test_close_discards_undelivered_notification() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();
        fx.conn.close_with_error(Some(ConnectionError::InputUnexpected));

        fx.conn.close();

        assert!(!fx.conn.take_close_notification());
        assert!(fx.conn.error().is_none());
    }

    #[test]
    fn test_send_flushes_to_output_endpoint() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();

        fx.conn.send(b"abc");

        assert_eq!(fx.outgoing.take(), b"abc");
        assert!(!fx.conn.wants_write());
    }

    #[test]
    fn test_send_keeps_unaccepted_bytes_queued_until_writable() {
        // Arrange – peer accepts only two bytes at a time
        let mut fx = fixture(ConnectionConfig::default());
        fx.outgoing.set_capacity(Some(2));
        fx.conn.open().unwrap();

        // Act
        fx.conn.send(b"hello");

        // Assert
        assert_eq!(fx.conn.buffered_output(), b"llo");
        assert!(fx.conn.wants_write());

        fx.outgoing.take();
        fx.conn.flush();
        assert_eq!(fx.conn.buffered_output(), b"o");
    }

    #[test]
    fn test_send_overflow_closes_with_output_buffer_full() {
        // Arrange
        let mut fx = fixture(ConnectionConfig {
            output_buffer_capacity: 4,
            ..ConnectionConfig::default()
        });
        fx.outgoing.set_capacity(Some(0));
        fx.conn.open().unwrap();
        fx.conn.send(b"abc");

        // Act
        fx.conn.send(b"de");

        // Assert
        assert!(!fx.conn.is_open());
        assert_eq!(
            fx.conn.error().map(ConnectionError::kind),
            Some(ErrorKind::OutputBufferFull)
        );
    }

    #[test]
    fn test_read_chunk_appends_and_drains() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();
        fx.incoming.feed(b"xyz");

        assert_eq!(fx.conn.read_chunk(), ReadOutcome::Data(3));
        assert_eq!(fx.conn.read_chunk(), ReadOutcome::Drained);
        assert_eq!(fx.conn.buffered_input(), b"xyz");
    }

    #[test]
    fn test_read_chunk_eof_closes_cleanly() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();
        fx.incoming.close_write();

        assert_eq!(fx.conn.read_chunk(), ReadOutcome::Closed);
        assert!(fx.conn.error().is_none());
        assert!(fx.conn.take_close_notification());
    }

    #[test]
    fn test_read_chunk_full_buffer_with_more_data_fails() {
        // Arrange
        let mut fx = fixture(ConnectionConfig {
            input_buffer_capacity: 4,
            ..ConnectionConfig::default()
        });
        fx.conn.open().unwrap();
        fx.incoming.feed(b"abcdef");

        // Act
        let first = fx.conn.read_chunk();
        let second = fx.conn.read_chunk();

        // Assert
        assert_eq!(first, ReadOutcome::Data(4));
        assert_eq!(second, ReadOutcome::Closed);
        assert_eq!(
            fx.conn.error().map(ConnectionError::kind),
            Some(ErrorKind::InputBufferFull)
        );
    }

    #[test]
    fn test_read_chunk_full_buffer_with_idle_peer_waits() {
        let mut fx = fixture(ConnectionConfig {
            input_buffer_capacity: 4,
            ..ConnectionConfig::default()
        });
        fx.conn.open().unwrap();
        fx.incoming.feed(b"abcd");

        fx.conn.read_chunk();
        let outcome = fx.conn.read_chunk();

        assert_eq!(outcome, ReadOutcome::Drained);
        assert!(fx.conn.is_open());
    }

    #[test]
    fn test_transport_error_closes_with_transport_kind() {
        let mut fx = fixture(ConnectionConfig::default());
        fx.conn.open().unwrap();
        fx.incoming.fail_with(io::ErrorKind::ConnectionReset);

        assert_eq!(fx.conn.read_chunk(), ReadOutcome::Closed);
        assert_eq!(fx.conn.error().map(ConnectionError::kind), Some(ErrorKind::Transport));
    }
}

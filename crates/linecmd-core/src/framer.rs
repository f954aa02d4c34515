//! The middle layer: turning a byte stream into discrete commands.
//!
//! [`CommandConnection`] wraps a [`ByteStreamConnection`] and a
//! [`CommandHandler`].  Whenever new bytes land in the receive buffer it runs
//! the parse loop:
//!
//! ```text
//! loop {
//!     n = handler.parse_command_data(buffered)
//!     n == 0  → wait for more bytes
//!     n  > 0  → remove n bytes from the front, dispatch them as one command
//!     error   → close the connection with that error
//! }
//! ```
//!
//! Because every command is removed before the next parse, commands reach the
//! handler in receipt order, and a partial command is never dispatched.  The
//! parse hook only needs to find *one* command per call.
//!
//! The framer also owns the close notification: whatever layer closed the
//! connection, the handler's `will_close_with_error` runs once, after the
//! callback that caused it has returned.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::connection::{ByteStreamConnection, ReadOutcome};
use crate::error::ConnectionError;
use crate::stream::{StreamEvent, StreamEventTarget};

/// Parse hook and event callbacks for a [`CommandConnection`].
///
/// Every method has a default.  The default parse hook rejects all input with
/// [`ConnectionError::InputUnexpected`], so a connection with no real parser
/// fails fast instead of buffering data it can never drain.
pub trait CommandHandler {
    /// Looks for one complete command at the front of `data`.
    ///
    /// Returns the number of bytes that make up that command (terminator
    /// included), or 0 if the command is not complete yet.  Returning an error
    /// closes the connection with it; parsers report over-long input with
    /// [`ConnectionError::InputCommandTooLong`] rather than returning 0
    /// forever.
    fn parse_command_data(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        let _ = data;
        Err(ConnectionError::InputUnexpected)
    }

    /// Called with the bytes of each recognised command, in order.
    ///
    /// `stream` may be used to reply or to close the connection.
    fn did_receive_command(&mut self, stream: &mut ByteStreamConnection, command: Bytes) {
        let _ = (stream, command);
    }

    /// Called once when the connection closes by itself: failure to open, a
    /// transport error, EOF (`error` is `None`), or a protocol error.  Never
    /// called for an explicit `close()`.
    fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
        let _ = error;
    }
}

/// A byte-stream connection plus a command parse loop.
#[derive(Debug)]
pub struct CommandConnection<H> {
    stream: ByteStreamConnection,
    handler: H,
}

impl<H: CommandHandler> CommandConnection<H> {
    pub fn new(stream: ByteStreamConnection, handler: H) -> Self {
        Self { stream, handler }
    }

    pub fn stream(&self) -> &ByteStreamConnection {
        &self.stream
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn name(&self) -> &str {
        self.stream.name()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    pub fn error(&self) -> Option<&ConnectionError> {
        self.stream.error()
    }

    /// Opens the connection.  See [`ByteStreamConnection::open`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if already opened.  Endpoint
    /// failures are reported through `will_close_with_error` instead.
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        self.stream.open()?;
        self.deliver_close_notification();
        Ok(())
    }

    /// Closes without notifying the handler.  Safe at any time.
    pub fn close(&mut self) {
        self.stream.close();
    }

    /// Closes with `error` (`None` for EOF) and notifies the handler, unless
    /// the connection was already closed.
    pub fn close_with_error(&mut self, error: Option<ConnectionError>) {
        self.stream.close_with_error(error);
        self.deliver_close_notification();
    }

    /// Sends a raw, already-framed command.
    pub fn send_command(&mut self, command: &[u8]) {
        self.stream.send(command);
        self.deliver_close_notification();
    }

    /// Runs `f` against the underlying stream, then delivers any close
    /// notification it caused.
    pub fn with_stream<R>(&mut self, f: impl FnOnce(&mut ByteStreamConnection) -> R) -> R {
        let result = f(&mut self.stream);
        self.deliver_close_notification();
        result
    }

    /// Consumes the connection, returning the stream and the handler.
    pub fn into_parts(self) -> (ByteStreamConnection, H) {
        (self.stream, self.handler)
    }

    fn handle_readable(&mut self) {
        while let ReadOutcome::Data(_) = self.stream.read_chunk() {
            self.process_input();
            if !self.stream.is_open() {
                break;
            }
        }
        self.deliver_close_notification();
    }

    /// Runs the parse loop over whatever is buffered.
    fn process_input(&mut self) {
        while self.stream.wants_read() && !self.stream.buffered_input().is_empty() {
            let buffered = self.stream.buffered_input().len();
            match self.handler.parse_command_data(self.stream.buffered_input()) {
                Ok(0) => break,
                Ok(consumed) if consumed > buffered => {
                    self.stream.close_with_error(Some(ConnectionError::InvalidState(
                        "parser consumed more bytes than were buffered",
                    )));
                }
                Ok(consumed) => {
                    let command = self.stream.take_input(consumed);
                    trace!(connection = %self.stream.name(), len = consumed, "command");
                    self.handler.did_receive_command(&mut self.stream, command);
                }
                Err(e) => {
                    debug!(connection = %self.stream.name(), "parse failed: {e}");
                    self.stream.close_with_error(Some(e));
                }
            }
        }
    }

    fn deliver_close_notification(&mut self) {
        if self.stream.take_close_notification() {
            self.handler.will_close_with_error(self.stream.error());
        }
    }
}

impl<H: CommandHandler> StreamEventTarget for CommandConnection<H> {
    fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Readable => self.handle_readable(),
            StreamEvent::Writable => {
                self.stream.flush();
                self.deliver_close_notification();
            }
            StreamEvent::ErrorOccurred(e) => self.close_with_error(Some(ConnectionError::Transport(e))),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    fn wants_write(&self) -> bool {
        self.stream.wants_write()
    }

    fn wants_read(&self) -> bool {
        self.stream.wants_read()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::error::ErrorKind;
    use crate::stream::memory::{ManualRunLoop, Pipe};

    /// Length-prefixed toy protocol: one length byte, then that many bytes.
    #[derive(Default)]
    struct LengthPrefixed {
        commands: Vec<Vec<u8>>,
        closed: Vec<Option<ErrorKind>>,
    }

    impl CommandHandler for LengthPrefixed {
        fn parse_command_data(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
            match data.first() {
                Some(&len) if data.len() > len as usize => Ok(len as usize + 1),
                _ => Ok(0),
            }
        }

        fn did_receive_command(&mut self, _stream: &mut ByteStreamConnection, command: Bytes) {
            self.commands.push(command[1..].to_vec());
        }

        fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
            self.closed.push(error.map(ConnectionError::kind));
        }
    }

    /// Handler that relies on the default (absent) parse hook.
    #[derive(Default)]
    struct NoParser {
        closed: Vec<Option<ErrorKind>>,
    }

    impl CommandHandler for NoParser {
        fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
            self.closed.push(error.map(ConnectionError::kind));
        }
    }

    fn connect<H: CommandHandler>(handler: H) -> (Pipe, Pipe, CommandConnection<H>) {
        let incoming = Pipe::new();
        let outgoing = Pipe::new();
        let stream = ByteStreamConnection::new(
            incoming.reader(),
            outgoing.writer(),
            ManualRunLoop::new(),
            ConnectionConfig::named("framer-test"),
        );
        let mut conn = CommandConnection::new(stream, handler);
        conn.open().unwrap();
        (incoming, outgoing, conn)
    }

    #[test]
    fn test_commands_dispatched_in_receipt_order() {
        // Arrange
        let (incoming, _out, mut conn) = connect(LengthPrefixed::default());
        incoming.feed(&[2, b'h', b'i', 3, b'y', b'o', b'u']);

        // Act
        conn.handle_stream_event(StreamEvent::Readable);

        // Assert
        assert_eq!(conn.handler().commands, vec![b"hi".to_vec(), b"you".to_vec()]);
        assert!(conn.stream().buffered_input().is_empty());
    }

    #[test]
    fn test_partial_command_stays_buffered() {
        let (incoming, _out, mut conn) = connect(LengthPrefixed::default());
        incoming.feed(&[4, b'a', b'b']);

        conn.handle_stream_event(StreamEvent::Readable);

        assert!(conn.handler().commands.is_empty());
        assert_eq!(conn.stream().buffered_input(), &[4, b'a', b'b']);

        incoming.feed(b"cd");
        conn.handle_stream_event(StreamEvent::Readable);
        assert_eq!(conn.handler().commands, vec![b"abcd".to_vec()]);
    }

    #[test]
    fn test_zero_length_command_is_dispatched() {
        let (incoming, _out, mut conn) = connect(LengthPrefixed::default());
        incoming.feed(&[0, 0]);

        conn.handle_stream_event(StreamEvent::Readable);

        assert_eq!(conn.handler().commands, vec![Vec::<u8>::new(), Vec::new()]);
    }

    #[test]
    fn test_missing_parser_closes_with_unexpected_input() {
        // Arrange
        let (incoming, _out, mut conn) = connect(NoParser::default());
        incoming.feed(b"anything");

        // Act
        conn.handle_stream_event(StreamEvent::Readable);

        // Assert
        assert!(!conn.is_open());
        assert_eq!(conn.handler().closed, vec![Some(ErrorKind::InputUnexpected)]);
    }

    #[test]
    fn test_eof_notifies_with_no_error() {
        let (incoming, _out, mut conn) = connect(LengthPrefixed::default());
        incoming.close_write();

        conn.handle_stream_event(StreamEvent::Readable);

        assert_eq!(conn.handler().closed, vec![None]);
    }

    #[test]
    fn test_context_error_closes_with_transport_error_once() {
        let (_in, _out, mut conn) = connect(LengthPrefixed::default());

        conn.handle_stream_event(StreamEvent::ErrorOccurred(std::io::ErrorKind::BrokenPipe.into()));
        conn.handle_stream_event(StreamEvent::Readable);

        assert_eq!(conn.handler().closed, vec![Some(ErrorKind::Transport)]);
    }

    #[test]
    fn test_explicit_close_never_notifies() {
        let (_in, _out, mut conn) = connect(LengthPrefixed::default());

        conn.close();
        conn.close();

        assert!(conn.handler().closed.is_empty());
    }

    #[test]
    fn test_send_command_writes_raw_bytes() {
        let (_in, outgoing, mut conn) = connect(LengthPrefixed::default());

        conn.send_command(&[1, b'z']);

        assert_eq!(outgoing.take(), vec![1, b'z']);
    }
}

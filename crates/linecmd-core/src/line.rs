//! The top layer: commands that are lines of text ending in CR LF.
//!
//! [`LineCommandConnection`] plugs a CR LF recogniser into the framer and adds
//! line-oriented send operations.  Each recognised line is decoded as UTF-8
//! (terminator stripped) and handed to a [`LineDelegate`].  A line that is not
//! valid UTF-8 is reported through a separate callback and does *not* close
//! the connection; the delegate decides what to do about it.
//!
//! # Line length
//!
//! [`LineConfig::max_line_length`] bounds one line *including* its CR LF, in
//! both directions:
//!
//! - Incoming: once that many bytes are buffered without a CR LF among them,
//!   the connection closes with [`ConnectionError::InputCommandTooLong`].
//! - Outgoing: a line whose encoding plus CR LF would exceed the limit closes
//!   the connection with [`ConnectionError::OutputCommandTooLong`].
//!
//! An outgoing line that itself contains CR LF closes the connection with
//! [`ConnectionError::OutputCommandMalformed`]; nothing of it is sent.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connection::{ByteStreamConnection, ConnectionConfig};
use crate::error::ConnectionError;
use crate::framer::{CommandConnection, CommandHandler};
use crate::stream::{ExecutionContext, InputStream, OutputStream, StreamEvent, StreamEventTarget};

/// Line terminator on the wire.
pub const CRLF: &[u8] = b"\r\n";

/// Maximum line length (terminator included) used when the configured value is 0.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Settings for the line layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LineConfig {
    /// Largest line accepted or sent, CR LF included; 0 selects
    /// [`DEFAULT_MAX_LINE_LENGTH`].
    #[serde(default)]
    pub max_line_length: usize,
}

impl LineConfig {
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    /// The limit actually enforced.
    pub fn effective_max_line_length(&self) -> usize {
        if self.max_line_length == 0 {
            DEFAULT_MAX_LINE_LENGTH
        } else {
            self.max_line_length
        }
    }
}

/// Finds the first complete line in `data`.
///
/// Returns the length of the line including its CR LF, or 0 if no CR LF has
/// arrived yet.
///
/// # Errors
///
/// Returns [`ConnectionError::InputCommandTooLong`] if `max` or more bytes are
/// buffered and none of the first `max` bytes end a line.
///
/// # Examples
///
/// ```rust
/// use linecmd_core::line::find_line;
///
/// assert_eq!(find_line(b"hi\r\nthere", 64).unwrap(), 4);
/// assert_eq!(find_line(b"\r\n", 64).unwrap(), 2);
/// assert_eq!(find_line(b"partial", 64).unwrap(), 0);
/// assert!(find_line(b"far too long", 4).is_err());
/// ```
pub fn find_line(data: &[u8], max: usize) -> Result<usize, ConnectionError> {
    let window = &data[..data.len().min(max)];
    if let Some(pos) = window.windows(CRLF.len()).position(|w| w == CRLF) {
        return Ok(pos + CRLF.len());
    }
    if data.len() >= max {
        return Err(ConnectionError::InputCommandTooLong { max });
    }
    Ok(0)
}

/// Encodes `text` followed by CR LF.
///
/// # Errors
///
/// Returns [`ConnectionError::OutputCommandTooLong`] if the encoded line plus
/// terminator is longer than `max`, and
/// [`ConnectionError::OutputCommandMalformed`] if `text` contains CR LF.
pub fn encode_line(text: &str, max: usize) -> Result<Vec<u8>, ConnectionError> {
    let length = text.len() + CRLF.len();
    if length > max {
        return Err(ConnectionError::OutputCommandTooLong { length, max });
    }
    if text.contains("\r\n") {
        return Err(ConnectionError::OutputCommandMalformed(text.to_string()));
    }
    let mut buf = Vec::with_capacity(length);
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(CRLF);
    Ok(buf)
}

fn send_line_on(stream: &mut ByteStreamConnection, max: usize, line: &str) {
    match encode_line(line, max) {
        Ok(bytes) => stream.send(&bytes),
        Err(e) => {
            stream.close_with_error(Some(e));
        }
    }
}

fn send_lines_on<S: AsRef<str>>(stream: &mut ByteStreamConnection, max: usize, lines: &[S]) {
    if lines.is_empty() {
        debug!(connection = %stream.name(), "send_lines called with no lines");
        return;
    }
    let mut bytes = Vec::new();
    for line in lines {
        match encode_line(line.as_ref(), max) {
            Ok(encoded) => bytes.extend_from_slice(&encoded),
            Err(e) => {
                stream.close_with_error(Some(e));
                return;
            }
        }
    }
    stream.send(&bytes);
}

/// Something lines can be sent through.
pub trait LineSink {
    /// Sends `line` followed by CR LF.
    fn send_line(&mut self, line: &str);

    /// Sends each element of `lines` as its own line, in order.  `lines`
    /// should not be empty; an empty slice sends nothing.
    fn send_lines<S: AsRef<str>>(&mut self, lines: &[S]);
}

/// Handle given to [`LineDelegate`] callbacks for replying or closing.
pub struct LineWriter<'a> {
    stream: &'a mut ByteStreamConnection,
    max_line_length: usize,
}

impl<'a> LineWriter<'a> {
    pub fn new(stream: &'a mut ByteStreamConnection, max_line_length: usize) -> Self {
        Self {
            stream,
            max_line_length,
        }
    }

    pub fn name(&self) -> &str {
        self.stream.name()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    /// Closes the connection; the delegate is not notified.
    pub fn close(&mut self) {
        self.stream.close();
    }

    /// Closes without notification once everything sent so far has been
    /// written.  No further lines are delivered to the delegate.
    pub fn close_when_flushed(&mut self) {
        self.stream.close_when_flushed();
    }

    /// Closes the connection; the delegate's `will_close_with_error` runs
    /// after the current callback returns.
    pub fn close_with_error(&mut self, error: Option<ConnectionError>) {
        self.stream.close_with_error(error);
    }
}

impl LineSink for LineWriter<'_> {
    fn send_line(&mut self, line: &str) {
        send_line_on(self.stream, self.max_line_length, line);
    }

    fn send_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
        send_lines_on(self.stream, self.max_line_length, lines);
    }
}

/// Callbacks from a [`LineCommandConnection`].  All methods default to no-ops.
pub trait LineDelegate {
    /// A CR LF terminated line arrived.  `line` excludes the terminator and
    /// may be empty.
    fn did_receive_line(&mut self, writer: &mut LineWriter<'_>, line: &str) {
        let _ = (writer, line);
    }

    /// A complete line arrived but was not valid UTF-8.  `bytes` excludes the
    /// terminator.  The connection stays open unless the delegate closes it.
    fn did_receive_malformed_line(
        &mut self,
        writer: &mut LineWriter<'_>,
        bytes: &[u8],
        error: &ConnectionError,
    ) {
        let _ = (writer, bytes, error);
    }

    /// The connection closed by itself.  `error` is `None` for a clean EOF.
    /// The connection is fully torn down; remove it from any table of live
    /// connections.
    fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
        let _ = error;
    }
}

/// Non-owning delegate: callbacks are skipped once the target is dropped.
///
/// The target must not be mutably borrowed while the connection is handling
/// an event; if it is, the callback is skipped with a warning.
impl<D: LineDelegate> LineDelegate for Weak<RefCell<D>> {
    fn did_receive_line(&mut self, writer: &mut LineWriter<'_>, line: &str) {
        with_target(self, |d| d.did_receive_line(writer, line));
    }

    fn did_receive_malformed_line(
        &mut self,
        writer: &mut LineWriter<'_>,
        bytes: &[u8],
        error: &ConnectionError,
    ) {
        with_target(self, |d| d.did_receive_malformed_line(writer, bytes, error));
    }

    fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
        with_target(self, |d| d.will_close_with_error(error));
    }
}

fn with_target<D>(weak: &Weak<RefCell<D>>, f: impl FnOnce(&mut D)) {
    let Some(target) = weak.upgrade() else {
        return;
    };
    match target.try_borrow_mut() {
        Ok(mut d) => f(&mut d),
        Err(_) => warn!("line delegate is already borrowed; callback skipped"),
    };
}

/// [`CommandHandler`] that frames CR LF lines and forwards them to a delegate.
#[derive(Debug)]
pub struct LineHandler<D> {
    delegate: D,
    max_line_length: usize,
}

impl<D: LineDelegate> LineHandler<D> {
    pub fn new(delegate: D, config: LineConfig) -> Self {
        Self {
            delegate,
            max_line_length: config.effective_max_line_length(),
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl<D: LineDelegate> CommandHandler for LineHandler<D> {
    fn parse_command_data(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        find_line(data, self.max_line_length)
    }

    fn did_receive_command(&mut self, stream: &mut ByteStreamConnection, command: Bytes) {
        let body = &command[..command.len().saturating_sub(CRLF.len())];
        let mut writer = LineWriter::new(stream, self.max_line_length);
        match std::str::from_utf8(body) {
            Ok(line) => self.delegate.did_receive_line(&mut writer, line),
            Err(e) => {
                debug!(connection = %writer.name(), "malformed line: {e}");
                let error = ConnectionError::InputCommandMalformed(e.to_string());
                self.delegate.did_receive_malformed_line(&mut writer, body, &error);
            }
        }
    }

    fn will_close_with_error(&mut self, error: Option<&ConnectionError>) {
        self.delegate.will_close_with_error(error);
    }
}

/// A command connection whose commands are CR LF terminated text lines.
///
/// # Examples
///
/// ```rust
/// use linecmd_core::stream::memory::{ManualRunLoop, Pipe};
/// use linecmd_core::{
///     ConnectionConfig, LineCommandConnection, LineConfig, LineDelegate, LineSink, LineWriter,
///     StreamEvent, StreamEventTarget,
/// };
///
/// struct Echo;
/// impl LineDelegate for Echo {
///     fn did_receive_line(&mut self, writer: &mut LineWriter<'_>, line: &str) {
///         writer.send_line(line);
///     }
/// }
///
/// let (incoming, outgoing) = (Pipe::new(), Pipe::new());
/// let mut conn = LineCommandConnection::new(
///     incoming.reader(),
///     outgoing.writer(),
///     ManualRunLoop::new(),
///     ConnectionConfig::named("echo"),
///     LineConfig::default(),
///     Echo,
/// );
/// conn.open().unwrap();
///
/// incoming.feed(b"hello\r\n");
/// conn.handle_stream_event(StreamEvent::Readable);
/// assert_eq!(outgoing.take(), b"hello\r\n");
/// ```
#[derive(Debug)]
pub struct LineCommandConnection<D> {
    inner: CommandConnection<LineHandler<D>>,
}

impl<D: LineDelegate> LineCommandConnection<D> {
    /// Creates a line connection over the supplied endpoints.
    pub fn new(
        input: impl InputStream + 'static,
        output: impl OutputStream + 'static,
        context: Rc<dyn ExecutionContext>,
        config: ConnectionConfig,
        line_config: LineConfig,
        delegate: D,
    ) -> Self {
        let stream = ByteStreamConnection::new(input, output, context, config);
        Self::from_stream(stream, line_config, delegate)
    }

    /// Wraps an existing, not yet opened byte-stream connection.
    pub fn from_stream(stream: ByteStreamConnection, line_config: LineConfig, delegate: D) -> Self {
        Self {
            inner: CommandConnection::new(stream, LineHandler::new(delegate, line_config)),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn error(&self) -> Option<&ConnectionError> {
        self.inner.error()
    }

    pub fn stream(&self) -> &ByteStreamConnection {
        self.inner.stream()
    }

    pub fn delegate(&self) -> &D {
        &self.inner.handler().delegate
    }

    pub fn delegate_mut(&mut self) -> &mut D {
        &mut self.inner.handler_mut().delegate
    }

    pub fn max_line_length(&self) -> usize {
        self.inner.handler().max_line_length
    }

    /// See [`CommandConnection::open`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if already opened.
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        self.inner.open()
    }

    /// Closes without notifying the delegate.  Safe at any time.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// Closes and notifies the delegate, unless already closed.
    pub fn close_with_error(&mut self, error: Option<ConnectionError>) {
        self.inner.close_with_error(error);
    }

    /// Consumes the connection and returns its delegate.
    pub fn into_delegate(self) -> D {
        self.inner.into_parts().1.delegate
    }
}

impl<D: LineDelegate> LineSink for LineCommandConnection<D> {
    fn send_line(&mut self, line: &str) {
        let max = self.max_line_length();
        self.inner.with_stream(|stream| send_line_on(stream, max, line));
    }

    fn send_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
        let max = self.max_line_length();
        self.inner.with_stream(|stream| send_lines_on(stream, max, lines));
    }
}

impl<D: LineDelegate> StreamEventTarget for LineCommandConnection<D> {
    fn handle_stream_event(&mut self, event: StreamEvent) {
        self.inner.handle_stream_event(event);
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn wants_write(&self) -> bool {
        self.inner.stream().wants_write()
    }

    fn wants_read(&self) -> bool {
        self.inner.stream().wants_read()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

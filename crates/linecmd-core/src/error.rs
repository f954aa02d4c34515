//! Error types shared by every layer of the connection stack.
//!
//! Most connection errors come from the underlying byte streams, but some are
//! synthesized by the stack itself (buffer overflow, over-long commands).  They
//! all travel through the same close-notification path so a delegate sees one
//! error per connection, at most once.

use std::io;

use thiserror::Error;

/// Reasons a connection can fail or a command can be rejected.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The underlying byte stream reported an error.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// Queued output would exceed the output buffer capacity.
    #[error("send buffer full: {queued} bytes queued, {requested} more requested, capacity {capacity}")]
    OutputBufferFull {
        queued: usize,
        requested: usize,
        capacity: usize,
    },

    /// Incoming bytes would exceed the receive buffer capacity.
    #[error("receive buffer full: capacity {capacity}")]
    InputBufferFull { capacity: usize },

    /// An outgoing command (including its terminator) exceeds the configured maximum.
    #[error("output command too long: {length} bytes, maximum {max}")]
    OutputCommandTooLong { length: usize, max: usize },

    /// An outgoing line contains an embedded CR LF.
    #[error("malformed output line: {0:?} contains CR LF")]
    OutputCommandMalformed(String),

    /// Data arrived but nothing is installed to parse it.
    #[error("unexpected input: no command parser installed")]
    InputUnexpected,

    /// An incoming command grew past the configured maximum without completing.
    #[error("input command too long: more than {max} bytes without a terminator")]
    InputCommandTooLong { max: usize },

    /// An incoming command was complete but could not be decoded.
    #[error("malformed command: {0}")]
    InputCommandMalformed(String),

    /// The operation is not legal in the connection's current state.
    #[error("invalid connection state: {0}")]
    InvalidState(&'static str),
}

/// The kind of a [`ConnectionError`], without its payload.
///
/// Lets callers tell protocol overload apart from network failure without
/// matching on the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    OutputBufferFull,
    InputBufferFull,
    OutputCommandTooLong,
    OutputCommandMalformed,
    InputUnexpected,
    InputCommandTooLong,
    InputCommandMalformed,
    InvalidState,
}

impl ConnectionError {
    /// Returns the payload-free kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::OutputBufferFull { .. } => ErrorKind::OutputBufferFull,
            Self::InputBufferFull { .. } => ErrorKind::InputBufferFull,
            Self::OutputCommandTooLong { .. } => ErrorKind::OutputCommandTooLong,
            Self::OutputCommandMalformed(_) => ErrorKind::OutputCommandMalformed,
            Self::InputUnexpected => ErrorKind::InputUnexpected,
            Self::InputCommandTooLong { .. } => ErrorKind::InputCommandTooLong,
            Self::InputCommandMalformed(_) => ErrorKind::InputCommandMalformed,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    /// Returns `true` if the error was synthesized by the stack rather than
    /// reported by the transport.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

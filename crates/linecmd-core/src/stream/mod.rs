//! Collaborator contracts: byte-stream endpoints and the execution context.
//!
//! The connection stack never performs I/O on its own schedule.  Something
//! else (a test, a hand-written loop, or the tokio driver in [`tcp`]) owns the
//! *execution context*: it watches the endpoints and, when one becomes ready,
//! hands a [`StreamEvent`] to the connection.  The connection then reads or
//! writes without blocking and returns.
//!
//! # Endpoint semantics
//!
//! Endpoints are ordinary [`std::io::Read`] / [`std::io::Write`] objects used
//! in non-blocking style:
//!
//! | Result                       | Meaning                                  |
//! |------------------------------|------------------------------------------|
//! | `Ok(n)` with `n > 0`         | `n` bytes transferred                    |
//! | `Ok(0)` from `read`          | end of stream (peer closed cleanly)      |
//! | `Err(WouldBlock)`            | nothing more right now; wait for an event |
//! | `Err(Interrupted)`           | retry immediately                        |
//! | any other `Err`              | transport failure, terminal              |

use std::io;

pub mod memory;
#[cfg(feature = "tokio")]
pub mod tcp;

/// The readable half of a duplex byte stream.
pub trait InputStream: io::Read {
    /// Prepares the endpoint for use.  Called once from `open()`.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Releases the endpoint.  Called once from `close()`.
    fn close(&mut self) {}
}

/// The writable half of a duplex byte stream.
pub trait OutputStream: io::Write {
    /// Prepares the endpoint for use.  Called once from `open()`.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Releases the endpoint.  Called once from `close()`.
    fn close(&mut self) {}
}

/// The event loop a connection registers with while it is open.
///
/// A connection calls [`register`](Self::register) exactly once when opened
/// and [`deregister`](Self::deregister) exactly once when closed.  Between the
/// two, the context is expected to deliver [`StreamEvent`]s to the connection
/// on the thread that owns it.
pub trait ExecutionContext {
    fn register(&self, name: &str);
    fn deregister(&self, name: &str);
}

/// Readiness notifications delivered by an execution context.
#[derive(Debug)]
pub enum StreamEvent {
    /// The input endpoint may have bytes available.
    Readable,
    /// The output endpoint may accept more bytes.
    Writable,
    /// The context itself observed a failure on the underlying stream.
    ErrorOccurred(io::Error),
}

/// Anything an execution context can dispatch [`StreamEvent`]s to.
pub trait StreamEventTarget {
    fn handle_stream_event(&mut self, event: StreamEvent);

    /// `false` once the connection has closed; the context should stop
    /// delivering events.
    fn is_open(&self) -> bool;

    /// `true` while queued output is waiting for the output endpoint.
    fn wants_write(&self) -> bool;

    /// `false` while the target only drains output before closing.
    fn wants_read(&self) -> bool {
        self.is_open()
    }
}

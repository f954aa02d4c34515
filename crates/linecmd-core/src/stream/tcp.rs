//! Tokio-backed endpoints and execution context (feature `tokio`).
//!
//! A [`tokio::net::TcpStream`] is shared between a [`TcpInput`], a
//! [`TcpOutput`] and the driver loop.  The endpoints use the stream's
//! non-blocking `try_read` / `try_write`, which return `WouldBlock` exactly
//! like the endpoint contract expects.  The driver awaits readiness with
//! [`TcpStream::ready`] and turns it into [`StreamEvent`]s.
//!
//! Everything here is `!Send` by construction (`Rc`), so connections must be
//! driven from a single thread, typically inside a [`tokio::task::LocalSet`].
//! The socket itself is released when the connection and the driver's handle
//! are both dropped.

use std::cell::Cell;
use std::io;
use std::rc::Rc;

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
use tracing::trace;

use super::{ExecutionContext, InputStream, OutputStream, StreamEvent, StreamEventTarget};

/// Reading endpoint over a shared TCP stream.
#[derive(Debug, Clone)]
pub struct TcpInput {
    stream: Rc<TcpStream>,
}

impl io::Read for TcpInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }
}

impl InputStream for TcpInput {}

/// Writing endpoint over a shared TCP stream.
#[derive(Debug, Clone)]
pub struct TcpOutput {
    stream: Rc<TcpStream>,
}

impl io::Write for TcpOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputStream for TcpOutput {}

/// Splits a stream into a driver handle and the two endpoints.
pub fn endpoints(stream: TcpStream) -> (Rc<TcpStream>, TcpInput, TcpOutput) {
    let shared = Rc::new(stream);
    let input = TcpInput {
        stream: Rc::clone(&shared),
    };
    let output = TcpOutput {
        stream: Rc::clone(&shared),
    };
    (shared, input, output)
}

/// Execution context for one connection driven by one local task.
///
/// The driver keeps dispatching events only while the connection is
/// registered, so a close from inside a callback ends the loop.
#[derive(Debug, Default)]
pub struct TaskContext {
    attached: Cell<bool>,
}

impl TaskContext {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }
}

impl ExecutionContext for TaskContext {
    fn register(&self, name: &str) {
        trace!(connection = %name, "attached to task");
        self.attached.set(true);
    }

    fn deregister(&self, name: &str) {
        trace!(connection = %name, "detached from task");
        self.attached.set(false);
    }
}

/// The readiness a target currently cares about.
pub fn interest<T: StreamEventTarget>(target: &T) -> Interest {
    match (target.wants_read(), target.wants_write()) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (false, true) => Interest::WRITABLE,
        _ => Interest::READABLE,
    }
}

/// Delivers the outcome of one readiness wait to `target`.
pub fn dispatch<T: StreamEventTarget>(target: &mut T, ready: io::Result<Ready>) {
    match ready {
        Ok(ready) => {
            if ready.is_writable() && target.is_open() {
                target.handle_stream_event(StreamEvent::Writable);
            }
            if (ready.is_readable() || ready.is_read_closed()) && target.wants_read() {
                target.handle_stream_event(StreamEvent::Readable);
            }
        }
        Err(e) => target.handle_stream_event(StreamEvent::ErrorOccurred(e)),
    }
}

/// Dispatches readiness events until the target closes or detaches.
///
/// The target must already be open.
pub async fn drive<T: StreamEventTarget>(target: &mut T, stream: &TcpStream, context: &TaskContext) {
    while target.is_open() && context.is_attached() {
        let ready = stream.ready(interest(target)).await;
        dispatch(target, ready);
    }
}

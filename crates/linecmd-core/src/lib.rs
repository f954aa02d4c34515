//! # linecmd-core
//!
//! Shared library for command-oriented network connections: a bounded
//! byte-stream connection, a pluggable command framer on top of it, and a
//! CR LF line protocol on top of that.
//!
//! This crate is used by both the currency server and the currency client.
//! Without the `tokio` feature it has zero dependencies on sockets or an async
//! runtime; the caller supplies the byte-stream endpoints and the execution
//! context that delivers readiness events.
//!
//! # Architecture overview (for beginners)
//!
//! TCP gives you an undifferentiated stream of bytes.  A protocol built on top
//! of it needs to answer "where does one command end and the next one begin?".
//! The stack in this crate answers that in three layers:
//!
//! - **`connection`** – [`ByteStreamConnection`] owns an input and an output
//!   endpoint plus a bounded buffer for each direction.  It knows how to read
//!   whatever is available, how to flush queued output, and how to tear itself
//!   down exactly once when something goes wrong.
//!
//! - **`framer`** – [`CommandConnection`] repeatedly asks a
//!   [`CommandHandler`] "is there a complete command at the front of this
//!   buffer?", removes whatever the handler reports as consumed and dispatches
//!   it, in receipt order.
//!
//! - **`line`** – [`LineCommandConnection`] supplies the concrete handler that
//!   recognises CR LF terminated lines and decodes them as UTF-8 text.
//!
//! The **`protocol`** module adds the request/response convention spoken over
//! lines (data lines prefixed with two spaces, a `+ ` / `- ` status line), and
//! **`stream`** defines the collaborator contracts (endpoints, execution
//! context) together with in-memory implementations.
//!
//! ```text
//!  readable ─► ByteStreamConnection ─► CommandConnection ─► LineHandler ─► LineDelegate
//!              (bounded buffers)        (parse loop)         (CR LF, UTF-8)  (your code)
//! ```

pub mod buffer;
pub mod connection;
pub mod error;
pub mod framer;
pub mod line;
pub mod protocol;
pub mod stream;

// Re-export the most-used types at the crate root so callers can write
// `linecmd_core::LineCommandConnection` instead of the full module path.
pub use buffer::BoundedBuffer;
pub use connection::{ByteStreamConnection, ConnectionConfig};
pub use error::{ConnectionError, ErrorKind};
pub use framer::{CommandConnection, CommandHandler};
pub use line::{LineCommandConnection, LineConfig, LineDelegate, LineSink, LineWriter};
pub use protocol::response::{Response, ResponseAssembler, ResponseError, ResponseSink};
pub use stream::{ExecutionContext, InputStream, OutputStream, StreamEvent, StreamEventTarget};

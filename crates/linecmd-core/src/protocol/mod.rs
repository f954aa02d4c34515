//! Request/response convention spoken over line command connections.
//!
//! ```text
//! client → "help" CR LF
//! server → "  convert <name> <value> to <name>" CR LF    data line (two spaces)
//!          "  goodbye" CR LF                             data line
//!          "+ OK" CR LF                                  status line
//! ```
//!
//! A response is zero or more data lines followed by exactly one status line
//! starting with `"+ "` (success) or `"- "` (failure) and a comment.

pub mod response;

pub use response::{Response, ResponseAssembler, ResponseError, ResponseSink};

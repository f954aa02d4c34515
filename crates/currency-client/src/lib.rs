//! currency-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client connects to a currency server, sends each request as one CR LF
//! line, and reassembles the server's multi-line responses.  Responses arrive
//! in request order, so each one is paired with the oldest unanswered request.

/// Application layer: request/response pairing and rendering.
pub mod application;

/// Infrastructure layer: the TCP line connection to the server.
pub mod infrastructure;

//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `linecmd_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`network`** – Resolves and connects to the server, then drives a line
//!   connection whose delegate reassembles responses and forwards them on an
//!   `mpsc` channel.

pub mod network;

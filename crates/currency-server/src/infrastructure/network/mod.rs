//! Network infrastructure for the currency server.
//!
//! # Sub-modules
//!
//! - **`server`** – Owns the TCP listener and the table of live connections.
//!   Accepts connections, spawns one local task per connection, and carries
//!   out `stop` by closing every live connection.
//!
//! - **`session`** – The per-connection line delegate: runs each request
//!   through the command set, writes the response, and reports closes and
//!   stop requests to the server over a channel.
//!
//! All of this is single-threaded: connections are `!Send` and must run on a
//! [`tokio::task::LocalSet`].

pub mod server;
pub mod session;

pub use server::{CurrencyServer, ServerError, ServerSettings, ServerStats, StopHandle};
pub use session::{CurrencySession, ServerEvent};

//! Application layer for the currency server.
//!
//! Nothing here touches a socket or a file.  Use cases depend on the
//! [`rates::ExchangeRates`] abstraction, so the infrastructure can supply rates
//! from configuration while tests supply mocks.
//!
//! # Sub-modules
//!
//! - **`commands`** – Parses one request line into a [`commands::Command`] and
//!   executes it, producing the [`linecmd_core::Response`] to send back plus
//!   what the connection should do afterwards (stay open, close, stop the
//!   server).
//!
//! - **`rates`** – The exchange-rate seam and its table-backed implementation.

pub mod commands;
pub mod rates;

//! Application layer for the client.
//!
//! - **`requests`** – Tracks outstanding requests, pairs each completed
//!   [`linecmd_core::Response`] with the request it answers, and renders the
//!   pair for display.

pub mod requests;

//! Infrastructure layer for the currency server.
//!
//! Contains the OS-facing adapters: the TCP listener and per-connection
//! sessions, and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `linecmd_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;

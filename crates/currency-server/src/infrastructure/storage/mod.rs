//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file, fills in
//! defaults for anything missing, and turns the sections into the settings
//! the network layer and the rate table need.

pub mod config;

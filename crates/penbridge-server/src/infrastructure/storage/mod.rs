//! Storage infrastructure: configuration file loading.
//!
//! The `config` sub-module reads the TOML configuration file from the
//! platform-appropriate directory, fills defaults for anything absent, and
//! resolves it into the settings each protocol server takes.

pub mod config;

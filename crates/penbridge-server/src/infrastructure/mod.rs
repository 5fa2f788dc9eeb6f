//! Infrastructure layer: sockets, pipes, the discovery registry and
//! configuration files.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `penbridge_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;

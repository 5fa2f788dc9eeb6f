//! Application layer: how captured pen events reach the protocol servers.
//!
//! # Sub-modules
//!
//! - **`handler`** – The [`Handler`](handler::Handler) contract every
//!   consumer of device/state updates implements, plus the fan-out and
//!   logging decorators that compose consumers.
//!
//! - **`capture`** – A channel-backed pump so that a capture source running
//!   on any thread delivers its events into a handler from one dedicated
//!   producer thread, in emission order.

pub mod capture;
pub mod handler;

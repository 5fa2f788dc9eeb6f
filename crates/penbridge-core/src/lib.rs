//! # penbridge-core
//!
//! Shared library for the pen/tablet IPC bridge containing the binary message
//! model for both wire protocols, their codecs, the partial-read-safe frame
//! reader, and the translation from the current event model to the frozen
//! legacy layout.
//!
//! It has zero dependencies on OS APIs or sockets; everything here operates on
//! byte slices or on a generic [`std::io::Read`].
//!
//! # Architecture overview
//!
//! A capture source produces [`DeviceInfo`] snapshots (what the tablet can do)
//! and [`State`] snapshots (where the pen is and what it is pressing).  Those
//! are republished to clients over two incompatible protocols:
//!
//! - **`protocol`** – the current (V2) records and codec, the legacy (V1)
//!   records and codec, fixed-capacity text fields, framing, and sequence
//!   numbers.
//!
//! - **`domain`** – pure logic with no I/O: synthesising a legacy 16+16-bit
//!   vendor/product identity from a persistent device id, and translating
//!   current-model snapshots into legacy records.

pub mod domain;
pub mod protocol;

pub use domain::identity::{synthesize_vendor_product, LegacyIdentity};
pub use domain::translate::{translate_device, translate_state};
pub use protocol::codec::{decode_header, decode_message, encode_message, ProtocolError};
pub use protocol::messages::{
    DeviceInfo, Header, Hello, Message, MessageType, State, ValidMask,
};
pub use protocol::text::FixedStr;

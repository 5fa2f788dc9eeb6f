//! Pure translation logic from the current event model to the legacy one.
//!
//! Nothing here touches the OS; both modules operate on plain values and are
//! exercised directly by unit tests.

/// Synthesis of a legacy 16+16-bit vendor/product pair from a persistent id.
pub mod identity;

/// Current-model [`DeviceInfo`](crate::DeviceInfo)/[`State`](crate::State)
/// to legacy records.
pub mod translate;

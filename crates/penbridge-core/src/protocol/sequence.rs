//! Lock-free ping sequence numbering.
//!
//! Each server owns one counter for its whole lifetime and shares it between
//! the ping thread and whoever else needs to stamp a sequence number.  The
//! counter is an `AtomicU64`, so concurrent callers never receive the same
//! value and never block each other.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, strictly increasing counter for ping sequence numbers.
///
/// The first value handed out is 1; 0 is never produced until the counter
/// wraps at `u64::MAX`.
///
/// # Examples
///
/// ```rust
/// use penbridge_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    /// The most recently issued value.
    last: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Advances the counter and returns the new value.
    ///
    /// `Relaxed` ordering is enough: the value orders pings, it does not
    /// publish any other memory.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// The most recently issued value, or 0 if none has been issued yet.
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

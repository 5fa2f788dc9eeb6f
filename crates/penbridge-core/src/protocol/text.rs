//! Fixed-capacity, NUL-padded UTF-8 text fields.
//!
//! Several wire records embed text as a fixed-size byte array (for example
//! the 256-byte `persistentId` of a `DeviceInfo`).  Host string types do not
//! line up with that layout, so the field is modelled explicitly:
//!
//! - **Writing** truncates to at most `N - 1` bytes, never splitting a UTF-8
//!   character, and zero-fills the rest.  A terminating NUL therefore always
//!   exists in anything this crate produces.
//! - **Reading** scans for the first NUL.  A buffer written by a foreign
//!   implementation without any NUL is read up to its full capacity; callers
//!   that treat that as a format violation check [`FixedStr::is_nul_terminated`].

use std::fmt;

/// A bounded, NUL-padded UTF-8 text field of exactly `N` bytes on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Size of the field on the wire, in bytes.
    pub const CAPACITY: usize = N;

    /// Returns an all-NUL field.
    pub const fn empty() -> Self {
        Self { bytes: [0; N] }
    }

    /// Creates a field holding `text`, truncated to fit.
    pub fn new(text: &str) -> Self {
        let mut field = Self::empty();
        field.set(text);
        field
    }

    /// Wraps raw wire bytes without validation.
    pub const fn from_bytes(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// Replaces the contents with `text`, truncating at a character boundary
    /// so that at least one trailing NUL remains.
    pub fn set(&mut self, text: &str) {
        self.bytes = [0; N];
        let mut end = text.len().min(N.saturating_sub(1));
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
    }

    /// The raw wire bytes, including padding.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Number of bytes before the first NUL (or `N` if there is none).
    pub fn len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if the buffer contains at least one NUL byte.
    pub fn is_nul_terminated(&self) -> bool {
        self.bytes.contains(&0)
    }

    /// The text up to the first NUL.
    ///
    /// Invalid UTF-8 from a foreign writer is cut at the last valid character.
    pub fn as_str(&self) -> &str {
        let raw = &self.bytes[..self.len()];
        match std::str::from_utf8(raw) {
            Ok(s) => s,
            Err(e) => std::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> From<&str> for FixedStr<N> {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

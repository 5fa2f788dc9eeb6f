//! Legacy device identity synthesis.
//!
//! The legacy protocol identifies a tablet by a USB-style vendor/product pair.
//! Current capture sources only know an opaque persistent id such as
//! `wintab:ABC123`, so a pair is derived from it with a 32-bit FNV-1a hash of
//! the id's UTF-8 bytes: the low 16 bits become the vendor id and the high
//! 16 bits the product id.
//!
//! The mapping is one-way and deterministic.  Distinct ids can collide; that
//! is an accepted limit of a 32-bit identity space and is not detected.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Vendor/product pair stamped into every legacy header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LegacyIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl LegacyIdentity {
    /// Derives the identity for `persistent_id`.
    pub fn from_persistent_id(persistent_id: &str) -> Self {
        let (vendor_id, product_id) = synthesize_vendor_product(persistent_id);
        Self {
            vendor_id,
            product_id,
        }
    }
}

/// 32-bit FNV-1a over `bytes`.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Returns `(vendor_id, product_id)` for `persistent_id`.
///
/// # Examples
///
/// ```rust
/// use penbridge_core::synthesize_vendor_product;
///
/// let a = synthesize_vendor_product("wintab:ABC123");
/// let b = synthesize_vendor_product("wintab:ABC123");
/// assert_eq!(a, b);
/// ```
pub fn synthesize_vendor_product(persistent_id: &str) -> (u16, u16) {
    let hash = fnv1a_32(persistent_id.as_bytes());
    ((hash & 0xFFFF) as u16, (hash >> 16) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_empty_id_splits_offset_basis() {
        // Arrange / Act
        let (vid, pid) = synthesize_vendor_product("");

        // Assert
        assert_eq!(vid, 0x9dc5);
        assert_eq!(pid, 0x811c);
    }

    #[test]
    fn test_low_half_is_vendor_high_half_is_product() {
        let (vid, pid) = synthesize_vendor_product("a");
        assert_eq!(vid, 0x292c);
        assert_eq!(pid, 0xe40c);
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let first = LegacyIdentity::from_persistent_id("wintab:ABC123");
        for _ in 0..10 {
            assert_eq!(LegacyIdentity::from_persistent_id("wintab:ABC123"), first);
        }
    }

    #[test]
    fn test_different_ids_usually_differ() {
        // Collisions are possible in principle; these two inputs do not collide.
        assert_ne!(
            synthesize_vendor_product("wintab:ABC123"),
            synthesize_vendor_product("wintab:ABC124")
        );
    }

    #[test]
    fn test_hash_covers_utf8_bytes_not_chars() {
        assert_eq!(fnv1a_32("é".as_bytes()), fnv1a_32(&[0xC3, 0xA9]));
    }
}

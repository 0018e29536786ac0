//! Canonical serialization and content hashing.
//!
//! Everything that is hashed, committed, or compared across hosts goes
//! through this module.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable map order: hashed payloads use `BTreeMap`, never `HashMap`
//! - Stable coordinate format: geometry is quantized to six fractional
//!   digits before serialization (see `geometry::geojson`)

use serde::Serialize;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// Relies on declaration-ordered struct serialization; callers must not put
/// `HashMap` fields in hashed payloads.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization failed")
}

/// SHA-256 over raw bytes, as a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 content hash of a value's canonical JSON bytes.
pub fn content_hash<T: Serialize>(value: &T) -> String {
    sha256_hex(&to_canonical_bytes(value))
}

/// Cheap non-cryptographic fingerprint (xxh64) of a value's canonical bytes.
///
/// Used for cache keys and registry fingerprints, never for commitments.
pub fn fingerprint_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", xxh64(&to_canonical_bytes(value), 0))
}

/// Compare two hex digests in constant time.
pub fn digests_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let r = Record {
            name: "ward-5".to_string(),
            count: 11,
        };
        assert_eq!(to_canonical_bytes(&r), to_canonical_bytes(&r));
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_differs_on_change() {
        let a = Record {
            name: "a".to_string(),
            count: 1,
        };
        let b = Record {
            name: "a".to_string(),
            count: 2,
        };
        assert_ne!(fingerprint_hex(&a), fingerprint_hex(&b));
    }

    #[test]
    fn test_digests_equal() {
        let h = sha256_hex(b"x");
        assert!(digests_equal(&h, &h));
        assert!(!digests_equal(&h, &sha256_hex(b"y")));
        assert!(!digests_equal(&h, "short"));
    }
}

//! Blake2b-256 helpers for deriving opaque identifiers.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Hash multiple byte slices in sequence, separated by a zero byte so that
/// `("ab", "c")` and `("a", "bc")` never collide.
pub fn blake2b_256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hex-encoded Blake2b-256 of the given parts (64 lowercase hex characters).
pub fn blake2b_256_hex(parts: &[&[u8]]) -> String {
    hex::encode(blake2b_256_parts(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_is_64_chars() {
        let h = blake2b_256_hex(&[b"hello"]);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn separator_prevents_boundary_collisions() {
        assert_ne!(
            blake2b_256_parts(&[b"ab", b"c"]),
            blake2b_256_parts(&[b"a", b"bc"])
        );
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(
            blake2b_256_hex(&[b"x", b"y"]),
            blake2b_256_hex(&[b"x", b"y"])
        );
    }
}

//! # Hashing Utilities
//!
//! The three hash functions a Graphene client needs, and no more:
//!
//! - **SHA-256**: signing digests (`sha256(chain_id || body)`), WIF
//!   checksums (double SHA-256) and the wallet password check.
//! - **RIPEMD-160**: public key checksums and 20-byte block ids.
//!
//! All functions return fixed-size arrays. The callers always know the
//! length, so there's no reason to pay for a `Vec`.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use muse_protocol::crypto::sha256;
///
/// let hash = sha256(b"MUSE");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the double-SHA-256 hash: `SHA-256(SHA-256(data))`.
///
/// Only used for WIF checksums. Transaction digests are a *single* SHA-256;
/// mixing the two up produces signatures that every node rejects.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Compute the RIPEMD-160 hash of the input data.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over several slices without concatenating them first.
pub fn sha256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // NIST test vector for "abc".
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn ripemd160_known_vector() {
        assert_eq!(
            hex::encode(ripemd160(b"abc")),
            "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
    }

    #[test]
    fn double_sha256_differs_from_single() {
        assert_ne!(sha256(b"tx"), double_sha256(b"tx"));
        assert_eq!(double_sha256(b"tx"), sha256(&sha256(b"tx")));
    }

    #[test]
    fn concat_matches_contiguous_hash() {
        assert_eq!(sha256_concat(&[b"chain", b"body"]), sha256(b"chainbody"));
    }
}

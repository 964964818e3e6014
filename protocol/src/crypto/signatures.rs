//! # Digital Signatures
//!
//! Compact, recoverable secp256k1 signatures in the form Graphene nodes
//! accept.
//!
//! A node never receives the signer's public key. It recovers it from
//! `(digest, signature)` and checks the result against the authorities the
//! transaction requires. That's why every signature carries a recovery byte:
//!
//! ```text
//! byte 0      : 27 + 4 + recovery_id
//! bytes 1..33 : r
//! bytes 33..65: s
//! ```
//!
//! ## Canonical form
//!
//! libsecp256k1 already normalizes to low-S. Graphene additionally demands
//! that neither `r` nor `s` has its high bit set or a redundant leading zero
//! byte. Roughly one signature in four fails that test, so signing retries
//! with a deterministic extra-entropy counter (RFC 6979 `ndata`) until it
//! produces a canonical one.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use super::keys::{PrivateKey, PublicKey};
use crate::config::{MAX_CANONICAL_SIGNING_ATTEMPTS, SIGNATURE_LENGTH, SIGNATURE_RECOVERY_OFFSET};

/// Errors during signature operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes")]
    InvalidLength,

    #[error("invalid recovery byte {0}")]
    InvalidRecoveryByte(u8),

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("no canonical signature found after {0} attempts")]
    NoCanonicalSignature(u32),
}

/// A 65-byte compact recoverable signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompactSignature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl CompactSignature {
    /// Wrap 65 raw bytes. The recovery byte is validated; canonicality is not
    /// (nodes decide what they accept, we only decide what we produce).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let bytes: [u8; SIGNATURE_LENGTH] =
            bytes.try_into().map_err(|_| SignatureError::InvalidLength)?;
        let recid = bytes[0].wrapping_sub(SIGNATURE_RECOVERY_OFFSET);
        if recid > 3 {
            return Err(SignatureError::InvalidRecoveryByte(bytes[0]));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// `true` when `r` and `s` satisfy Graphene's canonical-form rule.
    pub fn is_canonical(&self) -> bool {
        is_canonical(&self.bytes[1..])
    }

    /// Recover the public key that produced this signature over `digest`.
    pub fn recover(&self, digest: &[u8; 32]) -> Result<PublicKey, SignatureError> {
        let recid = RecoveryId::from_i32(
            i32::from(self.bytes[0].wrapping_sub(SIGNATURE_RECOVERY_OFFSET)),
        )
        .map_err(|_| SignatureError::InvalidRecoveryByte(self.bytes[0]))?;
        let sig = RecoverableSignature::from_compact(&self.bytes[1..], recid)
            .map_err(|_| SignatureError::RecoveryFailed)?;
        let secp = Secp256k1::verification_only();
        let pk = secp
            .recover_ecdsa(&Message::from_digest(*digest), &sig)
            .map_err(|_| SignatureError::RecoveryFailed)?;
        Ok(PublicKey::from_inner(pk))
    }
}

impl fmt::Debug for CompactSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompactSignature({})", self.to_hex())
    }
}

impl Serialize for CompactSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CompactSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Graphene's `is_canonical` check over the 64 bytes `r || s`.
fn is_canonical(rs: &[u8]) -> bool {
    rs[0] & 0x80 == 0
        && !(rs[0] == 0 && rs[1] & 0x80 == 0)
        && rs[32] & 0x80 == 0
        && !(rs[32] == 0 && rs[33] & 0x80 == 0)
}

/// Sign a 32-byte digest, returning a canonical compact signature.
///
/// Deterministic: the same key and digest always yield the same signature.
pub fn sign_digest(key: &PrivateKey, digest: &[u8; 32]) -> Result<CompactSignature, SignatureError> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(*digest);

    for attempt in 0..MAX_CANONICAL_SIGNING_ATTEMPTS {
        let sig = if attempt == 0 {
            secp.sign_ecdsa_recoverable(&message, key.secret())
        } else {
            let mut ndata = [0u8; 32];
            ndata[..4].copy_from_slice(&attempt.to_le_bytes());
            secp.sign_ecdsa_recoverable_with_noncedata(&message, key.secret(), &ndata)
        };

        let (recid, rs) = sig.serialize_compact();
        if !is_canonical(&rs) {
            continue;
        }

        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[0] = SIGNATURE_RECOVERY_OFFSET + recid.to_i32() as u8;
        bytes[1..].copy_from_slice(&rs);
        return Ok(CompactSignature { bytes });
    }

    Err(SignatureError::NoCanonicalSignature(MAX_CANONICAL_SIGNING_ATTEMPTS))
}

/// Verify that `signature` over `digest` was produced by `expected`.
pub fn verify_digest(expected: &PublicKey, digest: &[u8; 32], signature: &CompactSignature) -> bool {
    signature
        .recover(digest)
        .map(|recovered| &recovered == expected)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256;

    #[test]
    fn signature_recovers_signer() {
        let key = PrivateKey::generate();
        let digest = sha256(b"transfer 1 MUSE");
        let sig = sign_digest(&key, &digest).unwrap();
        assert_eq!(sig.recover(&digest).unwrap(), key.public_key());
        assert!(verify_digest(&key.public_key(), &digest, &sig));
    }

    #[test]
    fn signatures_are_canonical_and_flagged_compressed() {
        let key = PrivateKey::generate();
        for i in 0..32u8 {
            let digest = sha256(&[i]);
            let sig = sign_digest(&key, &digest).unwrap();
            assert!(sig.is_canonical());
            assert!((31..=34).contains(&sig.as_bytes()[0]));
        }
    }

    #[test]
    fn signing_is_deterministic() {
        let key = PrivateKey::generate();
        let digest = sha256(b"same message");
        assert_eq!(
            sign_digest(&key, &digest).unwrap(),
            sign_digest(&key, &digest).unwrap()
        );
    }

    #[test]
    fn wrong_digest_recovers_other_key() {
        let key = PrivateKey::generate();
        let sig = sign_digest(&key, &sha256(b"a")).unwrap();
        assert!(!verify_digest(&key.public_key(), &sha256(b"b"), &sig));
    }

    #[test]
    fn from_bytes_validates_layout() {
        assert_eq!(
            CompactSignature::from_bytes(&[0u8; 64]),
            Err(SignatureError::InvalidLength)
        );
        let mut bytes = [0u8; 65];
        bytes[0] = 12;
        assert_eq!(
            CompactSignature::from_bytes(&bytes),
            Err(SignatureError::InvalidRecoveryByte(12))
        );
    }

    #[test]
    fn canonical_rule_rejects_high_bits() {
        let mut rs = [0x11u8; 64];
        assert!(is_canonical(&rs));
        rs[0] = 0x80;
        assert!(!is_canonical(&rs));
        rs[0] = 0x00;
        rs[1] = 0x10;
        assert!(!is_canonical(&rs));
        rs[1] = 0x90;
        assert!(is_canonical(&rs));
    }
}

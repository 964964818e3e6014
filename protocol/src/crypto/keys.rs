//! # Key Management
//!
//! secp256k1 private and public keys in the encodings Graphene chains use.
//!
//! - A [`PrivateKey`] is a 32-byte scalar. It travels as WIF
//!   (`5K...`, base58 with a double-SHA-256 checksum) or, for tooling, as
//!   64 hex characters.
//! - A [`PublicKey`] is a compressed 33-byte point. Its textual form is a
//!   chain prefix followed by base58 of `key || ripemd160(key)[..4]`, e.g.
//!   `MUSE6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV`.
//!
//! ## Security considerations
//!
//! - Private keys are erased on drop.
//! - `PrivateKey` deliberately implements neither `Serialize` nor `Display`.
//!   Exporting a key is a conscious act: call [`PrivateKey::to_wif`].
//! - Key bytes are never logged.

use secp256k1::{PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

use super::hash::{double_sha256, ripemd160};
use crate::config::{
    DEFAULT_ADDRESS_PREFIX, KEY_CHECKSUM_LENGTH, PRIVATE_KEY_LENGTH, PUBLIC_KEY_LENGTH,
    WIF_VERSION,
};

/// Errors that can occur during key parsing.
///
/// The messages never echo the offending input; half the time it's a
/// private key someone pasted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(&'static str),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(&'static str),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}

// ---------------------------------------------------------------------------
// PrivateKey
// ---------------------------------------------------------------------------

/// A secp256k1 signing key.
///
/// The scalar is erased when the value is dropped.
pub struct PrivateKey {
    secret: SecretKey,
}

impl PrivateKey {
    /// Generate a fresh key from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::new(&mut rand::thread_rng()),
        }
    }

    /// Build a key from 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(KeyError::InvalidPrivateKey("expected 32 bytes"));
        }
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| KeyError::InvalidPrivateKey("scalar out of range"))?;
        Ok(Self { secret })
    }

    /// Parse a Wallet Import Format string.
    pub fn from_wif(wif: &str) -> Result<Self, KeyError> {
        let raw = Zeroizing::new(
            bs58::decode(wif)
                .into_vec()
                .map_err(|_| KeyError::InvalidPrivateKey("not base58"))?,
        );
        if raw.len() != 1 + PRIVATE_KEY_LENGTH + KEY_CHECKSUM_LENGTH {
            return Err(KeyError::InvalidPrivateKey("wrong WIF length"));
        }
        let (payload, checksum) = raw.split_at(1 + PRIVATE_KEY_LENGTH);
        if payload[0] != WIF_VERSION {
            return Err(KeyError::InvalidPrivateKey("wrong WIF version byte"));
        }
        if double_sha256(payload)[..KEY_CHECKSUM_LENGTH] != *checksum {
            return Err(KeyError::ChecksumMismatch);
        }
        Self::from_bytes(&payload[1..])
    }

    /// Parse either WIF or 64 hex characters.
    pub fn parse(material: &str) -> Result<Self, KeyError> {
        let material = material.trim();
        if material.len() == PRIVATE_KEY_LENGTH * 2
            && material.chars().all(|c| c.is_ascii_hexdigit())
        {
            let bytes = Zeroizing::new(
                hex::decode(material).map_err(|_| KeyError::InvalidPrivateKey("bad hex"))?,
            );
            return Self::from_bytes(&bytes);
        }
        Self::from_wif(material)
    }

    /// Export as WIF. Handle the result with the same care as the key.
    pub fn to_wif(&self) -> Zeroizing<String> {
        let mut payload = Zeroizing::new(Vec::with_capacity(1 + PRIVATE_KEY_LENGTH + 4));
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.secret.secret_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..KEY_CHECKSUM_LENGTH]);
        Zeroizing::new(bs58::encode(payload.as_slice()).into_string())
    }

    /// Raw scalar bytes, wrapped so they are erased after use.
    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LENGTH]> {
        Zeroizing::new(self.secret.secret_bytes())
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey {
            inner: SecpPublicKey::from_secret_key(&secp, &self.secret),
        }
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            secret: self.secret,
        }
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A compressed secp256k1 public key.
///
/// Ordering follows the 33-byte compressed encoding, which is the order
/// Graphene expects inside `key_auths` maps.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    inner: SecpPublicKey,
}

impl PublicKey {
    /// Parse 33 compressed bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(KeyError::InvalidPublicKey("expected 33 compressed bytes"));
        }
        let inner = SecpPublicKey::from_slice(bytes)
            .map_err(|_| KeyError::InvalidPublicKey("not a curve point"))?;
        Ok(Self { inner })
    }

    /// Compressed 33-byte encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.inner.serialize()
    }

    /// Render with an explicit chain prefix.
    pub fn to_string_with_prefix(&self, prefix: &str) -> String {
        let key = self.to_bytes();
        let checksum = ripemd160(&key);
        let mut payload = Vec::with_capacity(PUBLIC_KEY_LENGTH + KEY_CHECKSUM_LENGTH);
        payload.extend_from_slice(&key);
        payload.extend_from_slice(&checksum[..KEY_CHECKSUM_LENGTH]);
        format!("{}{}", prefix, bs58::encode(payload).into_string())
    }

    /// Parse a textual key carrying the given prefix.
    pub fn from_str_with_prefix(s: &str, prefix: &str) -> Result<Self, KeyError> {
        let body = s
            .strip_prefix(prefix)
            .ok_or(KeyError::InvalidPublicKey("wrong prefix"))?;
        let raw = bs58::decode(body)
            .into_vec()
            .map_err(|_| KeyError::InvalidPublicKey("not base58"))?;
        if raw.len() != PUBLIC_KEY_LENGTH + KEY_CHECKSUM_LENGTH {
            return Err(KeyError::InvalidPublicKey("wrong length"));
        }
        let (key, checksum) = raw.split_at(PUBLIC_KEY_LENGTH);
        if ripemd160(key)[..KEY_CHECKSUM_LENGTH] != *checksum {
            return Err(KeyError::ChecksumMismatch);
        }
        Self::from_bytes(key)
    }

    pub(crate) fn inner(&self) -> &SecpPublicKey {
        &self.inner
    }

    pub(crate) fn from_inner(inner: SecpPublicKey) -> Self {
        Self { inner }
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with_prefix(DEFAULT_ADDRESS_PREFIX))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_with_prefix(s, DEFAULT_ADDRESS_PREFIX)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test vector from the Graphene documentation.
    const WIF: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";

    #[test]
    fn wif_roundtrip() {
        let key = PrivateKey::from_wif(WIF).unwrap();
        assert_eq!(key.to_wif().as_str(), WIF);
    }

    #[test]
    fn hex_and_wif_parse_to_same_key() {
        let key = PrivateKey::from_wif(WIF).unwrap();
        let hex_form = hex::encode(key.to_bytes().as_slice());
        let parsed = PrivateKey::parse(&hex_form).unwrap();
        assert_eq!(parsed.public_key(), key.public_key());
    }

    #[test]
    fn corrupted_wif_rejected() {
        let mut broken = WIF.to_string();
        broken.pop();
        broken.push('4');
        assert!(PrivateKey::from_wif(&broken).is_err());
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn public_key_text_roundtrip() {
        let pk = PrivateKey::generate().public_key();
        let text = pk.to_string();
        assert!(text.starts_with("MUSE"));
        assert_eq!(text.parse::<PublicKey>().unwrap(), pk);
    }

    #[test]
    fn public_key_custom_prefix() {
        let pk = PrivateKey::generate().public_key();
        let text = pk.to_string_with_prefix("BTS");
        assert!(text.starts_with("BTS"));
        assert_eq!(PublicKey::from_str_with_prefix(&text, "BTS").unwrap(), pk);
        assert!(PublicKey::from_str_with_prefix(&text, "MUSE").is_err());
    }

    #[test]
    fn public_key_checksum_enforced() {
        let pk = PrivateKey::generate().public_key();
        let mut text = pk.to_string();
        let last = text.pop().unwrap();
        text.push(if last == '1' { '2' } else { '1' });
        assert!(text.parse::<PublicKey>().is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let key = PrivateKey::from_wif(WIF).unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(WIF));
        assert!(!rendered.contains(&hex::encode(key.to_bytes().as_slice())));
    }

    #[test]
    fn public_key_serde_json() {
        let pk = PrivateKey::generate().public_key();
        let json = serde_json::to_string(&pk).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }
}

//! # AES-256-GCM Sealing
//!
//! Authenticated encryption for private keys at rest.
//!
//! Every wallet entry is sealed under the session key with the entry's own
//! public key as Additional Authenticated Data. Swapping two ciphertexts in
//! the storage file therefore fails authentication instead of silently
//! handing back the wrong private key for a public key.
//!
//! ## Nonce management
//!
//! Random 96-bit nonces from the OS RNG. A wallet holds a handful of keys
//! and re-seals them only on passphrase change, so the birthday bound is
//! not a practical concern.
//!
//! ## Wire format
//!
//! `seal()` returns `nonce || ciphertext || tag` as a single `Vec<u8>`;
//! `open()` expects exactly that.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during sealing/opening.
///
/// "Wrong key" and "tampered ciphertext" are the same error on purpose.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("sealed data too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Encrypt `plaintext` under `key`, authenticating `aad` alongside it.
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`seal`] with the same key and AAD.
///
/// The plaintext comes back wrapped in [`Zeroizing`]; it's almost always a
/// private key.
pub fn open(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, EncryptionError> {
    if sealed.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| EncryptionError::DecryptFailed)
}

//! Argon2id password-based key derivation.
//!
//! The wallet password never encrypts anything directly. It goes through
//! Argon2id with a per-wallet random salt, and the 32-byte output becomes the
//! session key that seals private keys. The parameters are persisted next to
//! the salt so a wallet created with today's costs still unlocks after the
//! defaults are raised.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, ARGON2_ITERATIONS, ARGON2_MEMORY_KIB, ARGON2_PARALLELISM};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KdfError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: ARGON2_MEMORY_KIB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Derive a 32-byte key from `password` and `salt`.
    pub fn derive(
        &self,
        password: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, KdfError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(AES_KEY_LENGTH),
        )
        .map_err(|e| KdfError::InvalidParams(e.to_string()))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut output[..])
            .map_err(|e| KdfError::DerivationFailed(e.to_string()))?;
        Ok(output)
    }
}

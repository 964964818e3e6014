//! Persistent wallet storage.
//!
//! A backend stores exactly one [`WalletState`]: KDF parameters, salt,
//! password checksum and the encrypted key entries. It never sees a
//! plaintext private key or the session key, only what
//! [`Keystore`](super::Keystore) has already sealed.
//!
//! Three backends ship with the crate:
//!
//! - [`MemoryStorage`]: tests and short-lived processes.
//! - [`FileStorage`]: one pretty-printed JSON file.
//! - [`WalletDb`](crate::storage::WalletDb): an embedded sled database.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::crypto::kdf::KdfParams;
use crate::crypto::keys::PublicKey;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported wallet format version {0}")]
    UnsupportedVersion(u32),
}

/// One stored key: public half in the clear, private half sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub public_key: PublicKey,
    /// Hex of `nonce || ciphertext || tag`, authenticated against `public_key`.
    pub encrypted_key: String,
}

/// Everything a wallet persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub version: u32,
    pub kdf: KdfParams,
    /// Hex-encoded Argon2 salt.
    pub salt: String,
    /// Hex-encoded password checksum.
    pub checksum: String,
    /// In insertion order.
    pub keys: Vec<KeyEntry>,
}

impl WalletState {
    pub fn entry(&self, public_key: &PublicKey) -> Option<&KeyEntry> {
        self.keys.iter().find(|e| &e.public_key == public_key)
    }

    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.entry(public_key).is_some()
    }
}

/// The persistence contract. Implementations must make `save` atomic with
/// respect to `load`: a reader sees the old state or the new one.
pub trait KeyStorage: Send + Sync {
    fn load(&self) -> Result<Option<WalletState>, StorageError>;

    fn save(&self, state: &WalletState) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<Option<WalletState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for MemoryStorage {
    fn load(&self) -> Result<Option<WalletState>, StorageError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &WalletState) -> Result<(), StorageError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// JSON file backend. Writes go to a sibling temp file first and are renamed
/// into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStorage for FileStorage {
    fn load(&self) -> Result<Option<WalletState>, StorageError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: WalletState = serde_json::from_str(&json)
            .map_err(|e| StorageError::Serialization(format!("invalid wallet JSON: {e}")))?;
        Ok(Some(state))
    }

    fn save(&self, state: &WalletState) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

//! # WalletDb: sled-backed Wallet Storage
//!
//! Persists a [`WalletState`] in sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree          | Key                   | Value                    |
//! |---------------|-----------------------|--------------------------|
//! | `wallet_meta` | `header`              | `bincode(WalletHeader)`  |
//! | `wallet_keys` | `seq` (8B BE)         | `bincode(KeyEntry)`      |
//!
//! Entry keys are big-endian sequence numbers so sled's lexicographic
//! iteration returns keys in the order they were added.
//!
//! ## Atomicity
//!
//! Both trees are rewritten inside one sled transaction, then flushed. A
//! crash mid-save leaves the previous wallet intact.

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::crypto::kdf::KdfParams;
use crate::vault::storage::{KeyEntry, KeyStorage, StorageError, WalletState};

const META_HEADER: &[u8] = b"header";

/// Everything in [`WalletState`] except the key entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletHeader {
    version: u32,
    kdf: KdfParams,
    salt: String,
    checksum: String,
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Wallet storage on an embedded sled database.
///
/// sled handles are cheap to clone and safe to share; `WalletDb` adds no
/// locking of its own.
#[derive(Debug, Clone)]
pub struct WalletDb {
    db: Db,
    meta: Tree,
    keys: Tree,
}

impl WalletDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// A database that disappears when dropped. For tests.
    pub fn open_temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let meta = db.open_tree("wallet_meta")?;
        let keys = db.open_tree("wallet_keys")?;
        Ok(Self { db, meta, keys })
    }

    /// Number of stored key entries.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl KeyStorage for WalletDb {
    fn load(&self) -> Result<Option<WalletState>, StorageError> {
        let Some(header) = self.meta.get(META_HEADER)? else {
            return Ok(None);
        };
        let header: WalletHeader = decode(&header)?;

        let mut keys = Vec::with_capacity(self.keys.len());
        for item in self.keys.iter() {
            let (_, value) = item?;
            keys.push(decode::<KeyEntry>(&value)?);
        }

        Ok(Some(WalletState {
            version: header.version,
            kdf: header.kdf,
            salt: header.salt,
            checksum: header.checksum,
            keys,
        }))
    }

    fn save(&self, state: &WalletState) -> Result<(), StorageError> {
        let header = encode(&WalletHeader {
            version: state.version,
            kdf: state.kdf,
            salt: state.salt.clone(),
            checksum: state.checksum.clone(),
        })?;
        let entries = state
            .keys
            .iter()
            .map(encode)
            .collect::<Result<Vec<_>, _>>()?;
        let stale: Vec<sled::IVec> = self.keys.iter().keys().collect::<Result<_, _>>()?;

        (&self.meta, &self.keys)
            .transaction(|(meta, keys)| {
                for key in &stale {
                    keys.remove(key)?;
                }
                for (seq, entry) in entries.iter().enumerate() {
                    keys.insert(&(seq as u64).to_be_bytes(), entry.as_slice())?;
                }
                meta.insert(META_HEADER, header.as_slice())?;
                Ok::<(), ConflictableTransactionError<StorageError>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(e) => StorageError::from(e),
            })?;

        self.db.flush()?;
        Ok(())
    }
}

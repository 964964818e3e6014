//! # Encrypted Keystore
//!
//! Private keys at rest, behind one wallet password.
//!
//! ## Scheme
//!
//! 1. `create` draws a random salt and runs Argon2id over the password. The
//!    32-byte result is the **session key**. Only a checksum of it is stored:
//!    `sha256("muse-wallet-checksum" || session_key)`.
//! 2. `unlock` re-derives the key from the stored salt and parameters and
//!    compares checksums in constant time.
//! 3. Each private key is sealed with AES-256-GCM under the session key, with
//!    its public key as associated data.
//!
//! ## Session
//!
//! The session key lives in a [`WalletSession`] that the keystore holds by
//! `Arc`. Signing takes a read lock for the duration of one decryption;
//! `lock()` takes the write lock and zeroes the key. A sign racing a lock
//! either finishes with the key intact or sees no key and fails with
//! [`WalletError::WalletLocked`]; it never observes a half-erased key.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use super::storage::{KeyEntry, KeyStorage, StorageError, WalletState};
use crate::config::{AES_KEY_LENGTH, WALLET_FORMAT_VERSION, WALLET_SALT_LENGTH};
use crate::crypto::encryption::{open, seal};
use crate::crypto::hash::sha256_concat;
use crate::crypto::kdf::{KdfError, KdfParams};
use crate::crypto::keys::{KeyError, PrivateKey, PublicKey};

const CHECKSUM_TAG: &[u8] = b"muse-wallet-checksum";

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("a wallet already exists in this storage")]
    WalletAlreadyExists,

    #[error("no wallet has been created yet")]
    WalletNotCreated,

    #[error("invalid password")]
    InvalidPassword,

    #[error("wallet is locked")]
    WalletLocked,

    #[error("wallet is already unlocked with a different password")]
    WalletAlreadyUnlockedWithDifferentPassword,

    #[error("key {0} not found in wallet")]
    KeyNotFound(PublicKey),

    #[error("invalid private key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("stored entry for {0} cannot be decrypted with the session key")]
    CorruptedEntry(PublicKey),

    #[error("key derivation: {0}")]
    Kdf(#[from] KdfError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// WalletSession
// ---------------------------------------------------------------------------

struct SessionKey {
    key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    unlocked_at: DateTime<Utc>,
}

/// The in-memory unlock state. Never persisted.
///
/// One session serves one wallet. Keystores over the same storage may share
/// it with `Arc` to get a single password gate; keystores over different
/// storages must each keep their own, since `create` and `unlock` on either
/// would install that wallet's key for both.
#[derive(Default)]
pub struct WalletSession {
    inner: RwLock<Option<SessionKey>>,
}

impl WalletSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().as_ref().map(|s| s.unlocked_at)
    }

    /// Zero and drop the session key. Returns whether a key was held.
    pub fn lock(&self) -> bool {
        let mut guard = self.inner.write();
        match guard.take() {
            Some(mut session) => {
                session.key.zeroize();
                true
            }
            None => false,
        }
    }

    fn install(&self, key: Zeroizing<[u8; AES_KEY_LENGTH]>) {
        let mut guard = self.inner.write();
        if let Some(old) = guard.as_mut() {
            old.key.zeroize();
        }
        *guard = Some(SessionKey {
            key,
            unlocked_at: Utc::now(),
        });
    }

    /// Swap in `key` only while the session still holds `expected`. A
    /// session locked or re-keyed in the meantime stays as it is.
    fn replace_if_current(
        &self,
        expected: &[u8; AES_KEY_LENGTH],
        key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    ) -> bool {
        let mut guard = self.inner.write();
        match guard.as_mut() {
            Some(current) if bool::from(current.key.as_slice().ct_eq(expected.as_slice())) => {
                current.key = key;
                true
            }
            _ => false,
        }
    }

    /// Run `f` with the session key, holding the read lock throughout.
    fn with_key<T>(
        &self,
        f: impl FnOnce(&[u8; AES_KEY_LENGTH]) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let guard = self.inner.read();
        let session = guard.as_ref().ok_or(WalletError::WalletLocked)?;
        f(&session.key)
    }
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("unlocked_at", &self.unlocked_at())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Keystore
// ---------------------------------------------------------------------------

pub struct Keystore {
    storage: Mutex<Box<dyn KeyStorage>>,
    session: Arc<WalletSession>,
    kdf: KdfParams,
}

fn checksum(key: &[u8; AES_KEY_LENGTH]) -> [u8; 32] {
    sha256_concat(&[CHECKSUM_TAG, key])
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, WalletError> {
    hex::decode(value)
        .map_err(|e| StorageError::Serialization(format!("{field}: {e}")).into())
}

impl Keystore {
    /// A keystore over `storage` with its own session and default Argon2id
    /// costs for new wallets.
    pub fn new(storage: impl KeyStorage + 'static) -> Self {
        Self {
            storage: Mutex::new(Box::new(storage)),
            session: Arc::new(WalletSession::new()),
            kdf: KdfParams::default(),
        }
    }

    /// Costs used by `create` and `change_passphrase`. Existing wallets keep
    /// the parameters they were created with.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Use `session` as the password gate. See [`WalletSession`] for when
    /// sharing one is sound.
    pub fn with_session(mut self, session: Arc<WalletSession>) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> Arc<WalletSession> {
        Arc::clone(&self.session)
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    pub fn exists(&self) -> Result<bool, WalletError> {
        Ok(self.storage.lock().load()?.is_some())
    }

    fn load_state(&self) -> Result<WalletState, WalletError> {
        let state = self.storage.lock().load()?.ok_or(WalletError::WalletNotCreated)?;
        if state.version != WALLET_FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(state.version).into());
        }
        Ok(state)
    }

    /// Initialize an empty wallet and leave it unlocked.
    pub fn create(&self, password: &str) -> Result<(), WalletError> {
        let storage = self.storage.lock();
        if storage.load()?.is_some() {
            return Err(WalletError::WalletAlreadyExists);
        }

        let mut salt = [0u8; WALLET_SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let key = self.kdf.derive(password, &salt)?;

        storage.save(&WalletState {
            version: WALLET_FORMAT_VERSION,
            kdf: self.kdf,
            salt: hex::encode(salt),
            checksum: hex::encode(checksum(&key)),
            keys: Vec::new(),
        })?;
        drop(storage);

        self.session.install(key);
        info!("wallet created");
        Ok(())
    }

    /// Check `password` against the stored checksum and open a session.
    ///
    /// A wrong password is always `InvalidPassword`. A correct one while a
    /// session is already open succeeds only if it derives the key that
    /// session holds; a session opened under an older passphrase (changed
    /// through another handle on the same storage) is reported instead of
    /// silently replaced.
    pub fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let state = self.load_state()?;
        let salt = decode_hex("salt", &state.salt)?;
        let candidate = state.kdf.derive(password, &salt)?;

        let stored = decode_hex("checksum", &state.checksum)?;
        if !bool::from(checksum(&candidate).as_slice().ct_eq(stored.as_slice())) {
            return Err(WalletError::InvalidPassword);
        }

        if self.session.is_unlocked() {
            let same = self
                .session
                .with_key(|current| Ok(bool::from(current.as_slice().ct_eq(candidate.as_slice()))))
                .unwrap_or(false);
            return if same {
                debug!("unlock: already unlocked");
                Ok(())
            } else {
                Err(WalletError::WalletAlreadyUnlockedWithDifferentPassword)
            };
        }

        self.session.install(candidate);
        info!("wallet unlocked");
        Ok(())
    }

    pub fn lock(&self) {
        if self.session.lock() {
            info!("wallet locked");
        }
    }

    /// Store a key given as WIF or 64 hex characters.
    pub fn add_private_key(&self, material: &str) -> Result<PublicKey, WalletError> {
        let key = PrivateKey::parse(material)?;
        self.add_secret_key(&key)
    }

    /// Store an already-parsed key. Idempotent.
    pub fn add_secret_key(&self, key: &PrivateKey) -> Result<PublicKey, WalletError> {
        let public_key = key.public_key();
        let storage = self.storage.lock();
        let mut state = storage.load()?.ok_or(WalletError::WalletNotCreated)?;

        let sealed = self.session.with_key(|session_key| {
            seal(session_key, key.to_bytes().as_slice(), &public_key.to_bytes())
                .map_err(|_| WalletError::CorruptedEntry(public_key))
        })?;

        if state.contains(&public_key) {
            debug!(%public_key, "key already in wallet");
            return Ok(public_key);
        }

        state.keys.push(KeyEntry {
            public_key,
            encrypted_key: hex::encode(sealed),
        });
        storage.save(&state)?;
        info!(%public_key, "key added to wallet");
        Ok(public_key)
    }

    /// Decrypt one key. The returned value zeroes itself on drop.
    pub fn get_private_key(&self, public_key: &PublicKey) -> Result<PrivateKey, WalletError> {
        if !self.session.is_unlocked() {
            return Err(WalletError::WalletLocked);
        }
        let state = self.load_state()?;
        let entry = state
            .entry(public_key)
            .ok_or(WalletError::KeyNotFound(*public_key))?;
        let sealed = decode_hex("encrypted_key", &entry.encrypted_key)?;

        self.session.with_key(|session_key| {
            let plain = open(session_key, &sealed, &public_key.to_bytes())
                .map_err(|_| WalletError::CorruptedEntry(*public_key))?;
            let key = PrivateKey::from_bytes(&plain)
                .map_err(|_| WalletError::CorruptedEntry(*public_key))?;
            if &key.public_key() != public_key {
                return Err(WalletError::CorruptedEntry(*public_key));
            }
            Ok(key)
        })
    }

    /// Delete a stored key. Does not require the wallet to be unlocked.
    pub fn remove_key(&self, public_key: &PublicKey) -> Result<(), WalletError> {
        let storage = self.storage.lock();
        let mut state = storage.load()?.ok_or(WalletError::WalletNotCreated)?;
        let before = state.keys.len();
        state.keys.retain(|e| &e.public_key != public_key);
        if state.keys.len() == before {
            return Err(WalletError::KeyNotFound(*public_key));
        }
        storage.save(&state)?;
        info!(%public_key, "key removed from wallet");
        Ok(())
    }

    /// Stored public keys, in insertion order. Works while locked.
    pub fn public_keys(&self) -> Result<Vec<PublicKey>, WalletError> {
        Ok(self.load_state()?.keys.iter().map(|e| e.public_key).collect())
    }

    pub fn contains_key(&self, public_key: &PublicKey) -> Result<bool, WalletError> {
        Ok(self.load_state()?.contains(public_key))
    }

    /// Re-encrypt every entry under a key derived from `new_password`.
    ///
    /// The session moves to the new key only if nobody locked it while the
    /// entries were being re-encrypted; a lock taken meanwhile sticks.
    pub fn change_passphrase(&self, new_password: &str) -> Result<(), WalletError> {
        let storage = self.storage.lock();
        let state = storage.load()?.ok_or(WalletError::WalletNotCreated)?;

        let mut salt = [0u8; WALLET_SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let new_key = self.kdf.derive(new_password, &salt)?;

        let old_key = self.session.with_key(|key| Ok(Zeroizing::new(*key)))?;
        let keys = state
            .keys
            .iter()
            .map(|entry| {
                let aad = entry.public_key.to_bytes();
                let sealed = decode_hex("encrypted_key", &entry.encrypted_key)?;
                let plain = open(&old_key, &sealed, &aad)
                    .map_err(|_| WalletError::CorruptedEntry(entry.public_key))?;
                let resealed = seal(&new_key, &plain, &aad)
                    .map_err(|_| WalletError::CorruptedEntry(entry.public_key))?;
                Ok(KeyEntry {
                    public_key: entry.public_key,
                    encrypted_key: hex::encode(resealed),
                })
            })
            .collect::<Result<Vec<_>, WalletError>>()?;

        storage.save(&WalletState {
            version: WALLET_FORMAT_VERSION,
            kdf: self.kdf,
            salt: hex::encode(salt),
            checksum: hex::encode(checksum(&new_key)),
            keys,
        })?;
        drop(storage);

        if self.session.replace_if_current(&old_key, new_key) {
            info!("wallet passphrase changed");
        } else {
            info!("wallet passphrase changed, session was locked meanwhile");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("session", &self.session)
            .field("kdf", &self.kdf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::storage::{FileStorage, MemoryStorage};

    const WIF: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";

    fn keystore() -> Keystore {
        Keystore::new(MemoryStorage::new()).with_kdf_params(KdfParams::new(1024, 1, 1))
    }

    #[test]
    fn create_twice_fails() {
        let ks = keystore();
        ks.create("pw").unwrap();
        assert!(matches!(ks.create("pw"), Err(WalletError::WalletAlreadyExists)));
    }

    #[test]
    fn create_leaves_wallet_unlocked() {
        let ks = keystore();
        assert!(!ks.exists().unwrap());
        ks.create("pw").unwrap();
        assert!(ks.exists().unwrap());
        assert!(ks.is_unlocked());
        assert!(ks.session().unlocked_at().is_some());
    }

    #[test]
    fn wrong_password_rejected() {
        let ks = keystore();
        ks.create("pw").unwrap();
        ks.lock();
        assert!(matches!(ks.unlock("wrongpw"), Err(WalletError::InvalidPassword)));
        assert!(!ks.is_unlocked());
        ks.unlock("pw").unwrap();
        assert!(ks.is_unlocked());
    }

    #[test]
    fn unlock_while_unlocked() {
        let ks = keystore();
        ks.create("pw").unwrap();
        ks.unlock("pw").unwrap();
        assert!(matches!(ks.unlock("wrongpw"), Err(WalletError::InvalidPassword)));
        assert!(ks.is_unlocked());
    }

    #[test]
    fn stale_session_after_passphrase_change_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let first = Keystore::new(FileStorage::new(&path)).with_kdf_params(KdfParams::new(1024, 1, 1));
        first.create("pw").unwrap();

        let second = Keystore::new(FileStorage::new(&path)).with_kdf_params(KdfParams::new(1024, 1, 1));
        second.unlock("pw").unwrap();
        second.change_passphrase("new").unwrap();

        assert!(matches!(
            first.unlock("new"),
            Err(WalletError::WalletAlreadyUnlockedWithDifferentPassword)
        ));
        assert!(matches!(first.unlock("pw"), Err(WalletError::InvalidPassword)));
        first.lock();
        first.unlock("new").unwrap();
    }

    #[test]
    fn unlock_without_wallet() {
        assert!(matches!(keystore().unlock("pw"), Err(WalletError::WalletNotCreated)));
    }

    #[test]
    fn add_and_get_key() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let pk = ks.add_private_key(WIF).unwrap();
        let back = ks.get_private_key(&pk).unwrap();
        assert_eq!(back.to_wif().as_str(), WIF);
        assert_eq!(ks.public_keys().unwrap(), vec![pk]);
    }

    #[test]
    fn add_is_idempotent() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let a = ks.add_private_key(WIF).unwrap();
        let b = ks.add_private_key(WIF).unwrap();
        assert_eq!(a, b);
        assert_eq!(ks.public_keys().unwrap().len(), 1);
    }

    #[test]
    fn hex_key_material_accepted() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let key = PrivateKey::generate();
        let pk = ks.add_private_key(&hex::encode(key.to_bytes().as_slice())).unwrap();
        assert_eq!(pk, key.public_key());
    }

    #[test]
    fn garbage_key_material_rejected() {
        let ks = keystore();
        ks.create("pw").unwrap();
        assert!(matches!(
            ks.add_private_key("definitely not a key"),
            Err(WalletError::InvalidKey(_))
        ));
    }

    #[test]
    fn locked_wallet_refuses_secrets_but_lists_keys() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let pk = ks.add_private_key(WIF).unwrap();
        ks.lock();

        assert!(matches!(ks.get_private_key(&pk), Err(WalletError::WalletLocked)));
        assert!(matches!(
            ks.add_secret_key(&PrivateKey::generate()),
            Err(WalletError::WalletLocked)
        ));
        assert!(ks.contains_key(&pk).unwrap());
        assert_eq!(ks.public_keys().unwrap(), vec![pk]);
    }

    #[test]
    fn remove_key_works_while_locked() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let pk = ks.add_private_key(WIF).unwrap();
        ks.lock();
        ks.remove_key(&pk).unwrap();
        assert!(matches!(ks.remove_key(&pk), Err(WalletError::KeyNotFound(_))));
        assert!(!ks.contains_key(&pk).unwrap());
    }

    #[test]
    fn missing_key_reported() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let pk = PrivateKey::generate().public_key();
        assert!(matches!(ks.get_private_key(&pk), Err(WalletError::KeyNotFound(_))));
    }

    #[test]
    fn storage_never_sees_plaintext() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let key = PrivateKey::generate();
        ks.add_secret_key(&key).unwrap();

        let state = ks.storage.lock().load().unwrap().unwrap();
        let raw_hex = hex::encode(key.to_bytes().as_slice());
        let dump = serde_json::to_string(&state).unwrap();
        assert!(!dump.contains(&raw_hex));
        assert!(!dump.contains(key.to_wif().as_str()));
    }

    #[test]
    fn swapped_ciphertexts_fail_authentication() {
        let ks = keystore();
        ks.create("pw").unwrap();
        let a = ks.add_secret_key(&PrivateKey::generate()).unwrap();
        let b = ks.add_secret_key(&PrivateKey::generate()).unwrap();

        {
            let storage = ks.storage.lock();
            let mut state = storage.load().unwrap().unwrap();
            let tmp = state.keys[0].encrypted_key.clone();
            state.keys[0].encrypted_key = state.keys[1].encrypted_key.clone();
            state.keys[1].encrypted_key = tmp;
            storage.save(&state).unwrap();
        }

        assert!(matches!(ks.get_private_key(&a), Err(WalletError::CorruptedEntry(_))));
        assert!(matches!(ks.get_private_key(&b), Err(WalletError::CorruptedEntry(_))));
    }

    #[test]
    fn change_passphrase_reencrypts() {
        let ks = keystore();
        ks.create("old").unwrap();
        let pk = ks.add_private_key(WIF).unwrap();
        ks.change_passphrase("new").unwrap();

        assert_eq!(ks.get_private_key(&pk).unwrap().public_key(), pk);
        ks.lock();
        assert!(matches!(ks.unlock("old"), Err(WalletError::InvalidPassword)));
        ks.unlock("new").unwrap();
        assert_eq!(ks.get_private_key(&pk).unwrap().to_wif().as_str(), WIF);
    }

    #[test]
    fn change_passphrase_requires_unlock() {
        let ks = keystore();
        ks.create("old").unwrap();
        ks.lock();
        assert!(matches!(ks.change_passphrase("new"), Err(WalletError::WalletLocked)));
    }

    #[test]
    fn rekey_skipped_when_session_locked_meanwhile() {
        let session = WalletSession::new();
        let old = [1u8; 32];
        session.install(Zeroizing::new(old));
        session.lock();
        assert!(!session.replace_if_current(&old, Zeroizing::new([2u8; 32])));
        assert!(!session.is_unlocked());

        session.install(Zeroizing::new([3u8; 32]));
        assert!(!session.replace_if_current(&old, Zeroizing::new([2u8; 32])));
        assert_eq!(session.with_key(|k| Ok(*k)).unwrap(), [3u8; 32]);

        assert!(session.replace_if_current(&[3u8; 32], Zeroizing::new([4u8; 32])));
        assert_eq!(session.with_key(|k| Ok(*k)).unwrap(), [4u8; 32]);
    }

    #[test]
    fn passphrase_change_keeps_shared_session_on_new_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let session = Arc::new(WalletSession::new());
        let a = Keystore::new(FileStorage::new(&path))
            .with_kdf_params(KdfParams::new(1024, 1, 1))
            .with_session(Arc::clone(&session));
        let b = Keystore::new(FileStorage::new(&path))
            .with_kdf_params(KdfParams::new(1024, 1, 1))
            .with_session(Arc::clone(&session));
        a.create("old").unwrap();
        let pk = a.add_private_key(WIF).unwrap();

        b.change_passphrase("new").unwrap();
        assert!(a.is_unlocked());
        assert_eq!(a.get_private_key(&pk).unwrap().to_wif().as_str(), WIF);
        a.unlock("new").unwrap();

        a.lock();
        assert!(!b.is_unlocked());
        assert!(matches!(b.change_passphrase("other"), Err(WalletError::WalletLocked)));
    }

    #[test]
    fn shared_session_gates_both_keystores() {
        let session = Arc::new(WalletSession::new());
        let a = keystore().with_session(Arc::clone(&session));
        let b = keystore().with_session(Arc::clone(&session));
        a.create("pw").unwrap();
        assert!(b.is_unlocked());
        b.lock();
        assert!(!a.is_unlocked());
    }

    #[test]
    fn lock_zeroes_and_is_idempotent() {
        let session = WalletSession::new();
        session.install(Zeroizing::new([9u8; 32]));
        assert!(session.lock());
        assert!(!session.lock());
        assert!(matches!(
            session.with_key(|_| Ok(())),
            Err(WalletError::WalletLocked)
        ));
    }
}

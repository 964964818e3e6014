//! # Vault Module: Encrypted Key Storage
//!
//! Where private keys live between signing calls. Nothing in here ever
//! writes a plaintext key anywhere but a zeroizing buffer.
//!
//! ## Architecture
//!
//! ```text
//! keystore.rs  Password gate, session key, seal/open of key entries
//! storage.rs   Persistence contract plus in-memory and JSON-file backends
//! ```
//!
//! The sled backend lives in [`crate::storage`] next to the rest of the
//! on-disk code.

pub mod keystore;
pub mod storage;

pub use keystore::{Keystore, WalletError, WalletSession};
pub use storage::{FileStorage, KeyEntry, KeyStorage, MemoryStorage, StorageError, WalletState};

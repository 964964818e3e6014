//! # Storage Module
//!
//! Embedded-database persistence for wallets.
//!
//! ```text
//! db.rs  sled-backed implementation of the wallet storage contract
//! ```
//!
//! Bincode on disk: compact and deterministic. JSON is kept for the
//! human-editable [`FileStorage`](crate::vault::FileStorage) backend.

pub mod db;

pub use db::WalletDb;

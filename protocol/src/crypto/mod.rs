//! # Cryptographic Primitives
//!
//! Everything signing- and secrecy-related flows through here:
//!
//! - **secp256k1** for keys and compact recoverable signatures, because that's
//!   what Graphene nodes verify.
//! - **SHA-256 / RIPEMD-160** for digests and key checksums.
//! - **Argon2id** to turn a wallet password into a key.
//! - **AES-256-GCM** to seal private keys at rest.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around audited
//! implementations.

pub mod encryption;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod signatures;

pub use encryption::{open, seal, EncryptionError};
pub use hash::{double_sha256, ripemd160, sha256};
pub use kdf::{KdfError, KdfParams};
pub use keys::{KeyError, PrivateKey, PublicKey};
pub use signatures::{sign_digest, verify_digest, CompactSignature, SignatureError};

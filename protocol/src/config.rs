//! # Protocol Configuration & Constants
//!
//! Every magic number in the client lives here, together with the
//! [`BuilderConfig`] that tunes how transactions are assembled. If you're
//! hardcoding a constant somewhere else, you're doing it wrong.
//!
//! The wire-level constants (signature sizes, key prefixes, asset ids) are
//! dictated by the Graphene chain we talk to. Changing them does not make the
//! node agree with you; it makes every signature you produce invalid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transaction::types::{AccountId, AssetId, Permission};

// ---------------------------------------------------------------------------
// Chain Identifiers
// ---------------------------------------------------------------------------

/// Default textual prefix for public keys (`MUSE6Mr...`).
pub const DEFAULT_ADDRESS_PREFIX: &str = "MUSE";

/// Instance of the core asset, `1.3.0`. Fees are quoted in it.
pub const CORE_ASSET_INSTANCE: u64 = 0;

/// Chain ids are 32-byte SHA-256 values published by the node.
pub const CHAIN_ID_LENGTH: usize = 32;

/// Block ids are truncated to 20 bytes (RIPEMD-160 sized) on Graphene chains.
pub const BLOCK_ID_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// secp256k1 private keys are 32-byte scalars.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Compressed secp256k1 public key length.
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Compact recoverable signature: 1 recovery byte + 32 bytes `r` + 32 bytes `s`.
pub const SIGNATURE_LENGTH: usize = 65;

/// Offset added to the recovery id in the first signature byte
/// (27 for "recoverable", +4 for "compressed public key").
pub const SIGNATURE_RECOVERY_OFFSET: u8 = 31;

/// WIF version byte for private keys.
pub const WIF_VERSION: u8 = 0x80;

/// Number of checksum bytes appended to base58 key encodings.
pub const KEY_CHECKSUM_LENGTH: usize = 4;

/// Upper bound on nonce attempts while searching for a canonical signature.
/// In practice the first or second attempt succeeds.
pub const MAX_CANONICAL_SIGNING_ATTEMPTS: u32 = 256;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve. Not sixteen.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Argon2id memory cost in KiB (64 MiB).
pub const ARGON2_MEMORY_KIB: u32 = 65_536;

/// Argon2id iteration count.
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id lanes.
pub const ARGON2_PARALLELISM: u32 = 1;

/// Salt length for wallet key derivation.
pub const WALLET_SALT_LENGTH: usize = 32;

/// Version tag written into persisted wallet state.
pub const WALLET_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Codec Limits
// ---------------------------------------------------------------------------

/// Maximum bytes in a LEB128 varint encoding of a `u64`.
pub const MAX_VARINT_BYTES: usize = 10;

/// Upper bound on any decoded sequence length. Stops a forged length prefix
/// from making us allocate gigabytes before the reader notices truncation.
pub const MAX_SEQUENCE_LENGTH: u64 = 1 << 16;

/// Proposals may nest, but not without limit.
pub const MAX_PROPOSAL_NESTING: usize = 4;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Default transaction expiration window, measured from the node's clock.
pub const DEFAULT_EXPIRATION_WINDOW: Duration = Duration::from_secs(60);

/// Default lifetime of a proposal created in proposal mode (24 hours).
pub const DEFAULT_PROPOSAL_EXPIRATION: Duration = Duration::from_secs(60 * 60 * 24);

/// Default timeout applied to every call into a chain collaborator.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Authority Resolution
// ---------------------------------------------------------------------------

/// How many levels of nested account authorities we are willing to expand.
/// The root account is level 0.
pub const DEFAULT_MAX_AUTHORITY_DEPTH: usize = 2;

// ---------------------------------------------------------------------------
// Builder Configuration
// ---------------------------------------------------------------------------

/// Who signs an operation when the caller does not name a signer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DefaultSigner {
    /// Use the authorities the operation itself declares (e.g. the `from`
    /// account of a transfer).
    #[default]
    Derived,
    /// Always sign as this account at the given permission level.
    Account {
        account: AccountId,
        permission: Permission,
    },
}

/// Tuning knobs for a [`TransactionBuilder`](crate::transaction::TransactionBuilder).
///
/// All fields have sane defaults; most callers only touch `bundle` or
/// `proposer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Seconds between the node's current time and the transaction expiration.
    pub expiration_window: Duration,

    /// Accumulate every appended operation into one transaction.
    pub bundle: bool,

    /// When set, finalize wraps all operations in a `proposal_create` paid by
    /// this account.
    pub proposer: Option<AccountId>,

    /// How long a proposal stays open on chain.
    pub proposal_expiration: Duration,

    /// Optional review period attached to created proposals.
    pub proposal_review_period: Option<Duration>,

    /// Signer policy for operations appended without an explicit signer.
    pub default_signer: DefaultSigner,

    /// Asset in which fees are paid. `None` means the fee schedule's core asset.
    pub fee_asset: Option<AssetId>,

    /// Depth bound for nested account authorities.
    pub max_authority_depth: usize,

    /// Timeout for each chain-state, fee and authority lookup, and for broadcast.
    pub collaborator_timeout: Duration,

    /// Sign everything, submit nothing.
    pub no_broadcast: bool,

    /// Public-key prefix used when rendering keys in logs and signing info.
    pub address_prefix: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            expiration_window: DEFAULT_EXPIRATION_WINDOW,
            bundle: false,
            proposer: None,
            proposal_expiration: DEFAULT_PROPOSAL_EXPIRATION,
            proposal_review_period: None,
            default_signer: DefaultSigner::Derived,
            fee_asset: None,
            max_authority_depth: DEFAULT_MAX_AUTHORITY_DEPTH,
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
            no_broadcast: false,
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
        }
    }
}

impl BuilderConfig {
    /// Convenience constructor for bundling mode.
    pub fn bundled() -> Self {
        Self {
            bundle: true,
            ..Self::default()
        }
    }

    /// Convenience constructor for proposal mode.
    pub fn proposing(proposer: AccountId) -> Self {
        Self {
            proposer: Some(proposer),
            ..Self::default()
        }
    }
}

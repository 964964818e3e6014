//! # Transaction Module
//!
//! Everything between "I want to transfer 5 MUSE" and a signed byte string a
//! node will accept.
//!
//! ## Architecture
//!
//! ```text
//! types.rs       Object ids, assets, authorities, chain references
//! operations.rs  The operation catalog and per-operation required authorities
//! authority.rs   Expands account authorities into the keys that must sign
//! builder.rs     Transaction body and the append/finalize/sign/broadcast state machine
//! signing.rs     Digest signing, signed wire form, signer recovery
//! error.rs       BuilderError: the failing stage plus its reason
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Append** operations to a [`TransactionBuilder`].
//! 2. **Finalize**: bind to a recent block (TAPOS), set expiration, fill fees,
//!    optionally wrap everything in a proposal.
//! 3. **Sign**: resolve required authorities to keys and sign
//!    `sha256(chain_id || body)`.
//! 4. **Broadcast** the signed bytes; retry with the same bytes on failure.

pub mod authority;
pub mod builder;
pub mod error;
pub mod operations;
pub mod signing;
pub mod types;

pub use authority::{describe_requirements, AuthorityError, AuthorityResolver, SigningRequirement};
pub use builder::{BuilderState, Tapos, Transaction, TransactionBuilder};
pub use error::{BuilderError, FailureReason, Stage};
pub use operations::{
    AccountCreate, AccountUpdate, LimitOrderCancel, LimitOrderCreate, Operation, ProposalCreate,
    ProposalUpdate, Transfer, ValidationError,
};
pub use signing::{sign_transaction, SignedTransaction, SigningError};
pub use types::{
    AccountId, AccountOptions, Asset, AssetId, Authority, BlockHeaderRef, ChainId, LimitOrderId, Memo,
    ObjectId, Permission, Price, ProposalId, RequiredAuthority, TimePointSec, VoteId,
};

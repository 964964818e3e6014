//! Builder failures: which stage failed, and why.
//!
//! Every error the builder returns names its stage, so a caller always knows
//! whether a retry means "finalize again" or "just rebroadcast":
//!
//! ```text
//! fees failed: fee schedule unavailable: node timeout
//! broadcast failed: rejected by node: expired transaction
//! ```

use std::fmt;
use thiserror::Error;

use super::authority::AuthorityError;
use super::builder::BuilderState;
use super::operations::ValidationError;
use super::signing::SigningError;
use crate::chain::{ChainError, TransportError};
use crate::codec::CodecError;
use crate::crypto::keys::KeyError;
use crate::crypto::signatures::SignatureError;
use crate::vault::WalletError;

/// The builder step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Append,
    Tapos,
    Fees,
    Finalize,
    Sign,
    Broadcast,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Append => "append",
            Self::Tapos => "tapos",
            Self::Fees => "fees",
            Self::Finalize => "finalize",
            Self::Sign => "sign",
            Self::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Encoding(#[from] CodecError),

    #[error(transparent)]
    InvalidOperation(#[from] ValidationError),

    #[error(transparent)]
    Authority(AuthorityError),

    #[error(transparent)]
    WalletState(#[from] WalletError),

    #[error(transparent)]
    ChainInteraction(#[from] ChainError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid signing key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error(transparent)]
    Signing(#[from] SignatureError),

    #[error("transaction has no operations")]
    EmptyTransaction,

    #[error("not allowed while the builder is {0}")]
    InvalidState(BuilderState),

    #[error("bundling is disabled and the builder already holds an operation")]
    BundlingDisabled,

    #[error("no signing keys available for the required authorities")]
    MissingSigningKeys,
}

impl From<AuthorityError> for FailureReason {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::Chain(chain) => Self::ChainInteraction(chain),
            other => Self::Authority(other),
        }
    }
}

impl From<SigningError> for FailureReason {
    fn from(e: SigningError) -> Self {
        match e {
            SigningError::Codec(codec) => Self::Encoding(codec),
            SigningError::Signature(sig) => Self::Signing(sig),
        }
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {reason}")]
pub struct BuilderError {
    pub stage: Stage,
    pub reason: FailureReason,
}

impl BuilderError {
    pub fn new(stage: Stage, reason: impl Into<FailureReason>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }

    /// `map_err` adapter: `.map_err(BuilderError::at(Stage::Fees))`.
    pub fn at<E: Into<FailureReason>>(stage: Stage) -> impl FnOnce(E) -> Self {
        move |e| Self::new(stage, e)
    }

    pub fn is_wallet_locked(&self) -> bool {
        matches!(self.reason, FailureReason::WalletState(WalletError::WalletLocked))
    }
}

//! # Chain Collaborators
//!
//! The builder never talks to a node directly. It asks four narrow,
//! async interfaces for what it needs and leaves the RPC plumbing to the
//! embedding application:
//!
//! - [`ChainStateProvider`]: chain id, head block (for TAPOS) and node time.
//! - [`FeeScheduleProvider`]: per-operation fees and core exchange rates.
//! - [`AccountAuthorityProvider`]: an account's owner/active authority.
//! - [`Transport`]: hands serialized signed bytes to the network.
//!
//! Every call the builder makes goes through [`bounded`], so a hung node
//! surfaces as a `Timeout` instead of a stuck future.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::transaction::types::{
    AccountId, Asset, AssetId, Authority, BlockHeaderRef, ChainId, Permission, Price, TimePointSec,
};

/// Failures from chain-state, fee-schedule and authority lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain state unavailable: {0}")]
    ChainStateUnavailable(String),

    #[error("fee schedule unavailable: {0}")]
    FeeScheduleUnavailable(String),

    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("no exchange rate for asset {0}")]
    NoExchangeRate(AssetId),

    #[error("{call} timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },
}

/// Failures from handing a signed transaction to the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The node received the transaction and refused it.
    #[error("rejected by node: {0}")]
    Rejected(String),

    /// The node could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("broadcast timed out after {0:?}")]
    Timeout(Duration),
}

/// What `broadcast` actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Bytes were accepted by the transport.
    Submitted { transaction_id: String },
    /// No-broadcast mode: nothing left the process.
    Skipped { transaction_id: String },
}

#[async_trait]
pub trait ChainStateProvider: Send + Sync {
    async fn chain_id(&self) -> Result<ChainId, ChainError>;

    async fn latest_block_header(&self) -> Result<BlockHeaderRef, ChainError>;

    /// The node's notion of "now", used as the base for expiration.
    async fn current_node_time(&self) -> Result<TimePointSec, ChainError>;
}

#[async_trait]
pub trait FeeScheduleProvider: Send + Sync {
    /// Fee for one operation of `type_id`, in the core asset.
    async fn fee_for(&self, type_id: u64) -> Result<Asset, ChainError>;

    /// Core exchange rate of `asset` (core on one side, `asset` on the other).
    async fn core_exchange_rate(&self, asset: AssetId) -> Result<Price, ChainError>;
}

#[async_trait]
pub trait AccountAuthorityProvider: Send + Sync {
    async fn authority_of(
        &self,
        account: AccountId,
        permission: Permission,
    ) -> Result<Authority, ChainError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, signed_transaction: &[u8]) -> Result<(), TransportError>;
}

/// The four collaborators a builder talks to, shared behind `Arc`s so one
/// node connection can serve many builders.
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainStateProvider>,
    pub fees: Arc<dyn FeeScheduleProvider>,
    pub authorities: Arc<dyn AccountAuthorityProvider>,
    pub transport: Arc<dyn Transport>,
}

impl Collaborators {
    /// One object serving every role, as a node client or a test double does.
    pub fn from_single<C>(client: Arc<C>) -> Self
    where
        C: ChainStateProvider + FeeScheduleProvider + AccountAuthorityProvider + Transport + 'static,
    {
        Self {
            chain: client.clone(),
            fees: client.clone(),
            authorities: client.clone(),
            transport: client,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Run a chain lookup under `timeout`.
pub async fn bounded<T, F>(timeout: Duration, call: &'static str, fut: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ChainError::Timeout {
            call,
            after: timeout,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, ChainError>(1u32)
        };
        let err = bounded(Duration::from_secs(1), "chain_id", slow).await.unwrap_err();
        assert_eq!(
            err,
            ChainError::Timeout {
                call: "chain_id",
                after: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let ok = bounded(Duration::from_secs(1), "fee_for", async { Ok::<_, ChainError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = bounded(Duration::from_secs(1), "fee_for", async {
            Err::<u8, _>(ChainError::FeeScheduleUnavailable("down".into()))
        })
        .await;
        assert!(matches!(err, Err(ChainError::FeeScheduleUnavailable(_))));
    }
}

//! Transaction construction as a state machine.
//!
//! ```text
//! Empty ──append──▶ Accumulating ──finalize──▶ Finalized ──sign──▶ Signed ──broadcast──▶ Broadcast
//!                        ▲                         │                 ▲  │
//!                        └────────append───────────┘                 └──┘ transport failure
//! ```
//!
//! The builder asks its [`Collaborators`] for TAPOS data, fees and account
//! authorities, asks the [`Keystore`] for keys, and hands the finished bytes
//! to the transport. Every step computes into locals and only commits when
//! it has fully succeeded, so a failed call leaves the builder exactly as it
//! was.
//!
//! One builder is one transaction. It takes `&mut self` everywhere; share it
//! across tasks behind a mutex or use one builder per transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::authority::{describe_requirements, AuthorityResolver, SigningRequirement};
use super::error::{BuilderError, FailureReason, Stage};
use super::operations::{Operation, ProposalCreate};
use super::signing::{sign_transaction, SignedTransaction};
use super::types::{
    read_extensions, write_extensions, AccountId, Asset, AssetId, ChainId, Price, RequiredAuthority,
    TimePointSec,
};
use crate::chain::{bounded, BroadcastOutcome, ChainError, Collaborators, TransportError};
use crate::codec::{self, ByteReader, ByteWriter, CodecError, CodecResult, Decode, Encode};
use crate::config::{BuilderConfig, DefaultSigner};
use crate::crypto::hash::sha256;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::signatures::sign_digest;
use crate::vault::{Keystore, WalletError};

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An unsigned Graphene transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: TimePointSec,
    pub operations: Vec<Operation>,
}

impl Transaction {
    /// The serialized body: what the digest and the transaction id cover.
    pub fn body_bytes(&self) -> CodecResult<Vec<u8>> {
        self.to_wire_bytes()
    }

    /// `sha256(chain_id || body)`, the value every signature commits to.
    pub fn digest(&self, chain_id: &ChainId) -> CodecResult<[u8; 32]> {
        Ok(codec::digest(chain_id, &self.body_bytes()?))
    }

    /// First 20 bytes of `sha256(body)`, hex encoded.
    pub fn id(&self) -> CodecResult<String> {
        let hash = sha256(&self.body_bytes()?);
        Ok(hex::encode(&hash[..20]))
    }
}

impl Encode for Transaction {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_u16(self.ref_block_num);
        w.put_u32(self.ref_block_prefix);
        self.expiration.encode(w)?;
        self.operations.encode(w)?;
        write_extensions(w);
        Ok(())
    }
}

impl Decode for Transaction {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let tx = Self {
            ref_block_num: r.get_u16()?,
            ref_block_prefix: r.get_u32()?,
            expiration: TimePointSec::decode(r)?,
            operations: Vec::decode(r)?,
        };
        read_extensions(r, "transaction.extensions")?;
        Ok(tx)
    }
}

// ---------------------------------------------------------------------------
// Builder state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderState {
    Empty,
    Accumulating,
    Finalized,
    Signed,
    Broadcast,
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Accumulating => "accumulating",
            Self::Finalized => "finalized",
            Self::Signed => "signed",
            Self::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// Reference-block binding and expiry for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tapos {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub node_time: TimePointSec,
    pub expiration: TimePointSec,
}

#[derive(Debug, Clone)]
struct PendingOperation {
    operation: Operation,
    signer: Option<RequiredAuthority>,
}

#[derive(Debug, Clone)]
struct FinalizedTransaction {
    transaction: Transaction,
    chain_id: ChainId,
    required: Vec<RequiredAuthority>,
}

#[derive(Debug, Clone)]
struct SignedState {
    transaction: SignedTransaction,
    bytes: Vec<u8>,
    id: String,
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

pub struct TransactionBuilder {
    config: BuilderConfig,
    collaborators: Collaborators,
    keystore: Arc<Keystore>,
    state: BuilderState,
    pending: Vec<PendingOperation>,
    extra_keys: Vec<(PublicKey, PrivateKey)>,
    finalized: Option<FinalizedTransaction>,
    signed: Option<SignedState>,
}

impl fmt::Debug for TransactionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionBuilder")
            .field("state", &self.state)
            .field("operations", &self.pending.len())
            .field("extra_keys", &self.extra_keys.len())
            .field("bundle", &self.config.bundle)
            .field("proposer", &self.config.proposer)
            .finish()
    }
}

impl TransactionBuilder {
    pub fn new(config: BuilderConfig, collaborators: Collaborators, keystore: Arc<Keystore>) -> Self {
        Self {
            config,
            collaborators,
            keystore,
            state: BuilderState::Empty,
            pending: Vec::new(),
            extra_keys: Vec::new(),
            finalized: None,
            signed: None,
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Operations appended so far, in call order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.pending.iter().map(|p| &p.operation)
    }

    /// The finalized body, once `finalize` has succeeded.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.finalized.as_ref().map(|f| &f.transaction)
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        self.finalized.as_ref().map(|f| f.chain_id)
    }

    /// Authorities the finalized transaction must satisfy, deduplicated.
    pub fn required_authorities(&self) -> &[RequiredAuthority] {
        self.finalized.as_ref().map_or(&[], |f| f.required.as_slice())
    }

    pub fn signed_transaction(&self) -> Option<&SignedTransaction> {
        self.signed.as_ref().map(|s| &s.transaction)
    }

    /// The exact bytes `broadcast` submits.
    pub fn signed_bytes(&self) -> Option<&[u8]> {
        self.signed.as_ref().map(|s| s.bytes.as_slice())
    }

    fn invalid_state(&self, stage: Stage) -> BuilderError {
        BuilderError::new(stage, FailureReason::InvalidState(self.state))
    }

    // -- append -------------------------------------------------------------

    /// Record an operation, optionally naming who signs for it.
    ///
    /// Appending to a finalized transaction discards the finalized body and
    /// returns to `Accumulating`; the next `finalize` recomputes everything.
    pub fn append_operation(
        &mut self,
        operation: impl Into<Operation>,
        signer: Option<RequiredAuthority>,
    ) -> Result<(), BuilderError> {
        let operation = operation.into();
        if matches!(self.state, BuilderState::Signed | BuilderState::Broadcast) {
            return Err(self.invalid_state(Stage::Append));
        }
        if !self.config.bundle && !self.pending.is_empty() {
            return Err(BuilderError::new(Stage::Append, FailureReason::BundlingDisabled));
        }
        operation.validate().map_err(BuilderError::at(Stage::Append))?;
        codec::encode_operation(&operation).map_err(BuilderError::at(Stage::Append))?;

        if self.state == BuilderState::Finalized {
            debug!("append after finalize, discarding finalized body");
            self.finalized = None;
        }
        debug!(
            operation = operation.name(),
            index = self.pending.len(),
            "operation appended"
        );
        self.pending.push(PendingOperation { operation, signer });
        self.state = BuilderState::Accumulating;
        Ok(())
    }

    /// Add a signing key (WIF or hex) used alongside the wallet's keys.
    pub fn append_private_key(&mut self, material: &str) -> Result<PublicKey, BuilderError> {
        if matches!(self.state, BuilderState::Signed | BuilderState::Broadcast) {
            return Err(self.invalid_state(Stage::Append));
        }
        let key = PrivateKey::parse(material).map_err(BuilderError::at(Stage::Append))?;
        let public_key = key.public_key();
        if !self.extra_keys.iter().any(|(pk, _)| *pk == public_key) {
            debug!(
                public_key = %public_key.to_string_with_prefix(&self.config.address_prefix),
                "signing key added to builder"
            );
            self.extra_keys.push((public_key, key));
        }
        Ok(public_key)
    }

    // -- finalize -----------------------------------------------------------

    /// Reference block and expiration from the chain-state provider.
    pub async fn construct_tapos(&self) -> Result<Tapos, BuilderError> {
        let timeout = self.config.collaborator_timeout;
        let header = bounded(
            timeout,
            "latest_block_header",
            self.collaborators.chain.latest_block_header(),
        )
        .await
        .map_err(BuilderError::at(Stage::Tapos))?;
        let node_time = bounded(
            timeout,
            "current_node_time",
            self.collaborators.chain.current_node_time(),
        )
        .await
        .map_err(BuilderError::at(Stage::Tapos))?;

        let expiration = node_time
            .checked_add(self.config.expiration_window)
            .ok_or_else(|| {
                BuilderError::new(
                    Stage::Tapos,
                    CodecError::constraint("expiration", "node time plus window overflows"),
                )
            })?;
        let (ref_block_num, ref_block_prefix) = header.tapos();
        debug!(
            block_num = header.block_num,
            ref_block_num, ref_block_prefix, %expiration, "tapos constructed"
        );
        Ok(Tapos {
            ref_block_num,
            ref_block_prefix,
            node_time,
            expiration,
        })
    }

    /// Fill every unset fee, including those of operations nested in a
    /// proposal, and return the filled copies. `operations` is untouched.
    pub async fn compute_fees(&self, operations: &[Operation]) -> Result<Vec<Operation>, BuilderError> {
        let mut needed = Vec::new();
        collect_unset_fee_types(operations, &mut needed);

        let timeout = self.config.collaborator_timeout;
        let mut schedule: BTreeMap<u64, Asset> = BTreeMap::new();
        for type_id in needed {
            if schedule.contains_key(&type_id) {
                continue;
            }
            let fee = bounded(timeout, "fee_for", self.collaborators.fees.fee_for(type_id))
                .await
                .map_err(BuilderError::at(Stage::Fees))?;
            schedule.insert(type_id, fee);
        }

        if let Some(target) = self.config.fee_asset {
            if schedule.values().any(|fee| fee.asset_id != target) {
                let rate = bounded(
                    timeout,
                    "core_exchange_rate",
                    self.collaborators.fees.core_exchange_rate(target),
                )
                .await
                .map_err(BuilderError::at(Stage::Fees))?;
                for fee in schedule.values_mut() {
                    *fee = convert_fee(*fee, target, &rate).map_err(BuilderError::at(Stage::Fees))?;
                }
            }
        }

        let mut filled = operations.to_vec();
        apply_fees(&mut filled, &schedule);
        debug!(fee_types = schedule.len(), "fees computed");
        Ok(filled)
    }

    /// Fix TAPOS, fees and signers, and serialize the body.
    ///
    /// A no-op when already finalized.
    pub async fn finalize(&mut self) -> Result<&Transaction, BuilderError> {
        match self.state {
            BuilderState::Empty => {
                return Err(BuilderError::new(Stage::Finalize, FailureReason::EmptyTransaction))
            }
            BuilderState::Signed | BuilderState::Broadcast => {
                return Err(self.invalid_state(Stage::Finalize))
            }
            BuilderState::Finalized => debug!("finalize: already finalized"),
            BuilderState::Accumulating => {
                let finalized = self.build_finalized().await?;
                self.finalized = Some(finalized);
                self.state = BuilderState::Finalized;
            }
        }
        self.finalized
            .as_ref()
            .map(|f| &f.transaction)
            .ok_or_else(|| self.invalid_state(Stage::Finalize))
    }

    async fn build_finalized(&self) -> Result<FinalizedTransaction, BuilderError> {
        let chain_id = bounded(
            self.config.collaborator_timeout,
            "chain_id",
            self.collaborators.chain.chain_id(),
        )
        .await
        .map_err(BuilderError::at(Stage::Tapos))?;
        let tapos = self.construct_tapos().await?;

        let direct: Vec<Operation> = self.operations().cloned().collect();
        let (unfilled, required) = match self.config.proposer {
            Some(proposer) => {
                let wrapper = self.proposal_wrapper(proposer, tapos.node_time, direct)?;
                let required = dedup(wrapper.required_authorities());
                (vec![wrapper], required)
            }
            None => (direct, self.direct_signers()),
        };
        let operations = self.compute_fees(&unfilled).await?;

        let transaction = Transaction {
            ref_block_num: tapos.ref_block_num,
            ref_block_prefix: tapos.ref_block_prefix,
            expiration: tapos.expiration,
            operations,
        };
        let body = transaction
            .body_bytes()
            .map_err(BuilderError::at(Stage::Finalize))?;

        info!(
            operations = self.pending.len(),
            proposal = self.config.proposer.is_some(),
            body_len = body.len(),
            expiration = %transaction.expiration,
            "transaction finalized"
        );
        Ok(FinalizedTransaction {
            transaction,
            chain_id,
            required,
        })
    }

    fn proposal_wrapper(
        &self,
        proposer: AccountId,
        node_time: TimePointSec,
        proposed_ops: Vec<Operation>,
    ) -> Result<Operation, BuilderError> {
        let expiration_time = node_time
            .checked_add(self.config.proposal_expiration)
            .ok_or_else(|| {
                BuilderError::new(
                    Stage::Finalize,
                    CodecError::constraint("proposal.expiration_time", "node time plus expiration overflows"),
                )
            })?;
        let review_period_seconds = self
            .config
            .proposal_review_period
            .map(|period| u32::try_from(period.as_secs()))
            .transpose()
            .map_err(|_| {
                BuilderError::new(
                    Stage::Finalize,
                    CodecError::constraint("proposal.review_period_seconds", "exceeds u32 seconds"),
                )
            })?;
        debug!(%proposer, %expiration_time, ?review_period_seconds, "wrapping operations in proposal");
        Ok(Operation::from(ProposalCreate {
            fee: Asset::default(),
            fee_paying_account: proposer,
            expiration_time,
            proposed_ops,
            review_period_seconds,
        }))
    }

    fn direct_signers(&self) -> Vec<RequiredAuthority> {
        let all = self.pending.iter().flat_map(|p| match (p.signer, &self.config.default_signer) {
            (Some(signer), _) => vec![signer],
            (None, DefaultSigner::Account { account, permission }) => vec![RequiredAuthority::Account {
                account: *account,
                permission: *permission,
            }],
            (None, DefaultSigner::Derived) => p.operation.required_authorities(),
        });
        dedup(all)
    }

    // -- sign ---------------------------------------------------------------

    /// Resolve keys for every required authority and sign the finalized body.
    pub async fn sign(&mut self) -> Result<&SignedTransaction, BuilderError> {
        let (transaction, chain_id, required) = match (&self.state, &self.finalized) {
            (BuilderState::Finalized, Some(f)) => (f.transaction.clone(), f.chain_id, f.required.clone()),
            _ => return Err(self.invalid_state(Stage::Sign)),
        };

        let keys = self.signing_keys(&required).await?;
        if keys.is_empty() {
            warn!("no signing keys resolved, refusing to sign");
            return Err(BuilderError::new(Stage::Sign, FailureReason::MissingSigningKeys));
        }

        let signed = sign_transaction(&transaction, &chain_id, &keys).map_err(BuilderError::at(Stage::Sign))?;
        let bytes = signed.to_bytes().map_err(BuilderError::at(Stage::Sign))?;
        let id = signed.id().map_err(BuilderError::at(Stage::Sign))?;

        info!(
            transaction_id = %id,
            signatures = signed.signatures.len(),
            "transaction signed"
        );
        self.state = BuilderState::Signed;
        let state = self.signed.insert(SignedState {
            transaction: signed,
            bytes,
            id,
        });
        Ok(&state.transaction)
    }

    /// Wallet keys plus builder keys, or nothing when no wallet exists.
    fn held_public_keys(&self) -> Result<Vec<PublicKey>, BuilderError> {
        let mut held = match self.keystore.public_keys() {
            Ok(keys) => keys,
            Err(WalletError::WalletNotCreated) => Vec::new(),
            Err(e) => return Err(BuilderError::new(Stage::Sign, e)),
        };
        held.extend(self.extra_keys.iter().map(|(pk, _)| *pk));
        Ok(held)
    }

    fn private_key_for(&self, public_key: &PublicKey) -> Result<PrivateKey, BuilderError> {
        match self.extra_keys.iter().find(|(pk, _)| pk == public_key) {
            Some((_, key)) => Ok(key.clone()),
            None => self
                .keystore
                .get_private_key(public_key)
                .map_err(BuilderError::at(Stage::Sign)),
        }
    }

    /// Resolved keys first, then any builder key the resolver did not pick.
    async fn signing_keys(&self, required: &[RequiredAuthority]) -> Result<Vec<PrivateKey>, BuilderError> {
        let held = self.held_public_keys()?;
        let available = |key: &PublicKey| held.contains(key);

        let resolver = AuthorityResolver::new(
            self.collaborators.authorities.as_ref(),
            &available,
            self.config.max_authority_depth,
            self.config.collaborator_timeout,
        );
        let resolved = resolver
            .resolve_all(required)
            .await
            .map_err(BuilderError::at(Stage::Sign))?;

        let mut keys: Vec<PrivateKey> = Vec::with_capacity(resolved.len() + self.extra_keys.len());
        for public_key in &resolved {
            keys.push(self.private_key_for(public_key)?);
        }
        for (public_key, key) in &self.extra_keys {
            if !resolved.contains(public_key) {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    /// Sign an already signed transaction with every held candidate key that
    /// has not signed yet, e.g. keys imported into the wallet after `sign`.
    ///
    /// Existing signatures are kept in place. With nothing new to add the
    /// transaction is returned unchanged.
    pub async fn append_missing_signatures(&mut self) -> Result<&SignedTransaction, BuilderError> {
        let (signed, finalized) = match (&self.state, &self.signed, &self.finalized) {
            (BuilderState::Signed, Some(s), Some(f)) => (s, f),
            _ => return Err(self.invalid_state(Stage::Sign)),
        };
        let chain_id = finalized.chain_id;
        let signers = signed
            .transaction
            .recover_signers(&chain_id)
            .map_err(BuilderError::at(Stage::Sign))?;

        let requirements = self.signing_info().await?;
        let held = self.held_public_keys()?;
        let mut missing: Vec<PublicKey> = Vec::new();
        for key in requirements.iter().flat_map(|r| r.candidate_keys.iter()) {
            if held.contains(key) && !signers.contains(key) && !missing.contains(key) {
                missing.push(*key);
            }
        }
        if missing.is_empty() {
            debug!("no missing signatures to append");
            return self
                .signed
                .as_ref()
                .map(|s| &s.transaction)
                .ok_or_else(|| self.invalid_state(Stage::Sign));
        }

        let mut transaction = signed.transaction.clone();
        let digest = transaction
            .transaction
            .digest(&chain_id)
            .map_err(BuilderError::at(Stage::Sign))?;
        for public_key in &missing {
            let key = self.private_key_for(public_key)?;
            let signature = sign_digest(&key, &digest).map_err(BuilderError::at(Stage::Sign))?;
            transaction.signatures.push(signature);
        }
        let bytes = transaction.to_bytes().map_err(BuilderError::at(Stage::Sign))?;
        let id = transaction.id().map_err(BuilderError::at(Stage::Sign))?;

        info!(
            transaction_id = %id,
            added = missing.len(),
            signatures = transaction.signatures.len(),
            "missing signatures appended"
        );
        let state = self.signed.insert(SignedState { transaction, bytes, id });
        Ok(&state.transaction)
    }

    /// Who could sign the finalized transaction, regardless of which keys
    /// this process holds. For handing a transaction to offline signers.
    pub async fn signing_info(&self) -> Result<Vec<SigningRequirement>, BuilderError> {
        let Some(finalized) = &self.finalized else {
            return Err(self.invalid_state(Stage::Sign));
        };
        describe_requirements(
            self.collaborators.authorities.as_ref(),
            &finalized.required,
            self.config.collaborator_timeout,
        )
        .await
        .map_err(BuilderError::at(Stage::Sign))
    }

    // -- broadcast ----------------------------------------------------------

    /// Submit the signed bytes. Safe to call again after a failure or after
    /// a success; the same bytes go out each time.
    pub async fn broadcast(&mut self) -> Result<BroadcastOutcome, BuilderError> {
        if !matches!(self.state, BuilderState::Signed | BuilderState::Broadcast) {
            return Err(self.invalid_state(Stage::Broadcast));
        }
        let Some(signed) = &self.signed else {
            return Err(self.invalid_state(Stage::Broadcast));
        };
        let transaction_id = signed.id.clone();

        if self.config.no_broadcast {
            warn!(%transaction_id, "no-broadcast mode, transaction not submitted");
            return Ok(BroadcastOutcome::Skipped { transaction_id });
        }

        let timeout = self.config.collaborator_timeout;
        let submitted = tokio::time::timeout(timeout, self.collaborators.transport.submit(&signed.bytes))
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout)));
        if let Err(e) = submitted {
            warn!(%transaction_id, error = %e, state = %self.state, "broadcast failed");
            return Err(BuilderError::new(Stage::Broadcast, e));
        }

        info!(%transaction_id, bytes = signed.bytes.len(), "transaction broadcast");
        self.state = BuilderState::Broadcast;
        Ok(BroadcastOutcome::Submitted { transaction_id })
    }

    /// Append, finalize, sign and broadcast a single operation.
    pub async fn submit_operation(
        &mut self,
        operation: impl Into<Operation>,
        signer: Option<RequiredAuthority>,
    ) -> Result<BroadcastOutcome, BuilderError> {
        self.append_operation(operation, signer)?;
        self.finalize().await?;
        self.sign().await?;
        self.broadcast().await
    }

    /// Drop everything, including added signing keys, and return to `Empty`.
    pub fn clear(&mut self) {
        debug!(from = %self.state, "builder cleared");
        self.pending.clear();
        self.extra_keys.clear();
        self.finalized = None;
        self.signed = None;
        self.state = BuilderState::Empty;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dedup(items: impl IntoIterator<Item = RequiredAuthority>) -> Vec<RequiredAuthority> {
    let mut out: Vec<RequiredAuthority> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn collect_unset_fee_types(operations: &[Operation], out: &mut Vec<u64>) {
    for op in operations {
        if let Operation::ProposalCreate(proposal) = op {
            collect_unset_fee_types(&proposal.proposed_ops, out);
        }
        if op.fee_is_unset() {
            out.push(op.type_id());
        }
    }
}

fn apply_fees(operations: &mut [Operation], schedule: &BTreeMap<u64, Asset>) {
    for op in operations {
        if let Operation::ProposalCreate(proposal) = op {
            apply_fees(&mut proposal.proposed_ops, schedule);
        }
        if op.fee_is_unset() {
            if let Some(fee) = schedule.get(&op.type_id()) {
                op.set_fee(*fee);
            }
        }
    }
}

fn convert_fee(fee: Asset, target: AssetId, rate: &Price) -> Result<Asset, ChainError> {
    if fee.asset_id == target {
        return Ok(fee);
    }
    match rate.convert_ceil(fee) {
        Some(converted) if converted.asset_id == target => Ok(converted),
        _ => Err(ChainError::NoExchangeRate(target)),
    }
}

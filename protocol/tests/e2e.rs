//! End-to-end tests for the MUSE transaction core.
//!
//! These run the whole client pipeline against an in-memory node: wallet
//! creation, key import, appending operations, finalize, sign, broadcast, and
//! an independent check that the signatures recover to the right keys.
//!
//! Each test builds its own node, keystore and builder. No shared state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use muse_protocol::chain::{
    AccountAuthorityProvider, BroadcastOutcome, ChainError, ChainStateProvider, Collaborators,
    FeeScheduleProvider, Transport, TransportError,
};
use muse_protocol::config::BuilderConfig;
use muse_protocol::crypto::kdf::KdfParams;
use muse_protocol::crypto::keys::{PrivateKey, PublicKey};
use muse_protocol::storage::WalletDb;
use muse_protocol::transaction::{
    AccountId, Asset, AssetId, Authority, AuthorityError, BlockHeaderRef, BuilderState, ChainId,
    FailureReason, Operation, Permission, Price, SignedTransaction, Stage, TimePointSec,
    TransactionBuilder, Transfer,
};
use muse_protocol::vault::{FileStorage, Keystore, MemoryStorage, WalletError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CHAIN: [u8; 32] = [0x45; 32];
const NODE_TIME: u32 = 1_750_000_000;

/// A node that answers from memory and records every submission.
#[derive(Default)]
struct InMemoryNode {
    accounts: Mutex<HashMap<(AccountId, Permission), Authority>>,
    submissions: Mutex<Vec<Vec<u8>>>,
    reject_with: Mutex<Option<String>>,
}

impl InMemoryNode {
    fn set_authority(&self, account: AccountId, authority: Authority) {
        let mut accounts = self.accounts.lock();
        accounts.insert((account, Permission::Active), authority.clone());
        accounts.insert((account, Permission::Owner), authority);
    }

    fn submissions(&self) -> Vec<Vec<u8>> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl ChainStateProvider for InMemoryNode {
    async fn chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(ChainId::from_bytes(CHAIN))
    }

    async fn latest_block_header(&self) -> Result<BlockHeaderRef, ChainError> {
        let mut block_id = [0u8; 20];
        block_id[..4].copy_from_slice(&0x0042_1337u32.to_be_bytes());
        block_id[4..8].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        Ok(BlockHeaderRef::new(0x0042_1337, block_id))
    }

    async fn current_node_time(&self) -> Result<TimePointSec, ChainError> {
        Ok(TimePointSec(NODE_TIME))
    }
}

#[async_trait]
impl FeeScheduleProvider for InMemoryNode {
    async fn fee_for(&self, type_id: u64) -> Result<Asset, ChainError> {
        Ok(Asset::core(match type_id {
            Operation::TRANSFER => 2_000,
            Operation::PROPOSAL_CREATE => 10_000,
            _ => 500,
        }))
    }

    async fn core_exchange_rate(&self, asset: AssetId) -> Result<Price, ChainError> {
        Err(ChainError::NoExchangeRate(asset))
    }
}

#[async_trait]
impl AccountAuthorityProvider for InMemoryNode {
    async fn authority_of(
        &self,
        account: AccountId,
        permission: Permission,
    ) -> Result<Authority, ChainError> {
        self.accounts
            .lock()
            .get(&(account, permission))
            .cloned()
            .ok_or(ChainError::UnknownAccount(account))
    }
}

#[async_trait]
impl Transport for InMemoryNode {
    async fn submit(&self, signed_transaction: &[u8]) -> Result<(), TransportError> {
        if let Some(reason) = self.reject_with.lock().clone() {
            return Err(TransportError::Rejected(reason));
        }
        self.submissions.lock().push(signed_transaction.to_vec());
        Ok(())
    }
}

fn fast_kdf() -> KdfParams {
    KdfParams::new(1024, 1, 1)
}

fn memory_keystore() -> Arc<Keystore> {
    Arc::new(Keystore::new(MemoryStorage::new()).with_kdf_params(fast_kdf()))
}

fn builder(config: BuilderConfig, node: &Arc<InMemoryNode>, keystore: &Arc<Keystore>) -> TransactionBuilder {
    TransactionBuilder::new(config, Collaborators::from_single(Arc::clone(node)), Arc::clone(keystore))
}

fn transfer(from: u64, to: u64, amount: i64) -> Transfer {
    Transfer {
        fee: Asset::core(0),
        from: AccountId(from),
        to: AccountId(to),
        amount: Asset::core(amount),
        memo: None,
    }
}

/// A wallet holding one key that is the sole active key of `account`.
fn funded_account(node: &InMemoryNode, keystore: &Keystore, account: u64) -> PublicKey {
    keystore.create("p1").unwrap();
    let public_key = keystore.add_secret_key(&PrivateKey::generate()).unwrap();
    node.set_authority(AccountId(account), Authority::single_key(public_key));
    public_key
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transfer_signed_by_wallet_key_and_rebroadcast_identically() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = Arc::new(
        Keystore::new(FileStorage::new(dir.path().join("wallet.json"))).with_kdf_params(fast_kdf()),
    );
    let node = Arc::new(InMemoryNode::default());

    keystore.create("p1").unwrap();
    let k1 = keystore.add_private_key("5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3").unwrap();
    keystore.lock();
    keystore.unlock("p1").unwrap();
    node.set_authority(AccountId(100), Authority::single_key(k1));

    let mut builder = builder(BuilderConfig::default(), &node, &keystore);
    builder.append_operation(transfer(100, 101, 5_000), None).unwrap();

    let tx = builder.finalize().await.unwrap().clone();
    assert_eq!(tx.ref_block_num, 0x1337);
    assert_eq!(tx.ref_block_prefix, 0x0403_0201);
    assert_eq!(tx.expiration, TimePointSec(NODE_TIME + 60));
    assert_eq!(tx.operations[0].fee(), &Asset::core(2_000));

    let signed = builder.sign().await.unwrap().clone();
    assert_eq!(signed.signatures.len(), 1);
    assert_eq!(signed.recover_signers(&ChainId::from_bytes(CHAIN)).unwrap(), vec![k1]);

    let first = builder.broadcast().await.unwrap();
    let second = builder.broadcast().await.unwrap();
    assert_eq!(first, second);
    assert!(matches!(first, BroadcastOutcome::Submitted { .. }));
    assert_eq!(builder.state(), BuilderState::Broadcast);

    let submissions = node.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0], submissions[1]);
    assert_eq!(SignedTransaction::from_bytes(&submissions[0]).unwrap(), signed);
}

#[tokio::test]
async fn bundled_operations_keep_call_order() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    funded_account(&node, &keystore, 100);

    let mut builder = builder(BuilderConfig::bundled(), &node, &keystore);
    for (to, amount) in [(201, 1), (202, 2), (203, 3)] {
        builder.append_operation(transfer(100, to, amount), None).unwrap();
    }
    builder.finalize().await.unwrap();
    builder.sign().await.unwrap();
    builder.broadcast().await.unwrap();

    let submissions = node.submissions();
    assert_eq!(submissions.len(), 1);
    let on_wire = SignedTransaction::from_bytes(&submissions[0]).unwrap();
    let recipients: Vec<AccountId> = on_wire
        .transaction
        .operations
        .iter()
        .map(|op| match op {
            Operation::Transfer(t) => t.to,
            other => panic!("unexpected {}", other.name()),
        })
        .collect();
    assert_eq!(recipients, vec![AccountId(201), AccountId(202), AccountId(203)]);
    // One account authorizes all three.
    assert_eq!(on_wire.signatures.len(), 1);
}

#[tokio::test]
async fn proposal_defers_operations_to_on_chain_approval() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    let proposer_key = funded_account(&node, &keystore, 300);

    let mut builder = builder(BuilderConfig::proposing(AccountId(300)), &node, &keystore);
    builder.submit_operation(transfer(400, 401, 9), None).await.unwrap();

    let on_wire = SignedTransaction::from_bytes(&node.submissions()[0]).unwrap();
    let [Operation::ProposalCreate(proposal)] = on_wire.transaction.operations.as_slice() else {
        panic!("expected a single proposal_create");
    };
    assert_eq!(proposal.fee, Asset::core(10_000));
    assert_eq!(proposal.fee_paying_account, AccountId(300));
    assert_eq!(proposal.proposed_ops.len(), 1);
    assert_eq!(proposal.proposed_ops[0].fee(), &Asset::core(2_000));
    assert_eq!(
        on_wire.recover_signers(&ChainId::from_bytes(CHAIN)).unwrap(),
        vec![proposer_key]
    );
}

// ---------------------------------------------------------------------------
// Authority thresholds
// ---------------------------------------------------------------------------

struct Multisig {
    node: Arc<InMemoryNode>,
    a: PrivateKey,
    b: PrivateKey,
    c: PrivateKey,
}

fn multisig() -> Multisig {
    let (a, b, c) = (PrivateKey::generate(), PrivateKey::generate(), PrivateKey::generate());
    let node = Arc::new(InMemoryNode::default());
    node.set_authority(
        AccountId(500),
        Authority::new(2)
            .with_key(a.public_key(), 1)
            .with_key(b.public_key(), 1)
            .with_key(c.public_key(), 2),
    );
    Multisig { node, a, b, c }
}

async fn sign_with(setup: &Multisig, keys: &[&PrivateKey]) -> Result<Vec<PublicKey>, FailureReason> {
    let mut builder = builder(BuilderConfig::default(), &setup.node, &memory_keystore());
    for key in keys {
        builder.append_private_key(&key.to_wif()).unwrap();
    }
    builder.append_operation(transfer(500, 501, 1), None).unwrap();
    builder.finalize().await.unwrap();
    match builder.sign().await {
        Ok(signed) => Ok(signed.recover_signers(&ChainId::from_bytes(CHAIN)).unwrap()),
        Err(e) => Err(e.reason),
    }
}

#[tokio::test]
async fn two_light_keys_meet_threshold() {
    let setup = multisig();
    let signers = sign_with(&setup, &[&setup.a, &setup.b]).await.unwrap();
    assert_eq!(signers.len(), 2);
    assert!(signers.contains(&setup.a.public_key()));
    assert!(signers.contains(&setup.b.public_key()));
}

#[tokio::test]
async fn one_light_key_is_insufficient() {
    let setup = multisig();
    let err = sign_with(&setup, &[&setup.a]).await.unwrap_err();
    assert!(matches!(
        err,
        FailureReason::Authority(AuthorityError::InsufficientAuthority {
            reached: 1,
            threshold: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn heavy_key_signs_alone() {
    let setup = multisig();
    let signers = sign_with(&setup, &[&setup.c]).await.unwrap();
    assert_eq!(signers, vec![setup.c.public_key()]);
}

#[tokio::test]
async fn zero_threshold_account_is_never_signed_empty() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    keystore.create("p1").unwrap();
    keystore.add_secret_key(&PrivateKey::generate()).unwrap();
    node.set_authority(
        AccountId(700),
        Authority::new(0).with_key(PrivateKey::generate().public_key(), 1),
    );

    let mut builder = builder(BuilderConfig::default(), &node, &keystore);
    builder.append_operation(transfer(700, 701, 1), None).unwrap();
    builder.finalize().await.unwrap();

    let err = builder.sign().await.unwrap_err();
    assert_eq!(err.stage, Stage::Sign);
    assert!(matches!(err.reason, FailureReason::MissingSigningKeys));
    assert_eq!(builder.state(), BuilderState::Finalized);
    assert!(builder.broadcast().await.is_err());
    assert!(node.submissions().is_empty());
}

// ---------------------------------------------------------------------------
// Wallet lifecycle through the builder
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wallet_password_and_lock_lifecycle() {
    let keystore = memory_keystore();
    keystore.create("pw").unwrap();
    assert!(matches!(keystore.unlock("wrongpw"), Err(WalletError::InvalidPassword)));

    let public_key = keystore.add_secret_key(&PrivateKey::generate()).unwrap();
    keystore.unlock("pw").unwrap();
    keystore.lock();
    assert!(matches!(
        keystore.get_private_key(&public_key),
        Err(WalletError::WalletLocked)
    ));
}

#[tokio::test]
async fn locked_wallet_blocks_signing_until_unlocked() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    funded_account(&node, &keystore, 100);

    let mut builder = builder(BuilderConfig::default(), &node, &keystore);
    builder.append_operation(transfer(100, 101, 1), None).unwrap();
    builder.finalize().await.unwrap();

    keystore.lock();
    let err = builder.sign().await.unwrap_err();
    assert_eq!(err.stage, Stage::Sign);
    assert!(matches!(err.reason, FailureReason::WalletState(WalletError::WalletLocked)));
    assert_eq!(builder.state(), BuilderState::Finalized);

    keystore.unlock("p1").unwrap();
    builder.sign().await.unwrap();
    assert_eq!(builder.state(), BuilderState::Signed);
}

#[tokio::test]
async fn passphrase_change_and_lock_from_another_holder() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    funded_account(&node, &keystore, 100);
    let other_holder = Arc::clone(&keystore);

    other_holder.change_passphrase("p2").unwrap();
    let mut first = builder(BuilderConfig::default(), &node, &keystore);
    first.append_operation(transfer(100, 101, 1), None).unwrap();
    first.finalize().await.unwrap();
    first.sign().await.unwrap();

    other_holder.lock();
    assert!(matches!(other_holder.change_passphrase("p3"), Err(WalletError::WalletLocked)));
    assert!(!keystore.is_unlocked());

    let mut second = builder(BuilderConfig::default(), &node, &keystore);
    second.append_operation(transfer(100, 102, 1), None).unwrap();
    second.finalize().await.unwrap();
    assert!(second.sign().await.unwrap_err().is_wallet_locked());

    assert!(matches!(keystore.unlock("p1"), Err(WalletError::InvalidPassword)));
    keystore.unlock("p2").unwrap();
    second.sign().await.unwrap();
}

#[tokio::test]
async fn one_unlock_serves_every_builder() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    funded_account(&node, &keystore, 100);

    let mut tasks = Vec::new();
    for to in 101..105 {
        let node = Arc::clone(&node);
        let keystore = Arc::clone(&keystore);
        tasks.push(tokio::spawn(async move {
            let mut builder = builder(BuilderConfig::default(), &node, &keystore);
            builder.submit_operation(transfer(100, to, 1), None).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(node.submissions().len(), 4);
}

// ---------------------------------------------------------------------------
// Broadcast behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_broadcast_can_be_retried_with_same_bytes() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    funded_account(&node, &keystore, 100);

    let mut builder = builder(BuilderConfig::default(), &node, &keystore);
    builder.append_operation(transfer(100, 101, 1), None).unwrap();
    builder.finalize().await.unwrap();
    builder.sign().await.unwrap();
    let bytes = builder.signed_bytes().unwrap().to_vec();

    *node.reject_with.lock() = Some("node busy".into());
    let err = builder.broadcast().await.unwrap_err();
    assert_eq!(err.stage, Stage::Broadcast);
    assert!(err.to_string().contains("node busy"));
    assert_eq!(builder.state(), BuilderState::Signed);

    *node.reject_with.lock() = None;
    builder.broadcast().await.unwrap();
    assert_eq!(node.submissions(), vec![bytes]);
}

#[tokio::test]
async fn no_broadcast_mode_never_contacts_transport() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    funded_account(&node, &keystore, 100);

    let config = BuilderConfig {
        no_broadcast: true,
        ..BuilderConfig::default()
    };
    let mut builder = builder(config, &node, &keystore);
    let outcome = builder.submit_operation(transfer(100, 101, 1), None).await.unwrap();
    let BroadcastOutcome::Skipped { transaction_id } = outcome else {
        panic!("expected Skipped, got {outcome:?}");
    };
    assert_eq!(transaction_id.len(), 40);
    assert!(node.submissions().is_empty());
    assert!(builder.signed_transaction().is_some());
}

#[tokio::test]
async fn single_operation_builder_refuses_a_second() {
    let node = Arc::new(InMemoryNode::default());
    let keystore = memory_keystore();
    let mut builder = builder(BuilderConfig::default(), &node, &keystore);
    builder.append_operation(transfer(100, 101, 1), None).unwrap();
    let err = builder.append_operation(transfer(100, 102, 1), None).unwrap_err();
    assert_eq!(err.stage, Stage::Append);
    assert!(matches!(err.reason, FailureReason::BundlingDisabled));
}

// ---------------------------------------------------------------------------
// Storage backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sled_wallet_survives_reopen_and_signs() {
    let dir = tempfile::tempdir().unwrap();
    let node = Arc::new(InMemoryNode::default());

    let public_key = {
        let keystore = Keystore::new(WalletDb::open(dir.path()).unwrap()).with_kdf_params(fast_kdf());
        keystore.create("p1").unwrap();
        keystore.add_secret_key(&PrivateKey::generate()).unwrap()
    };
    node.set_authority(AccountId(100), Authority::single_key(public_key));

    let keystore = Arc::new(Keystore::new(WalletDb::open(dir.path()).unwrap()));
    assert!(!keystore.is_unlocked());
    assert_eq!(keystore.public_keys().unwrap(), vec![public_key]);
    keystore.unlock("p1").unwrap();

    let mut builder = builder(BuilderConfig::default(), &node, &keystore);
    builder.submit_operation(transfer(100, 101, 1), None).await.unwrap();
    let on_wire = SignedTransaction::from_bytes(&node.submissions()[0]).unwrap();
    assert_eq!(
        on_wire.recover_signers(&ChainId::from_bytes(CHAIN)).unwrap(),
        vec![public_key]
    );
}

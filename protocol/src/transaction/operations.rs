//! The operation catalog.
//!
//! Each variant has a fixed field layout, a numeric type-id (used both on the
//! wire and as the key into the fee schedule), and a static rule for which
//! accounts must authorize it.
//!
//! | id | operation            | authorizes                           |
//! |----|----------------------|--------------------------------------|
//! | 0  | `transfer`           | `from` / active                      |
//! | 1  | `limit_order_create` | `seller` / active                    |
//! | 2  | `limit_order_cancel` | `fee_paying_account` / active        |
//! | 5  | `account_create`     | `registrar` / active                 |
//! | 6  | `account_update`     | `account` / owner if owner changes   |
//! | 22 | `proposal_create`    | `fee_paying_account` / active        |
//! | 23 | `proposal_update`    | payer plus every approval it changes |
//!
//! The fee is the only field the builder ever writes after the caller hands
//! an operation over. An amount of zero means "not set yet".

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{
    read_extensions, write_extensions, AccountId, AccountOptions, Asset, Authority, LimitOrderId,
    Memo, Permission, ProposalId, RequiredAuthority, TimePointSec,
};
use crate::codec::{
    read_sorted, write_sorted, ByteReader, ByteWriter, CodecError, CodecResult, Decode, Encode,
};
use crate::crypto::keys::PublicKey;

/// Upper bound for `referrer_percent` (100.00%).
pub const MAX_REFERRER_PERCENT: u16 = 10_000;

/// Structural validation failure for a single operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {operation}: {reason}")]
pub struct ValidationError {
    pub operation: &'static str,
    pub reason: String,
}

fn invalid(operation: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError {
        operation,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Operation payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub fee: Asset,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Asset,
    pub memo: Option<Memo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderCreate {
    pub fee: Asset,
    pub seller: AccountId,
    pub amount_to_sell: Asset,
    pub min_to_receive: Asset,
    pub expiration: TimePointSec,
    pub fill_or_kill: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrderCancel {
    pub fee: Asset,
    pub fee_paying_account: AccountId,
    pub order: LimitOrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreate {
    pub fee: Asset,
    pub registrar: AccountId,
    pub referrer: AccountId,
    /// Hundredths of a percent, `0..=10000`.
    pub referrer_percent: u16,
    pub name: String,
    pub owner: Authority,
    pub active: Authority,
    pub options: AccountOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub fee: Asset,
    pub account: AccountId,
    pub owner: Option<Authority>,
    pub active: Option<Authority>,
    pub new_options: Option<AccountOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalCreate {
    pub fee: Asset,
    pub fee_paying_account: AccountId,
    pub expiration_time: TimePointSec,
    pub proposed_ops: Vec<Operation>,
    pub review_period_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposalUpdate {
    pub fee: Asset,
    pub fee_paying_account: AccountId,
    pub proposal: ProposalId,
    pub active_approvals_to_add: Vec<AccountId>,
    pub active_approvals_to_remove: Vec<AccountId>,
    pub owner_approvals_to_add: Vec<AccountId>,
    pub owner_approvals_to_remove: Vec<AccountId>,
    pub key_approvals_to_add: Vec<PublicKey>,
    pub key_approvals_to_remove: Vec<PublicKey>,
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One entry in a transaction's operation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Transfer(Transfer),
    LimitOrderCreate(LimitOrderCreate),
    LimitOrderCancel(LimitOrderCancel),
    AccountCreate(AccountCreate),
    AccountUpdate(AccountUpdate),
    ProposalCreate(ProposalCreate),
    ProposalUpdate(ProposalUpdate),
}

impl Operation {
    pub const TRANSFER: u64 = 0;
    pub const LIMIT_ORDER_CREATE: u64 = 1;
    pub const LIMIT_ORDER_CANCEL: u64 = 2;
    pub const ACCOUNT_CREATE: u64 = 5;
    pub const ACCOUNT_UPDATE: u64 = 6;
    pub const PROPOSAL_CREATE: u64 = 22;
    pub const PROPOSAL_UPDATE: u64 = 23;

    /// Wire and fee-schedule identifier.
    pub fn type_id(&self) -> u64 {
        match self {
            Self::Transfer(_) => Self::TRANSFER,
            Self::LimitOrderCreate(_) => Self::LIMIT_ORDER_CREATE,
            Self::LimitOrderCancel(_) => Self::LIMIT_ORDER_CANCEL,
            Self::AccountCreate(_) => Self::ACCOUNT_CREATE,
            Self::AccountUpdate(_) => Self::ACCOUNT_UPDATE,
            Self::ProposalCreate(_) => Self::PROPOSAL_CREATE,
            Self::ProposalUpdate(_) => Self::PROPOSAL_UPDATE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer(_) => "transfer",
            Self::LimitOrderCreate(_) => "limit_order_create",
            Self::LimitOrderCancel(_) => "limit_order_cancel",
            Self::AccountCreate(_) => "account_create",
            Self::AccountUpdate(_) => "account_update",
            Self::ProposalCreate(_) => "proposal_create",
            Self::ProposalUpdate(_) => "proposal_update",
        }
    }

    pub fn fee(&self) -> &Asset {
        match self {
            Self::Transfer(op) => &op.fee,
            Self::LimitOrderCreate(op) => &op.fee,
            Self::LimitOrderCancel(op) => &op.fee,
            Self::AccountCreate(op) => &op.fee,
            Self::AccountUpdate(op) => &op.fee,
            Self::ProposalCreate(op) => &op.fee,
            Self::ProposalUpdate(op) => &op.fee,
        }
    }

    fn fee_mut(&mut self) -> &mut Asset {
        match self {
            Self::Transfer(op) => &mut op.fee,
            Self::LimitOrderCreate(op) => &mut op.fee,
            Self::LimitOrderCancel(op) => &mut op.fee,
            Self::AccountCreate(op) => &mut op.fee,
            Self::AccountUpdate(op) => &mut op.fee,
            Self::ProposalCreate(op) => &mut op.fee,
            Self::ProposalUpdate(op) => &mut op.fee,
        }
    }

    pub fn set_fee(&mut self, fee: Asset) {
        *self.fee_mut() = fee;
    }

    /// A zero fee is treated as "fill this in for me".
    pub fn fee_is_unset(&self) -> bool {
        self.fee().amount == 0
    }

    /// The account debited for the fee.
    pub fn fee_payer(&self) -> AccountId {
        match self {
            Self::Transfer(op) => op.from,
            Self::LimitOrderCreate(op) => op.seller,
            Self::LimitOrderCancel(op) => op.fee_paying_account,
            Self::AccountCreate(op) => op.registrar,
            Self::AccountUpdate(op) => op.account,
            Self::ProposalCreate(op) => op.fee_paying_account,
            Self::ProposalUpdate(op) => op.fee_paying_account,
        }
    }

    /// Authorities that must sign a transaction carrying this operation.
    ///
    /// For `proposal_create` this is only the payer: the proposed operations
    /// are authorized later, on chain, by approvals.
    pub fn required_authorities(&self) -> Vec<RequiredAuthority> {
        match self {
            Self::AccountUpdate(op) if op.owner.is_some() => {
                vec![RequiredAuthority::owner(op.account)]
            }
            Self::ProposalUpdate(op) => {
                let mut out = vec![RequiredAuthority::active(op.fee_paying_account)];
                out.extend(
                    op.active_approvals_to_add
                        .iter()
                        .chain(&op.active_approvals_to_remove)
                        .map(|a| RequiredAuthority::active(*a)),
                );
                out.extend(
                    op.owner_approvals_to_add
                        .iter()
                        .chain(&op.owner_approvals_to_remove)
                        .map(|a| RequiredAuthority::owner(*a)),
                );
                out.extend(
                    op.key_approvals_to_add
                        .iter()
                        .chain(&op.key_approvals_to_remove)
                        .map(|k| RequiredAuthority::Key(*k)),
                );
                out
            }
            other => vec![RequiredAuthority::Account {
                account: other.fee_payer(),
                permission: Permission::Active,
            }],
        }
    }

    /// Structural checks a node would run before looking at chain state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = self.name();
        if self.fee().amount < 0 {
            return Err(invalid(name, "fee must not be negative"));
        }
        match self {
            Self::Transfer(op) => {
                if op.from == op.to {
                    return Err(invalid(name, "sender and receiver are the same account"));
                }
                if op.amount.amount <= 0 {
                    return Err(invalid(name, "amount must be positive"));
                }
            }
            Self::LimitOrderCreate(op) => {
                if op.amount_to_sell.asset_id == op.min_to_receive.asset_id {
                    return Err(invalid(name, "cannot trade an asset for itself"));
                }
                if op.amount_to_sell.amount <= 0 || op.min_to_receive.amount <= 0 {
                    return Err(invalid(name, "order amounts must be positive"));
                }
            }
            Self::LimitOrderCancel(_) => {}
            Self::AccountCreate(op) => {
                validate_account_name(&op.name).map_err(|reason| invalid(name, reason))?;
                if op.referrer_percent > MAX_REFERRER_PERCENT {
                    return Err(invalid(name, "referrer_percent above 100%"));
                }
                validate_authority(name, "owner", &op.owner)?;
                validate_authority(name, "active", &op.active)?;
            }
            Self::AccountUpdate(op) => {
                if op.owner.is_none() && op.active.is_none() && op.new_options.is_none() {
                    return Err(invalid(name, "nothing to update"));
                }
                if let Some(owner) = &op.owner {
                    validate_authority(name, "owner", owner)?;
                }
                if let Some(active) = &op.active {
                    validate_authority(name, "active", active)?;
                }
            }
            Self::ProposalCreate(op) => {
                if op.proposed_ops.is_empty() {
                    return Err(invalid(name, "no proposed operations"));
                }
                for inner in &op.proposed_ops {
                    inner.validate()?;
                }
            }
            Self::ProposalUpdate(op) => {
                let changes = op.active_approvals_to_add.len()
                    + op.active_approvals_to_remove.len()
                    + op.owner_approvals_to_add.len()
                    + op.owner_approvals_to_remove.len()
                    + op.key_approvals_to_add.len()
                    + op.key_approvals_to_remove.len();
                if changes == 0 {
                    return Err(invalid(name, "no approvals added or removed"));
                }
                if overlaps(&op.active_approvals_to_add, &op.active_approvals_to_remove)
                    || overlaps(&op.owner_approvals_to_add, &op.owner_approvals_to_remove)
                    || overlaps(&op.key_approvals_to_add, &op.key_approvals_to_remove)
                {
                    return Err(invalid(name, "the same approval is both added and removed"));
                }
            }
        }
        Ok(())
    }
}

impl From<Transfer> for Operation {
    fn from(op: Transfer) -> Self {
        Self::Transfer(op)
    }
}

impl From<LimitOrderCreate> for Operation {
    fn from(op: LimitOrderCreate) -> Self {
        Self::LimitOrderCreate(op)
    }
}

impl From<LimitOrderCancel> for Operation {
    fn from(op: LimitOrderCancel) -> Self {
        Self::LimitOrderCancel(op)
    }
}

impl From<AccountCreate> for Operation {
    fn from(op: AccountCreate) -> Self {
        Self::AccountCreate(op)
    }
}

impl From<AccountUpdate> for Operation {
    fn from(op: AccountUpdate) -> Self {
        Self::AccountUpdate(op)
    }
}

impl From<ProposalCreate> for Operation {
    fn from(op: ProposalCreate) -> Self {
        Self::ProposalCreate(op)
    }
}

impl From<ProposalUpdate> for Operation {
    fn from(op: ProposalUpdate) -> Self {
        Self::ProposalUpdate(op)
    }
}

fn overlaps<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.iter().any(|x| b.contains(x))
}

fn validate_authority(
    operation: &'static str,
    which: &str,
    authority: &Authority,
) -> Result<(), ValidationError> {
    if authority.weight_threshold == 0 {
        return Err(invalid(operation, format!("{which} threshold is zero")));
    }
    if authority.is_impossible() {
        return Err(invalid(operation, format!("{which} threshold can never be met")));
    }
    Ok(())
}

/// Graphene account naming: dot-separated labels, each starting with a
/// letter, ending with a letter or digit, containing only `[a-z0-9-]`.
fn validate_account_name(name: &str) -> Result<(), String> {
    if !(3..=63).contains(&name.len()) {
        return Err(format!("account name `{name}` must be 3 to 63 characters"));
    }
    for label in name.split('.') {
        let bytes = label.as_bytes();
        let ok = bytes.len() >= 3
            && bytes[0].is_ascii_lowercase()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
        if !ok {
            return Err(format!("account name `{name}` is not a valid chain name"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

impl Encode for Operation {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_varint(self.type_id());
        match self {
            Self::Transfer(op) => {
                op.fee.encode(w)?;
                op.from.encode(w)?;
                op.to.encode(w)?;
                op.amount.encode(w)?;
                op.memo.encode(w)?;
            }
            Self::LimitOrderCreate(op) => {
                op.fee.encode(w)?;
                op.seller.encode(w)?;
                op.amount_to_sell.encode(w)?;
                op.min_to_receive.encode(w)?;
                op.expiration.encode(w)?;
                op.fill_or_kill.encode(w)?;
            }
            Self::LimitOrderCancel(op) => {
                op.fee.encode(w)?;
                op.fee_paying_account.encode(w)?;
                op.order.encode(w)?;
            }
            Self::AccountCreate(op) => {
                if op.referrer_percent > MAX_REFERRER_PERCENT {
                    return Err(CodecError::constraint(
                        "referrer_percent",
                        format!("{} > {MAX_REFERRER_PERCENT}", op.referrer_percent),
                    ));
                }
                op.fee.encode(w)?;
                op.registrar.encode(w)?;
                op.referrer.encode(w)?;
                w.put_u16(op.referrer_percent);
                op.name.encode(w)?;
                op.owner.encode(w)?;
                op.active.encode(w)?;
                op.options.encode(w)?;
            }
            Self::AccountUpdate(op) => {
                op.fee.encode(w)?;
                op.account.encode(w)?;
                op.owner.encode(w)?;
                op.active.encode(w)?;
                op.new_options.encode(w)?;
            }
            Self::ProposalCreate(op) => {
                op.fee.encode(w)?;
                op.fee_paying_account.encode(w)?;
                op.expiration_time.encode(w)?;
                w.enter_nested("proposed_ops")?;
                op.proposed_ops.encode(w)?;
                w.leave_nested();
                op.review_period_seconds.encode(w)?;
            }
            Self::ProposalUpdate(op) => {
                op.fee.encode(w)?;
                op.fee_paying_account.encode(w)?;
                op.proposal.encode(w)?;
                write_sorted(w, "active_approvals_to_add", &op.active_approvals_to_add, |a| *a)?;
                write_sorted(w, "active_approvals_to_remove", &op.active_approvals_to_remove, |a| *a)?;
                write_sorted(w, "owner_approvals_to_add", &op.owner_approvals_to_add, |a| *a)?;
                write_sorted(w, "owner_approvals_to_remove", &op.owner_approvals_to_remove, |a| *a)?;
                write_sorted(w, "key_approvals_to_add", &op.key_approvals_to_add, |k| *k)?;
                write_sorted(w, "key_approvals_to_remove", &op.key_approvals_to_remove, |k| *k)?;
            }
        }
        write_extensions(w);
        Ok(())
    }
}

impl Decode for Operation {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let type_id = r.get_varint()?;
        let op = match type_id {
            Self::TRANSFER => Self::Transfer(Transfer {
                fee: Asset::decode(r)?,
                from: AccountId::decode(r)?,
                to: AccountId::decode(r)?,
                amount: Asset::decode(r)?,
                memo: Option::decode(r)?,
            }),
            Self::LIMIT_ORDER_CREATE => Self::LimitOrderCreate(LimitOrderCreate {
                fee: Asset::decode(r)?,
                seller: AccountId::decode(r)?,
                amount_to_sell: Asset::decode(r)?,
                min_to_receive: Asset::decode(r)?,
                expiration: TimePointSec::decode(r)?,
                fill_or_kill: bool::decode(r)?,
            }),
            Self::LIMIT_ORDER_CANCEL => Self::LimitOrderCancel(LimitOrderCancel {
                fee: Asset::decode(r)?,
                fee_paying_account: AccountId::decode(r)?,
                order: LimitOrderId::decode(r)?,
            }),
            Self::ACCOUNT_CREATE => Self::AccountCreate(AccountCreate {
                fee: Asset::decode(r)?,
                registrar: AccountId::decode(r)?,
                referrer: AccountId::decode(r)?,
                referrer_percent: r.get_u16()?,
                name: String::decode(r)?,
                owner: Authority::decode(r)?,
                active: Authority::decode(r)?,
                options: AccountOptions::decode(r)?,
            }),
            Self::ACCOUNT_UPDATE => Self::AccountUpdate(AccountUpdate {
                fee: Asset::decode(r)?,
                account: AccountId::decode(r)?,
                owner: Option::decode(r)?,
                active: Option::decode(r)?,
                new_options: Option::decode(r)?,
            }),
            Self::PROPOSAL_CREATE => {
                let fee = Asset::decode(r)?;
                let fee_paying_account = AccountId::decode(r)?;
                let expiration_time = TimePointSec::decode(r)?;
                r.enter_nested("proposed_ops")?;
                let proposed_ops = Vec::decode(r)?;
                r.leave_nested();
                Self::ProposalCreate(ProposalCreate {
                    fee,
                    fee_paying_account,
                    expiration_time,
                    proposed_ops,
                    review_period_seconds: Option::decode(r)?,
                })
            }
            Self::PROPOSAL_UPDATE => Self::ProposalUpdate(ProposalUpdate {
                fee: Asset::decode(r)?,
                fee_paying_account: AccountId::decode(r)?,
                proposal: ProposalId::decode(r)?,
                active_approvals_to_add: read_sorted(r, "active_approvals_to_add", |a: &AccountId| *a)?,
                active_approvals_to_remove: read_sorted(r, "active_approvals_to_remove", |a: &AccountId| *a)?,
                owner_approvals_to_add: read_sorted(r, "owner_approvals_to_add", |a: &AccountId| *a)?,
                owner_approvals_to_remove: read_sorted(r, "owner_approvals_to_remove", |a: &AccountId| *a)?,
                key_approvals_to_add: read_sorted(r, "key_approvals_to_add", |k: &PublicKey| *k)?,
                key_approvals_to_remove: read_sorted(r, "key_approvals_to_remove", |k: &PublicKey| *k)?,
            }),
            other => return Err(CodecError::UnknownOperationType(other)),
        };
        read_extensions(r, "operation.extensions")?;
        Ok(op)
    }
}

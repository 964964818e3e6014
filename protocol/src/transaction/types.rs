//! Value types shared by operations, transactions and the authority resolver.
//!
//! Everything here has a canonical wire encoding (see [`crate::codec`]) and,
//! where a human ever needs to read it, a textual form: object ids print as
//! `1.2.17`, chain ids and block ids as hex.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::{
    read_sorted, write_sorted, ByteReader, ByteWriter, CodecError, CodecResult, Decode, Encode,
};
use crate::config::{BLOCK_ID_LENGTH, CHAIN_ID_LENGTH, CORE_ASSET_INSTANCE};
use crate::crypto::keys::PublicKey;

/// Instances live in the low 48 bits of a packed object id.
pub const MAX_OBJECT_INSTANCE: u64 = (1 << 48) - 1;

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// A generic `space.type.instance` object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub space: u8,
    pub type_id: u8,
    pub instance: u64,
}

impl ObjectId {
    pub fn new(space: u8, type_id: u8, instance: u64) -> Self {
        Self {
            space,
            type_id,
            instance,
        }
    }

    /// `space << 56 | type << 48 | instance`.
    pub fn packed(&self) -> Result<u64, CodecError> {
        if self.instance > MAX_OBJECT_INSTANCE {
            return Err(CodecError::constraint(
                "object_id",
                format!("instance {} exceeds 48 bits", self.instance),
            ));
        }
        Ok((u64::from(self.space) << 56) | (u64::from(self.type_id) << 48) | self.instance)
    }

    pub fn from_packed(packed: u64) -> Self {
        Self {
            space: (packed >> 56) as u8,
            type_id: (packed >> 48) as u8,
            instance: packed & MAX_OBJECT_INSTANCE,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.space, self.type_id, self.instance)
    }
}

impl FromStr for ObjectId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CodecError::malformed("object_id", format!("`{s}` is not space.type.instance"));
        let mut parts = s.split('.');
        let (Some(space), Some(type_id), Some(instance), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };
        let id = Self {
            space: space.parse().map_err(|_| bad())?,
            type_id: type_id.parse().map_err(|_| bad())?,
            instance: instance.parse().map_err(|_| bad())?,
        };
        if id.instance > MAX_OBJECT_INSTANCE {
            return Err(bad());
        }
        Ok(id)
    }
}

impl Encode for ObjectId {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_u64(self.packed()?);
        Ok(())
    }
}

impl Decode for ObjectId {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self::from_packed(r.get_u64()?))
    }
}

// ---------------------------------------------------------------------------
// Typed ids
// ---------------------------------------------------------------------------

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $space:expr, $type_id:expr, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub const SPACE: u8 = $space;
            pub const TYPE: u8 = $type_id;

            pub fn new(instance: u64) -> Self {
                Self(instance)
            }

            pub fn instance(&self) -> u64 {
                self.0
            }

            pub fn object_id(&self) -> ObjectId {
                ObjectId::new(Self::SPACE, Self::TYPE, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}.{}", Self::SPACE, Self::TYPE, self.0)
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id: ObjectId = s.parse()?;
                Self::try_from(id)
            }
        }

        impl TryFrom<ObjectId> for $name {
            type Error = CodecError;

            fn try_from(id: ObjectId) -> Result<Self, Self::Error> {
                if id.space != Self::SPACE || id.type_id != Self::TYPE {
                    return Err(CodecError::malformed(
                        $field,
                        format!("expected {}.{}.x, got {id}", Self::SPACE, Self::TYPE),
                    ));
                }
                Ok(Self(id.instance))
            }
        }

        impl From<$name> for ObjectId {
            fn from(id: $name) -> Self {
                id.object_id()
            }
        }

        impl Encode for $name {
            fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
                if self.0 > MAX_OBJECT_INSTANCE {
                    return Err(CodecError::constraint(
                        $field,
                        format!("instance {} exceeds 48 bits", self.0),
                    ));
                }
                w.put_varint(self.0);
                Ok(())
            }
        }

        impl Decode for $name {
            fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
                let instance = r.get_varint()?;
                if instance > MAX_OBJECT_INSTANCE {
                    return Err(CodecError::malformed($field, "instance exceeds 48 bits"));
                }
                Ok(Self(instance))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

typed_id!(
    /// An account, `1.2.x`.
    AccountId, 1, 2, "account_id"
);
typed_id!(
    /// An asset, `1.3.x`.
    AssetId, 1, 3, "asset_id"
);
typed_id!(
    /// An open limit order, `1.7.x`.
    LimitOrderId, 1, 7, "limit_order_id"
);
typed_id!(
    /// A pending proposal, `1.10.x`.
    ProposalId, 1, 10, "proposal_id"
);

impl AssetId {
    /// The chain's core asset, `1.3.0`.
    pub const CORE: AssetId = AssetId(CORE_ASSET_INSTANCE);
}

// ---------------------------------------------------------------------------
// Asset / Price
// ---------------------------------------------------------------------------

/// An amount of some asset, in its smallest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub amount: i64,
    pub asset_id: AssetId,
}

impl Asset {
    pub fn new(amount: i64, asset_id: AssetId) -> Self {
        Self { amount, asset_id }
    }

    pub fn core(amount: i64) -> Self {
        Self::new(amount, AssetId::CORE)
    }

    pub fn zero(asset_id: AssetId) -> Self {
        Self::new(0, asset_id)
    }
}

impl Default for Asset {
    fn default() -> Self {
        Self::zero(AssetId::CORE)
    }
}

impl Encode for Asset {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_i64(self.amount);
        self.asset_id.encode(w)
    }
}

impl Decode for Asset {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            amount: r.get_i64()?,
            asset_id: AssetId::decode(r)?,
        })
    }
}

/// An exchange rate: `base` is worth `quote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub base: Asset,
    pub quote: Asset,
}

impl Price {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    /// Convert `amount` across this price, rounding up.
    ///
    /// Works in either direction; returns `None` when `amount` is in neither
    /// asset, when a side of the price is non-positive, or on overflow.
    pub fn convert_ceil(&self, amount: Asset) -> Option<Asset> {
        let (from, to) = if amount.asset_id == self.base.asset_id {
            (self.base, self.quote)
        } else if amount.asset_id == self.quote.asset_id {
            (self.quote, self.base)
        } else {
            return None;
        };
        if from.amount <= 0 || to.amount <= 0 || amount.amount < 0 {
            return None;
        }
        let numerator = u128::try_from(amount.amount).ok()? * u128::try_from(to.amount).ok()?;
        let denominator = u128::try_from(from.amount).ok()?;
        let converted = numerator.div_ceil(denominator);
        Some(Asset::new(i64::try_from(converted).ok()?, to.asset_id))
    }
}

// ---------------------------------------------------------------------------
// TimePointSec
// ---------------------------------------------------------------------------

/// Unix seconds, as the chain stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TimePointSec(pub u32);

impl TimePointSec {
    pub fn from_datetime(at: DateTime<Utc>) -> Result<Self, CodecError> {
        u32::try_from(at.timestamp())
            .map(Self)
            .map_err(|_| CodecError::constraint("time_point_sec", format!("{at} out of u32 range")))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(i64::from(self.0), 0).single()
    }

    pub fn checked_add(&self, delta: Duration) -> Option<Self> {
        let secs = u32::try_from(delta.as_secs()).ok()?;
        self.0.checked_add(secs).map(Self)
    }
}

impl fmt::Display for TimePointSec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(at) => write!(f, "{}", at.format("%Y-%m-%dT%H:%M:%S")),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Encode for TimePointSec {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_u32(self.0);
        Ok(())
    }
}

impl Decode for TimePointSec {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self(r.get_u32()?))
    }
}

// ---------------------------------------------------------------------------
// Permission / Authority
// ---------------------------------------------------------------------------

/// Which of an account's two authorities is being exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Active,
    Owner,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Owner => write!(f, "owner"),
        }
    }
}

/// A weighted-threshold authority.
///
/// Both maps are kept sorted by key. The builder methods maintain that; if you
/// fill the fields by hand and get the order wrong, encoding fails rather
/// than silently producing a different byte string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Authority {
    pub weight_threshold: u32,
    pub account_auths: Vec<(AccountId, u16)>,
    pub key_auths: Vec<(PublicKey, u16)>,
}

impl Authority {
    pub fn new(weight_threshold: u32) -> Self {
        Self {
            weight_threshold,
            ..Self::default()
        }
    }

    /// Single-key authority with threshold 1.
    pub fn single_key(key: PublicKey) -> Self {
        Self::new(1).with_key(key, 1)
    }

    /// Add or replace a key entry, keeping the map ordered.
    pub fn with_key(mut self, key: PublicKey, weight: u16) -> Self {
        match self.key_auths.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(pos) => self.key_auths[pos].1 = weight,
            Err(pos) => self.key_auths.insert(pos, (key, weight)),
        }
        self
    }

    /// Add or replace an account entry, keeping the map ordered.
    pub fn with_account(mut self, account: AccountId, weight: u16) -> Self {
        match self.account_auths.binary_search_by(|(a, _)| a.cmp(&account)) {
            Ok(pos) => self.account_auths[pos].1 = weight,
            Err(pos) => self.account_auths.insert(pos, (account, weight)),
        }
        self
    }

    /// Sum of every weight, keys and accounts. A threshold above this can
    /// never be met.
    pub fn total_weight(&self) -> u64 {
        let keys: u64 = self.key_auths.iter().map(|(_, w)| u64::from(*w)).sum();
        let accounts: u64 = self.account_auths.iter().map(|(_, w)| u64::from(*w)).sum();
        keys + accounts
    }

    pub fn is_impossible(&self) -> bool {
        u64::from(self.weight_threshold) > self.total_weight()
    }
}

impl Encode for Authority {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_u32(self.weight_threshold);
        write_sorted(w, "account_auths", &self.account_auths, |(a, _)| *a)?;
        write_sorted(w, "key_auths", &self.key_auths, |(k, _)| *k)?;
        // address_auths: always empty.
        w.put_varint(0);
        Ok(())
    }
}

impl Decode for Authority {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let weight_threshold = r.get_u32()?;
        let account_auths = read_sorted(r, "account_auths", |(a, _): &(AccountId, u16)| *a)?;
        let key_auths = read_sorted(r, "key_auths", |(k, _): &(PublicKey, u16)| *k)?;
        if r.get_varint()? != 0 {
            return Err(CodecError::malformed(
                "address_auths",
                "address authorities are not supported",
            ));
        }
        Ok(Self {
            weight_threshold,
            account_auths,
            key_auths,
        })
    }
}

/// An (account, permission) pair that must sign, or a bare key that must.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequiredAuthority {
    Account {
        account: AccountId,
        permission: Permission,
    },
    Key(PublicKey),
}

impl RequiredAuthority {
    pub fn active(account: AccountId) -> Self {
        Self::Account {
            account,
            permission: Permission::Active,
        }
    }

    pub fn owner(account: AccountId) -> Self {
        Self::Account {
            account,
            permission: Permission::Owner,
        }
    }
}

impl fmt::Display for RequiredAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account {
                account,
                permission,
            } => write!(f, "{account}/{permission}"),
            Self::Key(key) => write!(f, "{key}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Account options, votes, memo
// ---------------------------------------------------------------------------

/// A packed vote identifier: `type` in the low 8 bits, `instance` above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoteId(pub u32);

impl VoteId {
    pub fn new(vote_type: u8, instance: u32) -> Result<Self, CodecError> {
        if instance >= 1 << 24 {
            return Err(CodecError::constraint("vote_id", "instance exceeds 24 bits"));
        }
        Ok(Self(u32::from(vote_type) | (instance << 8)))
    }

    pub fn vote_type(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn instance(&self) -> u32 {
        self.0 >> 8
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vote_type(), self.instance())
    }
}

impl Encode for VoteId {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_u32(self.0);
        Ok(())
    }
}

impl Decode for VoteId {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self(r.get_u32()?))
    }
}

/// Voting and memo settings attached to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOptions {
    pub memo_key: PublicKey,
    pub voting_account: AccountId,
    pub num_witness: u16,
    pub num_committee: u16,
    /// Strictly ascending.
    pub votes: Vec<VoteId>,
}

impl AccountOptions {
    /// Options with no votes and the account voting for itself (proxy
    /// `1.2.5` is Graphene's "no proxy" sentinel).
    pub fn new(memo_key: PublicKey) -> Self {
        Self {
            memo_key,
            voting_account: AccountId(5),
            num_witness: 0,
            num_committee: 0,
            votes: Vec::new(),
        }
    }
}

impl Encode for AccountOptions {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        self.memo_key.encode(w)?;
        self.voting_account.encode(w)?;
        w.put_u16(self.num_witness);
        w.put_u16(self.num_committee);
        write_sorted(w, "votes", &self.votes, |v| *v)?;
        write_extensions(w);
        Ok(())
    }
}

impl Decode for AccountOptions {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let options = Self {
            memo_key: PublicKey::decode(r)?,
            voting_account: AccountId::decode(r)?,
            num_witness: r.get_u16()?,
            num_committee: r.get_u16()?,
            votes: read_sorted(r, "votes", |v: &VoteId| *v)?,
        };
        read_extensions(r, "account_options.extensions")?;
        Ok(options)
    }
}

/// An already-encrypted memo. This crate carries it; it does not encrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memo {
    pub from: PublicKey,
    pub to: PublicKey,
    pub nonce: u64,
    #[serde(with = "hex_bytes")]
    pub message: Vec<u8>,
}

impl Encode for Memo {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        self.from.encode(w)?;
        self.to.encode(w)?;
        w.put_u64(self.nonce);
        w.put_blob("memo.message", &self.message)
    }
}

impl Decode for Memo {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            from: PublicKey::decode(r)?,
            to: PublicKey::decode(r)?,
            nonce: r.get_u64()?,
            message: r.get_blob("memo.message")?,
        })
    }
}

/// Extensions are reserved for future use and always encode empty.
pub fn write_extensions(w: &mut ByteWriter) {
    w.put_varint(0);
}

pub fn read_extensions(r: &mut ByteReader<'_>, field: &'static str) -> CodecResult<()> {
    match r.get_varint()? {
        0 => Ok(()),
        n => Err(CodecError::malformed(
            field,
            format!("{n} extensions present, none are supported"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Chain references
// ---------------------------------------------------------------------------

/// The 32-byte chain identifier mixed into every signing digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId([u8; CHAIN_ID_LENGTH]);

impl ChainId {
    pub fn from_bytes(bytes: [u8; CHAIN_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s).map_err(|e| CodecError::malformed("chain_id", e.to_string()))?;
        let bytes: [u8; CHAIN_ID_LENGTH] = bytes
            .try_into()
            .map_err(|_| CodecError::malformed("chain_id", "expected 32 bytes"))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; CHAIN_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({self})")
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The slice of a block header the builder needs for TAPOS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeaderRef {
    pub block_num: u32,
    pub block_id: [u8; BLOCK_ID_LENGTH],
}

impl BlockHeaderRef {
    pub fn new(block_num: u32, block_id: [u8; BLOCK_ID_LENGTH]) -> Self {
        Self {
            block_num,
            block_id,
        }
    }

    /// `(ref_block_num, ref_block_prefix)`.
    pub fn tapos(&self) -> (u16, u32) {
        let ref_block_num = (self.block_num & 0xFFFF) as u16;
        let ref_block_prefix = u32::from_le_bytes([
            self.block_id[4],
            self.block_id[5],
            self.block_id[6],
            self.block_id[7],
        ]);
        (ref_block_num, ref_block_prefix)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

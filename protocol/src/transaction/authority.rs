//! # Authority Resolution
//!
//! Turns "account X must authorize at permission P" into "sign with these
//! keys".
//!
//! An authority is a threshold over weighted keys and weighted accounts. An
//! account entry is satisfied by that account's own active authority, which
//! may in turn name more accounts. We walk that tree breadth-first into a
//! flat arena (no recursion, no async recursion), bounded by a maximum
//! depth, then evaluate it bottom-up:
//!
//! ```text
//!   arena[0]  alice/active   threshold 2   keys: K1(1)   accounts: bob(1)
//!   arena[1]  bob/active     threshold 1   keys: K2(1)
//!
//!   evaluate arena[1] -> {K2}        weight 1 >= 1
//!   evaluate arena[0] -> {K1, K2}    weight 2 >= 2
//! ```
//!
//! Within one node the candidates (available keys and satisfied child
//! accounts) are taken largest weight first until the threshold is met. A
//! node whose own available keys already meet the threshold is not expanded
//! at all, so keys held directly always win over delegated ones.
//!
//! Availability is a predicate over public keys. The builder passes one that
//! checks the keystore (which does not need to be unlocked for that) and any
//! explicitly supplied signing keys.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::types::{AccountId, Authority, Permission, RequiredAuthority};
use crate::chain::{bounded, AccountAuthorityProvider, ChainError};
use crate::crypto::keys::PublicKey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("insufficient authority for {required}: reached weight {reached} of {threshold}")]
    InsufficientAuthority {
        required: RequiredAuthority,
        reached: u64,
        threshold: u32,
    },

    #[error("authority for {required} needs accounts nested deeper than {max_depth} levels")]
    AuthorityResolutionDepthExceeded {
        required: RequiredAuthority,
        max_depth: usize,
    },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Availability test for a public key.
pub type KeyPredicate<'a> = dyn Fn(&PublicKey) -> bool + Send + Sync + 'a;

/// Resolves required authorities into concrete signing keys.
pub struct AuthorityResolver<'a> {
    provider: &'a dyn AccountAuthorityProvider,
    available: &'a KeyPredicate<'a>,
    max_depth: usize,
    timeout: Duration,
}

struct Node {
    authority: Authority,
    depth: usize,
    parent: Option<usize>,
    weight_in_parent: u16,
    /// Has account entries we declined to expand because of the depth bound.
    truncated: bool,
}

/// Candidate contributing to a node's threshold.
struct Candidate {
    weight: u16,
    keys: Vec<PublicKey>,
}

impl<'a> AuthorityResolver<'a> {
    pub fn new(
        provider: &'a dyn AccountAuthorityProvider,
        available: &'a KeyPredicate<'a>,
        max_depth: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            available,
            max_depth,
            timeout,
        }
    }

    async fn fetch(&self, account: AccountId, permission: Permission) -> Result<Authority, ChainError> {
        bounded(
            self.timeout,
            "authority_of",
            self.provider.authority_of(account, permission),
        )
        .await
    }

    /// Resolve every requirement, returning the union of keys in first-seen
    /// order with duplicates removed.
    pub async fn resolve_all(
        &self,
        required: &[RequiredAuthority],
    ) -> Result<Vec<PublicKey>, AuthorityError> {
        let mut keys: Vec<PublicKey> = Vec::new();
        let mut seen: Vec<RequiredAuthority> = Vec::new();
        for requirement in required {
            if seen.contains(requirement) {
                continue;
            }
            seen.push(*requirement);
            for key in self.resolve(*requirement).await? {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Resolve a single requirement into a minimal-ish key set.
    pub async fn resolve(&self, required: RequiredAuthority) -> Result<Vec<PublicKey>, AuthorityError> {
        let (account, permission) = match required {
            RequiredAuthority::Key(key) => {
                return if (self.available)(&key) {
                    Ok(vec![key])
                } else {
                    Err(AuthorityError::InsufficientAuthority {
                        required,
                        reached: 0,
                        threshold: 1,
                    })
                };
            }
            RequiredAuthority::Account {
                account,
                permission,
            } => (account, permission),
        };

        let root = self.fetch(account, permission).await?;
        let arena = self.expand(root).await?;
        let (selected, reached) = self.evaluate(&arena);

        if let Some(keys) = selected {
            debug!(%required, keys = keys.len(), nodes = arena.len(), "authority resolved");
            return Ok(keys);
        }
        if arena.iter().any(|n| n.truncated) {
            return Err(AuthorityError::AuthorityResolutionDepthExceeded {
                required,
                max_depth: self.max_depth,
            });
        }
        Err(AuthorityError::InsufficientAuthority {
            required,
            reached,
            threshold: arena[0].authority.weight_threshold,
        })
    }

    fn held_weight(&self, authority: &Authority) -> u64 {
        authority
            .key_auths
            .iter()
            .filter(|(key, _)| (self.available)(key))
            .map(|(_, w)| u64::from(*w))
            .sum()
    }

    /// Breadth-first expansion of account entries into the arena.
    async fn expand(&self, root: Authority) -> Result<Vec<Node>, ChainError> {
        let mut arena = vec![Node {
            authority: root,
            depth: 0,
            parent: None,
            weight_in_parent: 0,
            truncated: false,
        }];

        let mut cursor = 0;
        while cursor < arena.len() {
            let index = cursor;
            cursor += 1;

            let node = &arena[index];
            if self.held_weight(&node.authority) >= u64::from(node.authority.weight_threshold)
                || node.authority.account_auths.is_empty()
            {
                continue;
            }
            if node.depth >= self.max_depth {
                arena[index].truncated = true;
                continue;
            }

            let depth = node.depth + 1;
            let children = node.authority.account_auths.clone();
            for (account, weight) in children {
                let authority = self.fetch(account, Permission::Active).await?;
                arena.push(Node {
                    authority,
                    depth,
                    parent: Some(index),
                    weight_in_parent: weight,
                    truncated: false,
                });
            }
        }
        Ok(arena)
    }

    /// Bottom-up evaluation. Returns the root's selected keys (if satisfied)
    /// and the weight it reached either way.
    fn evaluate(&self, arena: &[Node]) -> (Option<Vec<PublicKey>>, u64) {
        let mut satisfied: Vec<Option<Vec<PublicKey>>> = vec![None; arena.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); arena.len()];
        for (index, node) in arena.iter().enumerate() {
            if let Some(parent) = node.parent {
                children[parent].push(index);
            }
        }

        let mut root_reached = 0;
        for index in (0..arena.len()).rev() {
            let node = &arena[index];
            let mut candidates: Vec<Candidate> = node
                .authority
                .key_auths
                .iter()
                .filter(|(key, _)| (self.available)(key))
                .map(|(key, weight)| Candidate {
                    weight: *weight,
                    keys: vec![*key],
                })
                .collect();
            for child in &children[index] {
                if let Some(keys) = &satisfied[*child] {
                    candidates.push(Candidate {
                        weight: arena[*child].weight_in_parent,
                        keys: keys.clone(),
                    });
                }
            }
            // Stable: ties keep key entries ahead of accounts, in map order.
            candidates.sort_by(|a, b| b.weight.cmp(&a.weight));

            let threshold = u64::from(node.authority.weight_threshold);
            let mut reached = 0u64;
            let mut selected: Vec<PublicKey> = Vec::new();
            for candidate in candidates {
                if reached >= threshold {
                    break;
                }
                reached += u64::from(candidate.weight);
                for key in candidate.keys {
                    if !selected.contains(&key) {
                        selected.push(key);
                    }
                }
            }
            if index == 0 {
                root_reached = reached;
            }
            if reached >= threshold {
                satisfied[index] = Some(selected);
            }
        }

        (satisfied.swap_remove(0), root_reached)
    }
}

/// Offline signing information for one required account: its authority
/// and every key that could contribute to it, whether or not we hold it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequirement {
    pub required: RequiredAuthority,
    pub authority: Option<Authority>,
    pub candidate_keys: Vec<PublicKey>,
}

/// Describe what would have to sign, looking one level into account
/// entries.
pub async fn describe_requirements(
    provider: &dyn AccountAuthorityProvider,
    required: &[RequiredAuthority],
    timeout: Duration,
) -> Result<Vec<SigningRequirement>, ChainError> {
    let mut out: Vec<SigningRequirement> = Vec::new();
    for requirement in required {
        if out.iter().any(|r| &r.required == requirement) {
            continue;
        }
        let entry = match *requirement {
            RequiredAuthority::Key(key) => SigningRequirement {
                required: *requirement,
                authority: None,
                candidate_keys: vec![key],
            },
            RequiredAuthority::Account {
                account,
                permission,
            } => {
                let authority =
                    bounded(timeout, "authority_of", provider.authority_of(account, permission))
                        .await?;
                let mut keys: Vec<PublicKey> = authority.key_auths.iter().map(|(k, _)| *k).collect();
                for (nested, _) in &authority.account_auths {
                    let nested_auth = bounded(
                        timeout,
                        "authority_of",
                        provider.authority_of(*nested, Permission::Active),
                    )
                    .await?;
                    for (key, _) in nested_auth.key_auths {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                }
                SigningRequirement {
                    required: *requirement,
                    authority: Some(authority),
                    candidate_keys: keys,
                }
            }
        };
        out.push(entry);
    }
    Ok(out)
}

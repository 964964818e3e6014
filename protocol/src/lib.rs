// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # MUSE Protocol: Client-Side Transaction Core
//!
//! Builds, signs and broadcasts transactions for Graphene-family chains, and
//! keeps the keys that sign them encrypted at rest.
//!
//! The library owns no sockets. It talks to a node through four narrow async
//! traits in [`chain`] and leaves RPC plumbing, retries and scheduling to the
//! embedding application.
//!
//! ## Architecture
//!
//! - **codec**: Canonical Graphene wire encoding. Signatures depend on
//!   exact bytes, so nothing here is allowed to be "close enough".
//! - **transaction**: Operation catalog, authority resolution, and the
//!   append/finalize/sign/broadcast builder.
//! - **vault**: Password-gated keystore with a shareable session.
//! - **storage**: sled-backed wallet persistence.
//! - **crypto**: secp256k1 keys and signatures, hashes, Argon2id, AES-GCM.
//! - **chain**: Collaborator traits: chain state, fees, authorities, transport.
//! - **config**: Protocol constants and `BuilderConfig`.
//! - **logging**: Optional `tracing` subscriber setup for applications.
//!
//! ## Quick tour
//!
//! ```text
//! keystore.create("pw")?;                       // wallet exists, unlocked
//! keystore.add_private_key(wif)?;               // sealed under the session key
//! builder.append_operation(transfer, None)?;    // Accumulating
//! builder.finalize().await?;                    // TAPOS + fees, Finalized
//! builder.sign().await?;                        // Signed
//! builder.broadcast().await?;                   // Broadcast
//! ```

pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod logging;
pub mod storage;
pub mod transaction;
pub mod vault;

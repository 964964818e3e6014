//! Transaction signing and signer recovery.
//!
//! Signing is a pure function of `(transaction, chain id, keys)`: it
//! serializes the body once, hashes `chain_id || body`, and produces one
//! compact signature per key in the order given. The builder decides *which*
//! keys; this module only knows how.
//!
//! A signed transaction on the wire is the body followed by its signatures:
//!
//! ```text
//! body || varint(n) || sig_1 (65 bytes) || ... || sig_n
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::builder::Transaction;
use super::types::ChainId;
use crate::codec::{ByteReader, ByteWriter, CodecError, CodecResult, Decode, Encode};
use crate::config::SIGNATURE_LENGTH;
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::crypto::signatures::{sign_digest, CompactSignature, SignatureError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl Encode for CompactSignature {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        w.put_bytes(self.as_bytes());
        Ok(())
    }
}

impl Decode for CompactSignature {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        let bytes: [u8; SIGNATURE_LENGTH] = r.take_array()?;
        CompactSignature::from_bytes(&bytes)
            .map_err(|e| CodecError::malformed("signature", e.to_string()))
    }
}

/// A transaction plus the signatures over its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<CompactSignature>,
}

impl SignedTransaction {
    /// The exact bytes handed to the transport.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        self.to_wire_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_wire_bytes(bytes)
    }

    /// Graphene transaction id: first 20 bytes of `sha256(body)`, hex.
    pub fn id(&self) -> CodecResult<String> {
        self.transaction.id()
    }

    /// Recover the public key behind every signature, in signature order.
    ///
    /// This is the check a node performs; it needs only the chain id.
    pub fn recover_signers(&self, chain_id: &ChainId) -> Result<Vec<PublicKey>, SigningError> {
        let digest = self.transaction.digest(chain_id)?;
        self.signatures
            .iter()
            .map(|sig| sig.recover(&digest).map_err(SigningError::from))
            .collect()
    }
}

impl Encode for SignedTransaction {
    fn encode(&self, w: &mut ByteWriter) -> CodecResult<()> {
        self.transaction.encode(w)?;
        self.signatures.encode(w)
    }
}

impl Decode for SignedTransaction {
    fn decode(r: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            transaction: Transaction::decode(r)?,
            signatures: Vec::decode(r)?,
        })
    }
}

/// Sign `transaction` for `chain_id` with each key in `keys`, in order.
pub fn sign_transaction(
    transaction: &Transaction,
    chain_id: &ChainId,
    keys: &[PrivateKey],
) -> Result<SignedTransaction, SigningError> {
    let digest = transaction.digest(chain_id)?;
    let signatures = keys
        .iter()
        .map(|key| sign_digest(key, &digest))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SignedTransaction {
        transaction: transaction.clone(),
        signatures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signatures::verify_digest;
    use crate::transaction::operations::{Operation, Transfer};
    use crate::transaction::types::{AccountId, Asset, TimePointSec};

    fn chain() -> ChainId {
        ChainId::from_bytes([0x42; 32])
    }

    fn sample_tx() -> Transaction {
        Transaction {
            ref_block_num: 0x1234,
            ref_block_prefix: 0xDEAD_BEEF,
            expiration: TimePointSec(1_700_000_060),
            operations: vec![Operation::from(Transfer {
                fee: Asset::core(10),
                from: AccountId(17),
                to: AccountId(18),
                amount: Asset::core(1_000),
                memo: None,
            })],
        }
    }

    #[test]
    fn one_signature_per_key_in_order() {
        let keys = [PrivateKey::generate(), PrivateKey::generate()];
        let signed = sign_transaction(&sample_tx(), &chain(), &keys).unwrap();
        let signers = signed.recover_signers(&chain()).unwrap();
        assert_eq!(signers, vec![keys[0].public_key(), keys[1].public_key()]);
    }

    #[test]
    fn independent_verifier_agrees() {
        let key = PrivateKey::generate();
        let tx = sample_tx();
        let signed = sign_transaction(&tx, &chain(), std::slice::from_ref(&key)).unwrap();
        let digest = tx.digest(&chain()).unwrap();
        assert!(verify_digest(&key.public_key(), &digest, &signed.signatures[0]));
    }

    #[test]
    fn other_chain_recovers_different_key() {
        let key = PrivateKey::generate();
        let signed = sign_transaction(&sample_tx(), &chain(), std::slice::from_ref(&key)).unwrap();
        let elsewhere = ChainId::from_bytes([0x43; 32]);
        let recovered = signed.recover_signers(&elsewhere).unwrap_or_default();
        assert!(!recovered.contains(&key.public_key()));
    }

    #[test]
    fn wire_form_is_body_then_signatures() {
        let key = PrivateKey::generate();
        let tx = sample_tx();
        let signed = sign_transaction(&tx, &chain(), std::slice::from_ref(&key)).unwrap();
        let bytes = signed.to_bytes().unwrap();
        let body = tx.body_bytes().unwrap();

        assert_eq!(&bytes[..body.len()], body.as_slice());
        assert_eq!(bytes[body.len()], 1);
        assert_eq!(&bytes[body.len() + 1..], signed.signatures[0].as_bytes());
        assert_eq!(SignedTransaction::from_bytes(&bytes).unwrap(), signed);
    }

    #[test]
    fn transaction_id_is_twenty_bytes_hex() {
        let signed = sign_transaction(&sample_tx(), &chain(), &[]).unwrap();
        assert_eq!(signed.id().unwrap().len(), 40);
        assert!(signed.signatures.is_empty());
    }
}

//! Signed ledger transactions.

use crate::crypto::{Address, Keypair, Signature};
use crate::hash::{FieldHasher, Hash};
use serde::{Deserialize, Serialize};

const TX_DOMAIN: &[u8] = b"docketchain/transaction/v1";

/// Reference to the schema a payload claims to conform to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaRef(pub String);

impl SchemaRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque payload bytes plus the schema they are checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub schema: SchemaRef,
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(schema: SchemaRef, data: Vec<u8>) -> Self {
        Self { schema, data }
    }
}

/// A signed unit of work submitted to a ledger.
///
/// `id` is the content hash of every field except `id` and `signature`, and is
/// what the sender signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub ledger_id: String,
    pub sender: Address,
    pub recipient: Option<Address>,
    pub payload: Payload,
    /// Unix timestamp in milliseconds, set by the submitter.
    pub timestamp: u64,
    pub signature: Signature,
    /// Previous transaction in the same sender's history.
    pub previous_tx_id: Option<Hash>,
}

impl Transaction {
    /// Create an unsigned transaction with its content id filled in.
    pub fn new(
        ledger_id: impl Into<String>,
        sender: Address,
        recipient: Option<Address>,
        payload: Payload,
        timestamp: u64,
        previous_tx_id: Option<Hash>,
    ) -> Self {
        let mut tx = Self {
            id: Hash::ZERO,
            ledger_id: ledger_id.into(),
            sender,
            recipient,
            payload,
            timestamp,
            signature: Signature::default(),
            previous_tx_id,
        };
        tx.id = tx.content_hash();
        tx
    }

    /// Recompute the content hash from the current field values.
    pub fn content_hash(&self) -> Hash {
        let mut h = FieldHasher::new(TX_DOMAIN);
        h.str(&self.ledger_id)
            .str(self.sender.as_str())
            .optional(self.recipient.as_ref(), |h, r| {
                h.str(r.as_str());
            })
            .str(self.payload.schema.as_str())
            .bytes(&self.payload.data)
            .u64(self.timestamp)
            .optional(self.previous_tx_id.as_ref(), |h, p| {
                h.hash(p);
            });
        h.finish()
    }

    /// True when `id` matches the content.
    pub fn has_valid_id(&self) -> bool {
        self.id == self.content_hash()
    }

    /// Sign the transaction id.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign_hash(&self.id);
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Encoded size in bytes, used for mempool and docket size accounting.
    pub fn size_bytes(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }
}

//! Dockets: hash-linked batches of transactions.

use crate::crypto::Address;
use crate::hash::{FieldHasher, Hash};
use crate::transaction::Transaction;
use crate::vote::ConsensusVote;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const DOCKET_DOMAIN: &[u8] = b"docketchain/docket/v1";

/// `previous_hash` carried by every genesis docket.
pub const GENESIS_PREVIOUS_HASH: Hash = Hash::ZERO;

/// Where a docket stands in the voting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsensusState {
    Pending,
    Approved,
    Rejected,
}

/// A block of transactions for one ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Docket {
    pub ledger_id: String,
    /// 0 for genesis, previous + 1 afterwards.
    pub sequence_number: u64,
    pub previous_hash: Hash,
    /// Content hash over every field except `hash`, `consensus_votes` and `consensus_state`.
    pub hash: Hash,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub builder: Address,
    pub transactions: Vec<Transaction>,
    pub is_genesis: bool,
    /// Free-form audit data. Genesis dockets carry their encoded `GenesisConfig`.
    pub metadata: Vec<u8>,
    pub consensus_votes: Vec<ConsensusVote>,
    pub consensus_state: ConsensusState,
}

impl Docket {
    /// Create an unhashed, pending docket. Call [`Docket::seal`] once all fields are final.
    pub fn new(
        ledger_id: impl Into<String>,
        sequence_number: u64,
        previous_hash: Hash,
        timestamp: u64,
        builder: Address,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            sequence_number,
            previous_hash,
            hash: Hash::ZERO,
            timestamp,
            builder,
            transactions,
            is_genesis: false,
            metadata: Vec::new(),
            consensus_votes: Vec::new(),
            consensus_state: ConsensusState::Pending,
        }
    }

    /// Deterministic content hash.
    ///
    /// Votes and consensus state are excluded: they are attached after the
    /// hash has been signed by voters.
    pub fn compute_hash(&self) -> Hash {
        let mut h = FieldHasher::new(DOCKET_DOMAIN);
        h.str(&self.ledger_id)
            .u64(self.sequence_number)
            .hash(&self.previous_hash)
            .u64(self.timestamp)
            .str(self.builder.as_str())
            .u64(self.transactions.len() as u64);
        for tx in &self.transactions {
            h.hash(&tx.id);
        }
        h.bool(self.is_genesis).bytes(&self.metadata);
        h.finish()
    }

    /// Fill in `hash` from the current contents.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn sealed(mut self) -> Self {
        self.seal();
        self
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transaction_ids(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }

    pub fn is_approved(&self) -> bool {
        self.consensus_state == ConsensusState::Approved
    }

    /// Encoded size in bytes.
    pub fn size_bytes(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

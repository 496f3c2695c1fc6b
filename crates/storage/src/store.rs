//! The docket storage port and an in-memory implementation.

use crate::db::{Result, StorageError};
use async_trait::async_trait;
use docketchain_core::{Docket, Hash};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Durable storage for confirmed dockets.
///
/// Only approved dockets are stored, and each ledger's dockets form a single
/// gap-free hash chain starting at genesis.
#[async_trait]
pub trait DocketStore: Send + Sync {
    /// The highest-sequence docket of a ledger.
    async fn latest_docket(&self, ledger_id: &str) -> Result<Option<Docket>>;

    async fn docket_at(&self, ledger_id: &str, sequence: u64) -> Result<Option<Docket>>;

    async fn genesis_docket(&self, ledger_id: &str) -> Result<Option<Docket>> {
        self.docket_at(ledger_id, 0).await
    }

    /// Append an approved docket to its ledger.
    ///
    /// Re-persisting the docket already stored at that sequence is a no-op.
    /// Anything that would fork or gap the chain is a `ChainConflict`.
    async fn persist_docket(&self, docket: &Docket) -> Result<()>;

    /// The subset of `ids` already confirmed in the ledger.
    async fn confirmed_among(&self, ledger_id: &str, ids: &[Hash]) -> Result<HashSet<Hash>>;

    /// Every ledger that has at least a genesis docket.
    async fn ledgers(&self) -> Result<Vec<String>>;
}

/// What appending `docket` onto `head` would do.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Append {
    Extend,
    AlreadyStored,
}

/// Check that `docket` may be appended after `head`.
///
/// `existing` is the docket already stored at `docket.sequence_number`, if any.
pub(crate) fn check_append(
    head: Option<&Docket>,
    existing: Option<&Docket>,
    docket: &Docket,
) -> Result<Append> {
    let conflict = |reason: String| StorageError::ChainConflict {
        ledger_id: docket.ledger_id.clone(),
        sequence: docket.sequence_number,
        reason,
    };

    if !docket.is_approved() {
        return Err(StorageError::NotApproved(docket.hash));
    }
    if let Some(existing) = existing {
        return if existing.hash == docket.hash {
            Ok(Append::AlreadyStored)
        } else {
            Err(conflict(format!(
                "sequence already holds docket {}",
                existing.hash
            )))
        };
    }

    match head {
        None if docket.is_genesis && docket.sequence_number == 0 => Ok(Append::Extend),
        None => Err(conflict("ledger has no genesis docket".into())),
        Some(head) => {
            if docket.sequence_number != head.sequence_number + 1 {
                return Err(conflict(format!(
                    "head is at sequence {}",
                    head.sequence_number
                )));
            }
            if docket.previous_hash != head.hash {
                return Err(conflict(format!(
                    "previous hash {} does not match head {}",
                    docket.previous_hash, head.hash
                )));
            }
            Ok(Append::Extend)
        }
    }
}

#[derive(Default)]
struct LedgerChain {
    dockets: Vec<Docket>,
    confirmed: HashSet<Hash>,
}

/// Volatile `DocketStore` for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDocketStore {
    ledgers: RwLock<HashMap<String, LedgerChain>>,
}

impl MemoryDocketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dockets stored for a ledger.
    pub fn height(&self, ledger_id: &str) -> usize {
        self.ledgers
            .read()
            .get(ledger_id)
            .map_or(0, |chain| chain.dockets.len())
    }
}

#[async_trait]
impl DocketStore for MemoryDocketStore {
    async fn latest_docket(&self, ledger_id: &str) -> Result<Option<Docket>> {
        Ok(self
            .ledgers
            .read()
            .get(ledger_id)
            .and_then(|chain| chain.dockets.last().cloned()))
    }

    async fn docket_at(&self, ledger_id: &str, sequence: u64) -> Result<Option<Docket>> {
        Ok(self
            .ledgers
            .read()
            .get(ledger_id)
            .and_then(|chain| chain.dockets.get(sequence as usize).cloned()))
    }

    async fn persist_docket(&self, docket: &Docket) -> Result<()> {
        let mut ledgers = self.ledgers.write();
        let chain = ledgers.entry(docket.ledger_id.clone()).or_default();

        let existing = chain.dockets.get(docket.sequence_number as usize);
        if check_append(chain.dockets.last(), existing, docket)? == Append::AlreadyStored {
            return Ok(());
        }

        chain
            .confirmed
            .extend(docket.transactions.iter().map(|tx| tx.id));
        chain.dockets.push(docket.clone());
        Ok(())
    }

    async fn confirmed_among(&self, ledger_id: &str, ids: &[Hash]) -> Result<HashSet<Hash>> {
        let ledgers = self.ledgers.read();
        let Some(chain) = ledgers.get(ledger_id) else {
            return Ok(HashSet::new());
        };
        Ok(ids
            .iter()
            .filter(|id| chain.confirmed.contains(id))
            .copied()
            .collect())
    }

    async fn ledgers(&self) -> Result<Vec<String>> {
        let mut ids: Vec<_> = self
            .ledgers
            .read()
            .iter()
            .filter(|(_, chain)| !chain.dockets.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

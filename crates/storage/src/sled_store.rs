//! sled-backed docket store.

use crate::db::{BatchOp, Result, Storage};
use crate::store::{check_append, Append, DocketStore};
use async_trait::async_trait;
use docketchain_core::{Docket, Hash};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Persists dockets in sled.
///
/// Layout per ledger:
/// - `docket:{ledger}{seq}` → docket
/// - `head:{ledger}` → head sequence
/// - `tx:{ledger}{tx_id}` → sequence of the confirming docket
pub struct SledDocketStore {
    storage: Storage,
    /// Serializes the read-check-write of `persist_docket`.
    write_lock: Mutex<()>,
}

impl SledDocketStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_storage(Storage::open(path)?))
    }

    pub fn open_temporary() -> Result<Self> {
        Ok(Self::with_storage(Storage::open_temporary()?))
    }

    pub fn with_storage(storage: Storage) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }

    fn head_sequence(&self, ledger_id: &str) -> Result<Option<u64>> {
        self.storage.get(Storage::head_key(ledger_id))
    }

    fn load(&self, ledger_id: &str, sequence: u64) -> Result<Option<Docket>> {
        self.storage.get(Storage::docket_key(ledger_id, sequence))
    }

    fn load_head(&self, ledger_id: &str) -> Result<Option<Docket>> {
        match self.head_sequence(ledger_id)? {
            Some(seq) => self.load(ledger_id, seq),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocketStore for SledDocketStore {
    async fn latest_docket(&self, ledger_id: &str) -> Result<Option<Docket>> {
        self.load_head(ledger_id)
    }

    async fn docket_at(&self, ledger_id: &str, sequence: u64) -> Result<Option<Docket>> {
        self.load(ledger_id, sequence)
    }

    async fn persist_docket(&self, docket: &Docket) -> Result<()> {
        let _guard = self.write_lock.lock();
        let ledger = docket.ledger_id.as_str();

        let head = self.load_head(ledger)?;
        let existing = self.load(ledger, docket.sequence_number)?;
        if check_append(head.as_ref(), existing.as_ref(), docket)? == Append::AlreadyStored {
            return Ok(());
        }

        let seq = docket.sequence_number;
        let mut ops = Vec::with_capacity(docket.transactions.len() + 2);
        ops.push(BatchOp::insert(Storage::docket_key(ledger, seq), docket)?);
        ops.push(BatchOp::insert(Storage::head_key(ledger), &seq)?);
        for tx in &docket.transactions {
            ops.push(BatchOp::insert(Storage::tx_index_key(ledger, &tx.id), &seq)?);
        }
        self.storage.batch(ops)?;

        debug!(ledger, sequence = seq, hash = %docket.hash, "docket persisted");
        Ok(())
    }

    async fn confirmed_among(&self, ledger_id: &str, ids: &[Hash]) -> Result<HashSet<Hash>> {
        let mut found = HashSet::new();
        for id in ids {
            if self.storage.contains(Storage::tx_index_key(ledger_id, id))? {
                found.insert(*id);
            }
        }
        Ok(found)
    }

    async fn ledgers(&self) -> Result<Vec<String>> {
        let prefix = Storage::head_prefix();
        self.storage
            .keys_with_prefix(prefix)?
            .into_iter()
            .filter_map(|key| {
                // head:{u32 len}{ledger}
                let rest = key.get(prefix.len() + 4..)?;
                String::from_utf8(rest.to_vec()).ok()
            })
            .map(Ok)
            .collect()
    }
}

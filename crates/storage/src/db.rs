//! sled access layer for docket records and their ledger-scoped keys.

use docketchain_core::Hash;
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The docket does not extend the stored chain head.
    #[error("Chain conflict on ledger {ledger_id} at sequence {sequence}: {reason}")]
    ChainConflict {
        ledger_id: String,
        sequence: u64,
        reason: String,
    },

    #[error("Docket {0} has not been approved")]
    NotApproved(Hash),

    /// Transient backend failure; callers may retry.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Database(_) | StorageError::Unavailable(_))
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// bincode-encoded values over a sled tree.
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open or create the database directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory database, discarded on drop.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Encode `value` with bincode and write it under `key`.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Read and decode the value under `key`.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// Keys starting with `prefix`, in byte order.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.db
            .scan_prefix(prefix)
            .keys()
            .map(|k| k.map(|k| k.to_vec()).map_err(StorageError::from))
            .collect()
    }

    /// Apply multiple operations atomically through sled's `apply_batch`.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Block until buffered writes reach disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================
    //
    // Every key is scoped by ledger: `{tag}:` + u32 BE ledger length + ledger
    // bytes, so one ledger id can never be a prefix of another's keys.

    fn ledger_prefix(tag: &[u8], ledger_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(tag.len() + 5 + ledger_id.len());
        key.extend_from_slice(tag);
        key.push(b':');
        key.extend_from_slice(&(ledger_id.len() as u32).to_be_bytes());
        key.extend_from_slice(ledger_id.as_bytes());
        key
    }

    /// Docket by sequence. Sequence is big-endian so scans run in chain order.
    pub fn docket_key(ledger_id: &str, sequence: u64) -> Vec<u8> {
        let mut key = Self::ledger_prefix(b"docket", ledger_id);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    /// Sequence number of the ledger's head docket.
    pub fn head_key(ledger_id: &str) -> Vec<u8> {
        Self::ledger_prefix(b"head", ledger_id)
    }

    /// Confirmed transaction id, mapped to the sequence of the docket holding it.
    pub fn tx_index_key(ledger_id: &str, tx_id: &Hash) -> Vec<u8> {
        let mut key = Self::ledger_prefix(b"tx", ledger_id);
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    /// Prefix shared by every head key.
    pub fn head_prefix() -> &'static [u8] {
        b"head:"
    }
}

/// One write in an atomic batch.
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    pub fn insert<V: serde::Serialize>(key: Vec<u8>, value: &V) -> Result<Self> {
        Ok(BatchOp::Insert {
            key,
            value: bincode::serialize(value)?,
        })
    }
}

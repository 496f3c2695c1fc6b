//! Per-ledger pools of pending transactions.
//!
//! Each ledger has its own bounded FIFO pool behind its own mutex, so
//! submissions for one ledger never wait on another ledger's builder.
//! Transactions leave a pool when a docket including them is confirmed, when
//! they expire, or when they are explicitly removed.

use crate::clock::Clock;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use docketchain_core::{ErrorCode, Hash, Transaction};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Reasons a transaction is refused by the pool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("mempool for ledger {ledger_id} is full (capacity: {capacity})")]
    Full { ledger_id: String, capacity: usize },

    #[error("transaction {0} already in mempool")]
    Duplicate(Hash),

    #[error("transaction {0} has expired")]
    Expired(Hash),

    #[error("transaction targets ledger {found}, not {expected}")]
    WrongLedger { expected: String, found: String },
}

impl MempoolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MempoolError::Full { .. } => ErrorCode::Capacity,
            MempoolError::Duplicate(_) => ErrorCode::Replay,
            MempoolError::Expired(_) => ErrorCode::Expiration,
            MempoolError::WrongLedger { .. } => ErrorCode::Structural,
        }
    }
}

pub type Result<T> = std::result::Result<T, MempoolError>;

/// Configuration for the mempool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum pending transactions per ledger.
    pub capacity: usize,
    /// Lifetime of a transaction, counted from its own timestamp.
    pub default_ttl_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            default_ttl_ms: 60 * 60 * 1000,
        }
    }
}

/// A pending transaction and its bookkeeping.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub transaction: Transaction,
    pub received_at_ms: u64,
    pub expires_at_ms: u64,
    pub size_bytes: u64,
}

impl MempoolEntry {
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.received_at_ms as i64)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Pool statistics for one ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MempoolStats {
    pub total: usize,
    pub size_bytes: u64,
    pub oldest_received_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct LedgerPool {
    /// Insertion order.
    order: VecDeque<Hash>,
    entries: HashMap<Hash, MempoolEntry>,
    size_bytes: u64,
}

impl LedgerPool {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, entry: MempoolEntry) {
        let id = entry.transaction.id;
        self.size_bytes += entry.size_bytes;
        self.order.push_back(id);
        self.entries.insert(id, entry);
    }

    fn remove_where(&mut self, mut doomed: impl FnMut(&MempoolEntry) -> bool) -> usize {
        let before = self.entries.len();
        let entries = &mut self.entries;
        let size_bytes = &mut self.size_bytes;
        self.order.retain(|id| match entries.get(id) {
            Some(entry) if doomed(entry) => {
                *size_bytes -= entry.size_bytes;
                entries.remove(id);
                false
            }
            Some(_) => true,
            None => false,
        });
        before - self.entries.len()
    }
}

/// Concurrent, per-ledger transaction pools.
pub struct MemPoolManager {
    config: MempoolConfig,
    clock: Arc<dyn Clock>,
    pools: RwLock<HashMap<String, Arc<Mutex<LedgerPool>>>>,
    metrics: Option<Metrics>,
}

impl MemPoolManager {
    pub fn new(config: MempoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            pools: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    fn pool(&self, ledger_id: &str) -> Option<Arc<Mutex<LedgerPool>>> {
        self.pools.read().get(ledger_id).cloned()
    }

    fn pool_or_create(&self, ledger_id: &str) -> Arc<Mutex<LedgerPool>> {
        if let Some(pool) = self.pool(ledger_id) {
            return pool;
        }
        self.pools
            .write()
            .entry(ledger_id.to_string())
            .or_default()
            .clone()
    }

    fn publish(&self, ledger_id: &str, pool: &LedgerPool) {
        if let Some(metrics) = &self.metrics {
            metrics.set_mempool(ledger_id, pool.len(), pool.size_bytes);
        }
    }

    /// Add a transaction, returning the pool size after insertion.
    ///
    /// When the pool is full, expired entries are evicted first; the
    /// transaction is refused only if the pool is still full afterwards.
    pub fn add(&self, ledger_id: &str, tx: Transaction) -> Result<usize> {
        if tx.ledger_id != ledger_id {
            return Err(MempoolError::WrongLedger {
                expected: ledger_id.to_string(),
                found: tx.ledger_id,
            });
        }

        let now = self.clock.now_millis();
        let expires_at_ms = tx.timestamp.saturating_add(self.config.default_ttl_ms);
        if expires_at_ms <= now {
            return Err(MempoolError::Expired(tx.id));
        }

        let pool = self.pool_or_create(ledger_id);
        let mut pool = pool.lock();

        if pool.entries.contains_key(&tx.id) {
            return Err(MempoolError::Duplicate(tx.id));
        }
        if pool.len() >= self.config.capacity {
            let evicted = pool.remove_where(|entry| entry.is_expired(now));
            if evicted > 0 {
                debug!(ledger = ledger_id, evicted, "evicted expired transactions under pressure");
            }
            if pool.len() >= self.config.capacity {
                return Err(MempoolError::Full {
                    ledger_id: ledger_id.to_string(),
                    capacity: self.config.capacity,
                });
            }
        }

        let size_bytes = tx.size_bytes();
        pool.insert(MempoolEntry {
            transaction: tx,
            received_at_ms: now,
            expires_at_ms,
            size_bytes,
        });
        self.publish(ledger_id, &pool);
        Ok(pool.len())
    }

    /// Up to `max_count` oldest unexpired transactions. Nothing is removed.
    pub fn take_pending(&self, ledger_id: &str, max_count: usize) -> Vec<Transaction> {
        let Some(pool) = self.pool(ledger_id) else {
            return Vec::new();
        };
        let now = self.clock.now_millis();
        let pool = pool.lock();
        pool.order
            .iter()
            .filter_map(|id| pool.entries.get(id))
            .filter(|entry| !entry.is_expired(now))
            .take(max_count)
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    /// Remove the given ids, returning how many were present.
    pub fn remove(&self, ledger_id: &str, ids: &[Hash]) -> usize {
        let Some(pool) = self.pool(ledger_id) else {
            return 0;
        };
        let ids: HashSet<&Hash> = ids.iter().collect();
        let mut pool = pool.lock();
        let removed = pool.remove_where(|entry| ids.contains(&entry.transaction.id));
        self.publish(ledger_id, &pool);
        removed
    }

    /// Drop every entry whose expiry has passed.
    pub fn evict_expired(&self, ledger_id: &str) -> usize {
        let Some(pool) = self.pool(ledger_id) else {
            return 0;
        };
        let now = self.clock.now_millis();
        let mut pool = pool.lock();
        let evicted = pool.remove_where(|entry| entry.is_expired(now));
        if evicted > 0 {
            debug!(ledger = ledger_id, evicted, "evicted expired transactions");
        }
        self.publish(ledger_id, &pool);
        evicted
    }

    pub fn stats(&self, ledger_id: &str) -> MempoolStats {
        let Some(pool) = self.pool(ledger_id) else {
            return MempoolStats::default();
        };
        let pool = pool.lock();
        MempoolStats {
            total: pool.len(),
            size_bytes: pool.size_bytes,
            oldest_received_at: pool
                .order
                .front()
                .and_then(|id| pool.entries.get(id))
                .and_then(MempoolEntry::received_at),
        }
    }

    pub fn len(&self, ledger_id: &str) -> usize {
        self.pool(ledger_id).map_or(0, |pool| pool.lock().len())
    }

    pub fn contains(&self, ledger_id: &str, id: &Hash) -> bool {
        self.pool(ledger_id)
            .is_some_and(|pool| pool.lock().entries.contains_key(id))
    }

    /// Ledgers that have ever received a transaction.
    pub fn ledgers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.pools.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

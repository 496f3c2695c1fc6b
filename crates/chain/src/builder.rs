//! Candidate docket assembly.

use crate::clock::Clock;
use crate::mempool::MemPoolManager;
use crate::metrics::Metrics;
use docketchain_consensus::{
    ChainValidator, GenesisError, GenesisManager, TransactionRules, TransactionValidator,
    ValidationContext,
};
use docketchain_core::{
    Address, Docket, ErrorCode, GenesisConfig, Hash, Transaction, ValidationFailure,
};
use docketchain_storage::{DocketStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while building a docket.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no eligible transactions for ledger {ledger_id} ({rejected} rejected)")]
    NoEligibleTransactions { ledger_id: String, rejected: usize },

    #[error("{builder} is not a validator of ledger {ledger_id}")]
    Unauthorized { ledger_id: String, builder: Address },

    #[error("genesis docket of ledger {0} does not carry a readable config")]
    UnreadableGenesis(String),

    /// The candidate failed its own chain-link check.
    #[error("candidate breaks chain integrity: {0}")]
    ChainIntegrity(ValidationFailure),

    #[error("genesis error: {0}")]
    Genesis(#[from] GenesisError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BuildError {
    /// Whether retrying the build could succeed without outside intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, BuildError::Storage(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Configuration for docket building.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Upper bound on transactions per docket.
    pub max_transactions: usize,
    /// Build a docket even when no transaction passes validation.
    pub allow_empty: bool,
    pub max_clock_skew_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        let rules = TransactionRules::default();
        Self {
            max_transactions: 100,
            allow_empty: false,
            max_clock_skew_ms: rules.max_clock_skew_ms,
            max_payload_bytes: rules.max_payload_bytes,
        }
    }
}

impl BuilderConfig {
    pub fn rules(&self) -> TransactionRules {
        TransactionRules {
            max_clock_skew_ms: self.max_clock_skew_ms,
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

/// A transaction left out of a docket, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub tx_id: Hash,
    pub failure: ValidationFailure,
}

impl Rejection {
    pub fn code(&self) -> ErrorCode {
        self.failure.primary_code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMetrics {
    pub processed: usize,
    pub included: usize,
    pub rejected: usize,
    pub elapsed: Duration,
    pub size_bytes: u64,
}

/// A pending candidate docket plus what went into it.
#[derive(Debug, Clone)]
pub struct BuiltDocket {
    pub docket: Docket,
    /// The confirmed docket the candidate extends.
    pub previous: Docket,
    pub metrics: BuildMetrics,
    pub rejections: Vec<Rejection>,
}

/// Assembles candidate dockets from the mempool.
pub struct DocketBuilder {
    mempool: Arc<MemPoolManager>,
    validator: Arc<TransactionValidator>,
    store: Arc<dyn DocketStore>,
    clock: Arc<dyn Clock>,
    config: BuilderConfig,
    metrics: Option<Metrics>,
}

impl DocketBuilder {
    pub fn new(
        mempool: Arc<MemPoolManager>,
        validator: Arc<TransactionValidator>,
        store: Arc<dyn DocketStore>,
        clock: Arc<dyn Clock>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            mempool,
            validator,
            store,
            clock,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Build a genesis docket from `config` at the current time.
    pub fn build_genesis(&self, config: &GenesisConfig) -> Result<Docket> {
        Ok(GenesisManager::create_genesis_at(
            config,
            self.clock.now_millis(),
        )?)
    }

    /// Validator set recorded in a ledger's genesis docket.
    pub async fn validator_set(&self, ledger_id: &str) -> Result<Option<BTreeSet<Address>>> {
        match self.store.genesis_docket(ledger_id).await? {
            Some(genesis) => GenesisManager::config_of(&genesis)
                .map(|config| Some(config.initial_validators))
                .ok_or_else(|| BuildError::UnreadableGenesis(ledger_id.to_string())),
            None => Ok(None),
        }
    }

    /// Build the next candidate docket for `ledger_id`.
    ///
    /// Pending transactions that fail validation are left out and reported
    /// in `rejections`. A ledger with no stored dockets gets a genesis docket
    /// created and persisted first, with `builder` as its creator and only
    /// validator.
    pub async fn build_docket(
        &self,
        ledger_id: &str,
        builder: &Address,
        max_transactions: usize,
    ) -> Result<BuiltDocket> {
        let started = Instant::now();
        let max_transactions = max_transactions.min(self.config.max_transactions);

        let previous = self.store.latest_docket(ledger_id).await?;
        if previous.is_some() {
            let validators = self.validator_set(ledger_id).await?.unwrap_or_default();
            if !validators.contains(builder) {
                return Err(BuildError::Unauthorized {
                    ledger_id: ledger_id.to_string(),
                    builder: builder.clone(),
                });
            }
        }

        self.mempool.evict_expired(ledger_id);
        let pending = self.mempool.take_pending(ledger_id, max_transactions);

        let now = self.clock.now_millis();
        let ids: Vec<Hash> = pending.iter().map(|tx| tx.id).collect();
        let confirmed = self.store.confirmed_among(ledger_id, &ids).await?;
        let ctx = ValidationContext::new(ledger_id, now).with_confirmed(confirmed);

        let (included, rejections) = self.partition(pending, &ctx);
        if included.is_empty() && !self.config.allow_empty {
            return Err(BuildError::NoEligibleTransactions {
                ledger_id: ledger_id.to_string(),
                rejected: rejections.len(),
            });
        }

        let previous = match previous {
            Some(previous) => previous,
            None => self.bootstrap_ledger(ledger_id, builder).await?,
        };

        let mut docket = Docket::new(
            ledger_id,
            previous.sequence_number + 1,
            previous.hash,
            now.max(previous.timestamp),
            builder.clone(),
            included,
        );
        docket.hash = ChainValidator::compute_hash(&docket);

        if let Err(failure) = ChainValidator::validate_chain_link(&docket, &previous) {
            warn!(ledger = ledger_id, %failure, "candidate failed self-check");
            return Err(BuildError::ChainIntegrity(failure));
        }

        let metrics = BuildMetrics {
            processed: ids.len(),
            included: docket.tx_count(),
            rejected: rejections.len(),
            elapsed: started.elapsed(),
            size_bytes: docket.size_bytes(),
        };
        if let Some(m) = &self.metrics {
            let codes: Vec<_> = rejections.iter().map(Rejection::code).collect();
            m.record_build(metrics.elapsed, &codes);
        }

        info!(
            ledger = ledger_id,
            sequence = docket.sequence_number,
            hash = %docket.hash,
            included = metrics.included,
            rejected = metrics.rejected,
            "built candidate docket"
        );
        Ok(BuiltDocket {
            docket,
            previous,
            metrics,
            rejections,
        })
    }

    fn partition(
        &self,
        pending: Vec<Transaction>,
        ctx: &ValidationContext,
    ) -> (Vec<Transaction>, Vec<Rejection>) {
        let results = self.validator.validate_batch(&pending, ctx);
        let mut included = Vec::with_capacity(pending.len());
        let mut rejections = Vec::new();
        for (tx, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => included.push(tx),
                Err(failure) => {
                    debug!(tx = %tx.id, code = %failure.primary_code(), "excluding transaction");
                    rejections.push(Rejection {
                        tx_id: tx.id,
                        failure,
                    });
                }
            }
        }
        (included, rejections)
    }

    async fn bootstrap_ledger(&self, ledger_id: &str, builder: &Address) -> Result<Docket> {
        let config = GenesisConfig::new(ledger_id, builder.clone(), [builder.clone()]);
        let genesis = self.build_genesis(&config)?;
        self.store.persist_docket(&genesis).await?;
        info!(ledger = ledger_id, creator = %builder, "created genesis docket");
        Ok(genesis)
    }
}

//! Per-ledger validation loops and the validator's public API.
//!
//! Each started ledger gets one tokio task that repeatedly builds a docket,
//! puts it to a vote and, on approval, persists it and clears its
//! transactions from the mempool. Cycles for one ledger never overlap;
//! different ledgers run independently.
//!
//! A cycle can be abandoned by `stop` at any point before the vote is
//! decided. Once a docket is approved, its commit runs on its own task and
//! always completes; the ledger's next cycle and `stop` both wait for it.

use crate::builder::{BuildError, BuiltDocket, DocketBuilder};
use crate::clock::Clock;
use crate::config::{ConfigError, ValidatorConfig};
use crate::events::{EventBus, ValidatorEvent};
use crate::mempool::{MemPoolManager, MempoolError};
use crate::metrics::Metrics;
use crate::state::{LedgerCounters, LedgerState, LedgerStatus};
use chrono::{DateTime, Utc};
use docketchain_consensus::{
    review_docket, ConsensusEngine, ConsensusError, ConsensusOutcome, DocketVerdict,
    FailureReason, GenesisError, PeerBroadcast, SchemaValidator, SignatureVerifier,
    TransactionValidator, ValidationContext,
};
use docketchain_core::{Address, Docket, GenesisConfig, Hash, Transaction};
use docketchain_storage::{DocketStore, StorageError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("cannot {action} ledger {ledger_id} while {from}")]
    InvalidTransition {
        ledger_id: String,
        from: LedgerState,
        action: &'static str,
    },

    #[error("ledger {0} already has a genesis docket")]
    GenesisExists(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("genesis error: {0}")]
    Genesis(#[from] GenesisError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("commit task failed: {0}")]
    CommitTask(String),
}

impl OrchestratorError {
    /// Collaborator failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::Build(e) => e.is_transient(),
            OrchestratorError::Consensus(ConsensusError::Broadcast(_)) => true,
            OrchestratorError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// What one build-vote-commit cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing eligible to build.
    Idle,
    Committed { sequence: u64, transactions: usize },
    ConsensusFailed { sequence: u64, reason: FailureReason },
    /// The candidate was discarded; the next cycle starts fresh.
    Aborted { reason: String },
}

/// Outcome of submitting a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub tx_id: Hash,
    pub accepted: bool,
    pub mempool_size: usize,
    pub rejection: Option<MempoolError>,
}

/// Collaborators the orchestrator is wired to.
pub struct OrchestratorDeps {
    pub store: Arc<dyn DocketStore>,
    pub peers: Arc<dyn PeerBroadcast>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub schemas: Arc<dyn SchemaValidator>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop,
}

struct LedgerRecord {
    state: LedgerState,
    counters: LedgerCounters,
    last_error: Option<String>,
    updated_at_ms: u64,
    control: Option<watch::Sender<Control>>,
    task: Option<JoinHandle<()>>,
}

impl LedgerRecord {
    fn new(now_ms: u64) -> Self {
        Self {
            state: LedgerState::Stopped,
            counters: LedgerCounters::default(),
            last_error: None,
            updated_at_ms: now_ms,
            control: None,
            task: None,
        }
    }
}

struct Inner {
    config: ValidatorConfig,
    address: Address,
    mempool: Arc<MemPoolManager>,
    validator: Arc<TransactionValidator>,
    builder: DocketBuilder,
    engine: ConsensusEngine,
    store: Arc<dyn DocketStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    events: EventBus,
    records: RwLock<HashMap<String, LedgerRecord>>,
    cycle_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Coordinates mempool, builder, consensus and storage for every ledger.
#[derive(Clone)]
pub struct ValidatorOrchestrator {
    inner: Arc<Inner>,
}

impl ValidatorOrchestrator {
    pub fn new(config: ValidatorConfig, deps: OrchestratorDeps) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()?;

        let mempool = Arc::new(
            MemPoolManager::new(config.mempool.clone(), deps.clock.clone())
                .with_metrics(metrics.clone()),
        );
        let validator = Arc::new(
            TransactionValidator::new(deps.verifier.clone(), deps.schemas)
                .with_rules(config.builder.rules()),
        );
        let builder = DocketBuilder::new(
            mempool.clone(),
            validator.clone(),
            deps.store.clone(),
            deps.clock.clone(),
            config.builder.clone(),
        )
        .with_metrics(metrics.clone());
        let engine = ConsensusEngine::new(deps.peers, deps.verifier);

        Ok(Self {
            inner: Arc::new(Inner {
                address: config.orchestrator.address(),
                events: EventBus::new(config.orchestrator.event_buffer),
                config,
                mempool,
                validator,
                builder,
                engine,
                store: deps.store,
                clock: deps.clock,
                metrics,
                records: RwLock::new(HashMap::new()),
                cycle_locks: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn mempool(&self) -> &Arc<MemPoolManager> {
        &self.inner.mempool
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValidatorEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // API facade
    // =========================================================================

    /// Queue a transaction for its ledger.
    pub fn submit_transaction(&self, tx: Transaction) -> SubmitReceipt {
        let tx_id = tx.id;
        let ledger_id = tx.ledger_id.clone();
        match self.inner.mempool.add(&ledger_id, tx) {
            Ok(mempool_size) => SubmitReceipt {
                tx_id,
                accepted: true,
                mempool_size,
                rejection: None,
            },
            Err(e) => {
                warn!(ledger = %ledger_id, tx = %tx_id, error = %e, "transaction refused");
                SubmitReceipt {
                    tx_id,
                    accepted: false,
                    mempool_size: self.inner.mempool.len(&ledger_id),
                    rejection: Some(e),
                }
            }
        }
    }

    /// Build a candidate docket without putting it to a vote.
    pub async fn build_docket(
        &self,
        ledger_id: &str,
        builder: &Address,
        max_transactions: usize,
    ) -> Result<BuiltDocket> {
        Ok(self
            .inner
            .builder
            .build_docket(ledger_id, builder, max_transactions)
            .await?)
    }

    /// Review a docket received from a peer against local history.
    pub async fn validate_docket(&self, docket: &Docket) -> Result<DocketVerdict> {
        let started = Instant::now();
        let previous = match docket.sequence_number.checked_sub(1) {
            Some(seq) if !docket.is_genesis => {
                self.inner.store.docket_at(&docket.ledger_id, seq).await?
            }
            _ => None,
        };
        let confirmed = self
            .inner
            .store
            .confirmed_among(&docket.ledger_id, &docket.transaction_ids())
            .await?;
        let ctx = ValidationContext::new(docket.ledger_id.clone(), self.inner.clock.now_millis())
            .with_confirmed(confirmed);

        let verdict = review_docket(docket, previous.as_ref(), &self.inner.validator, &ctx);
        self.inner
            .metrics
            .record_validation(started.elapsed(), verdict.valid);
        Ok(verdict)
    }

    /// Create and persist the genesis docket of a new ledger.
    pub async fn create_genesis(&self, config: &GenesisConfig) -> Result<Docket> {
        if self
            .inner
            .store
            .genesis_docket(&config.ledger_id)
            .await?
            .is_some()
        {
            return Err(OrchestratorError::GenesisExists(config.ledger_id.clone()));
        }
        let genesis = self.inner.builder.build_genesis(config)?;
        self.inner.store.persist_docket(&genesis).await?;
        self.inner.metrics.record_persisted();
        self.inner.events.publish(ValidatorEvent::DocketPersisted {
            ledger_id: genesis.ledger_id.clone(),
            sequence: 0,
            hash: genesis.hash,
        });
        info!(ledger = %genesis.ledger_id, hash = %genesis.hash, "genesis created");
        Ok(genesis)
    }

    /// Run one build-vote-commit cycle now, outside the periodic loop.
    pub async fn run_cycle(&self, ledger_id: &str) -> Result<CycleOutcome> {
        self.inner.run_cycle(ledger_id).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a ledger's loop. Starting an active ledger is a no-op.
    pub async fn start(&self, ledger_id: &str) -> Result<LedgerState> {
        let (control, rx) = watch::channel(Control::Run);
        let (from, finished) = {
            let mut records = self.inner.records.write();
            let now = self.inner.clock.now_millis();
            let record = records
                .entry(ledger_id.to_string())
                .or_insert_with(|| LedgerRecord::new(now));
            match record.state {
                state if state.is_active() => return Ok(state),
                LedgerState::Stopping => {
                    return Err(OrchestratorError::InvalidTransition {
                        ledger_id: ledger_id.to_string(),
                        from: LedgerState::Stopping,
                        action: "start",
                    })
                }
                _ => {}
            }
            // Claim the ledger before the lock is released.
            let from = record.state;
            record.state = LedgerState::Starting;
            record.updated_at_ms = now;
            record.last_error = None;
            record.control = Some(control);
            (from, record.task.take())
        };
        self.inner.events.publish(ValidatorEvent::StateChanged {
            ledger_id: ledger_id.to_string(),
            from,
            to: LedgerState::Starting,
        });

        // A faulted loop has already exited.
        if let Some(task) = finished {
            let _ = task.await;
        }

        let task = tokio::spawn(ledger_loop(self.inner.clone(), ledger_id.to_string(), rx));
        if let Some(record) = self.inner.records.write().get_mut(ledger_id) {
            record.task = Some(task);
        }
        info!(ledger = ledger_id, "ledger loop started");
        Ok(LedgerState::Starting)
    }

    /// Pause after the in-flight cycle. Pausing a paused ledger is a no-op.
    pub async fn pause(&self, ledger_id: &str) -> Result<LedgerState> {
        let state = self.inner.state_of(ledger_id);
        match state {
            LedgerState::Pausing | LedgerState::Paused => Ok(state),
            LedgerState::Starting | LedgerState::Running => {
                self.inner.set_state(ledger_id, LedgerState::Pausing);
                self.inner.send_control(ledger_id, Control::Pause);
                Ok(LedgerState::Pausing)
            }
            from => Err(OrchestratorError::InvalidTransition {
                ledger_id: ledger_id.to_string(),
                from,
                action: "pause",
            }),
        }
    }

    /// Resume a paused ledger. Resuming a running ledger is a no-op.
    pub async fn resume(&self, ledger_id: &str) -> Result<LedgerState> {
        let state = self.inner.state_of(ledger_id);
        match state {
            LedgerState::Starting | LedgerState::Running => Ok(state),
            LedgerState::Pausing | LedgerState::Paused => {
                self.inner.set_state(ledger_id, LedgerState::Running);
                self.inner.send_control(ledger_id, Control::Run);
                Ok(LedgerState::Running)
            }
            from => Err(OrchestratorError::InvalidTransition {
                ledger_id: ledger_id.to_string(),
                from,
                action: "resume",
            }),
        }
    }

    /// Stop a ledger's loop and wait for it to exit. Stopping a stopped
    /// ledger is a no-op.
    pub async fn stop(&self, ledger_id: &str) -> Result<LedgerState> {
        let task = {
            let mut records = self.inner.records.write();
            let Some(record) = records.get_mut(ledger_id) else {
                return Ok(LedgerState::Stopped);
            };
            if record.state == LedgerState::Stopped {
                return Ok(LedgerState::Stopped);
            }
            if let Some(control) = record.control.take() {
                let _ = control.send(Control::Stop);
            }
            record.task.take()
        };
        self.inner.set_state(ledger_id, LedgerState::Stopping);

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(ledger = ledger_id, error = %e, "ledger loop panicked");
            }
        }
        // Wait out a commit the loop left running.
        drop(self.inner.cycle_lock(ledger_id).lock_owned().await);
        self.inner.set_state(ledger_id, LedgerState::Stopped);
        info!(ledger = ledger_id, "ledger loop stopped");
        Ok(LedgerState::Stopped)
    }

    /// Stop every ledger.
    pub async fn shutdown(&self) {
        let ledgers: Vec<String> = self.inner.records.read().keys().cloned().collect();
        for ledger_id in ledgers {
            let _ = self.stop(&ledger_id).await;
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn status(&self, ledger_id: &str) -> Result<LedgerStatus> {
        let last_sequence = self
            .inner
            .store
            .latest_docket(ledger_id)
            .await?
            .map(|d| d.sequence_number);
        let mempool_size = self.inner.mempool.len(ledger_id);

        let records = self.inner.records.read();
        let (state, counters, last_error, updated_at_ms) = match records.get(ledger_id) {
            Some(r) => (r.state, r.counters.clone(), r.last_error.clone(), r.updated_at_ms),
            None => (
                LedgerState::Stopped,
                LedgerCounters::default(),
                None,
                self.inner.clock.now_millis(),
            ),
        };
        Ok(LedgerStatus {
            ledger_id: ledger_id.to_string(),
            state,
            last_sequence,
            mempool_size,
            counters,
            last_error,
            updated_at: DateTime::<Utc>::from_timestamp_millis(updated_at_ms as i64)
                .unwrap_or_default(),
        })
    }

    /// Status of every ledger known to the loop registry, mempool or store.
    pub async fn statuses(&self) -> Result<Vec<LedgerStatus>> {
        let mut ledgers: BTreeSet<String> = self.inner.records.read().keys().cloned().collect();
        ledgers.extend(self.inner.mempool.ledgers());
        ledgers.extend(self.inner.store.ledgers().await?);

        let mut statuses = Vec::with_capacity(ledgers.len());
        for ledger_id in ledgers {
            statuses.push(self.status(&ledger_id).await?);
        }
        Ok(statuses)
    }
}

// =============================================================================
// Cycle
// =============================================================================

impl Inner {
    fn state_of(&self, ledger_id: &str) -> LedgerState {
        self.records
            .read()
            .get(ledger_id)
            .map_or(LedgerState::Stopped, |r| r.state)
    }

    fn set_state(&self, ledger_id: &str, to: LedgerState) {
        self.transition(ledger_id, None, to);
    }

    /// Move to `to`, optionally only when the current state is in `from`.
    fn transition(&self, ledger_id: &str, from: Option<&[LedgerState]>, to: LedgerState) -> bool {
        let previous = {
            let mut records = self.records.write();
            let now = self.clock.now_millis();
            let record = records
                .entry(ledger_id.to_string())
                .or_insert_with(|| LedgerRecord::new(now));
            if from.is_some_and(|allowed| !allowed.contains(&record.state)) {
                return false;
            }
            let previous = record.state;
            record.state = to;
            record.updated_at_ms = now;
            previous
        };
        if previous != to {
            self.events.publish(ValidatorEvent::StateChanged {
                ledger_id: ledger_id.to_string(),
                from: previous,
                to,
            });
        }
        true
    }

    fn send_control(&self, ledger_id: &str, control: Control) {
        if let Some(sender) = self
            .records
            .read()
            .get(ledger_id)
            .and_then(|r| r.control.as_ref())
        {
            let _ = sender.send(control);
        }
    }

    fn update_counters(&self, ledger_id: &str, f: impl FnOnce(&mut LedgerCounters)) {
        let mut records = self.records.write();
        let now = self.clock.now_millis();
        let record = records
            .entry(ledger_id.to_string())
            .or_insert_with(|| LedgerRecord::new(now));
        f(&mut record.counters);
        record.updated_at_ms = now;
    }

    fn record_error(&self, ledger_id: &str, message: String) {
        if let Some(record) = self.records.write().get_mut(ledger_id) {
            record.last_error = Some(message);
        }
    }

    fn cycle_lock(&self, ledger_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.cycle_locks
            .lock()
            .entry(ledger_id.to_string())
            .or_default()
            .clone()
    }

    async fn run_cycle(self: &Arc<Self>, ledger_id: &str) -> Result<CycleOutcome> {
        // Held until the cycle ends, or moved into the commit task so an
        // abandoned cycle still blocks the next one until persistence finishes.
        let cycle = self.cycle_lock(ledger_id).lock_owned().await;
        self.update_counters(ledger_id, |c| c.cycles += 1);

        let built = match self
            .builder
            .build_docket(ledger_id, &self.address, self.config.builder.max_transactions)
            .await
        {
            Ok(built) => built,
            Err(BuildError::NoEligibleTransactions { rejected, .. }) => {
                // Everything pending was invalid; drop it so the pool drains.
                if rejected > 0 {
                    let stale = self.rejected_pending(ledger_id).await?;
                    self.mempool.remove(ledger_id, &stale);
                    self.update_counters(ledger_id, |c| {
                        c.transactions_rejected += stale.len() as u64
                    });
                }
                return Ok(CycleOutcome::Idle);
            }
            Err(BuildError::ChainIntegrity(failure)) => {
                error!(ledger = ledger_id, %failure, "candidate discarded");
                self.record_error(ledger_id, failure.to_string());
                return Ok(CycleOutcome::Aborted {
                    reason: failure.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let rejected: Vec<Hash> = built.rejections.iter().map(|r| r.tx_id).collect();
        self.mempool.remove(ledger_id, &rejected);
        self.update_counters(ledger_id, |c| {
            c.dockets_built += 1;
            c.transactions_rejected += rejected.len() as u64;
        });

        let mut docket = built.docket;
        self.events.publish(ValidatorEvent::DocketBuilt {
            ledger_id: ledger_id.to_string(),
            sequence: docket.sequence_number,
            hash: docket.hash,
            included: built.metrics.included,
            rejected: built.metrics.rejected,
        });

        let validators = self
            .builder
            .validator_set(ledger_id)
            .await?
            .unwrap_or_default();
        let started = Instant::now();
        let outcome = self
            .engine
            .seek_quorum(&mut docket, &validators, &self.config.consensus.params())
            .await?;

        match outcome {
            ConsensusOutcome::Achieved { tally } => {
                self.metrics.record_consensus(started.elapsed(), "achieved");
                self.events.publish(ValidatorEvent::ConsensusAchieved {
                    ledger_id: ledger_id.to_string(),
                    sequence: docket.sequence_number,
                    hash: docket.hash,
                    approvals: tally.approvals,
                    received: tally.received(),
                });

                let sequence = docket.sequence_number;
                let transactions = docket.tx_count();
                let inner = self.clone();
                let ledger = ledger_id.to_string();
                tokio::spawn(async move {
                    let _cycle = cycle;
                    inner.commit(&ledger, docket).await
                })
                    .await
                    .map_err(|e| OrchestratorError::CommitTask(e.to_string()))??;

                Ok(CycleOutcome::Committed {
                    sequence,
                    transactions,
                })
            }
            ConsensusOutcome::Failed { tally, reason } => {
                self.metrics
                    .record_consensus(started.elapsed(), reason.code().as_str());
                self.update_counters(ledger_id, |c| c.consensus_failures += 1);
                warn!(
                    ledger = ledger_id,
                    sequence = docket.sequence_number,
                    approvals = tally.approvals,
                    received = tally.received(),
                    code = %reason.code(),
                    "consensus failed; transactions stay pending"
                );
                self.events.publish(ValidatorEvent::ConsensusFailed {
                    ledger_id: ledger_id.to_string(),
                    sequence: docket.sequence_number,
                    hash: docket.hash,
                    reason,
                });
                Ok(CycleOutcome::ConsensusFailed {
                    sequence: docket.sequence_number,
                    reason,
                })
            }
        }
    }

    /// Ids of pending transactions that fail validation right now.
    async fn rejected_pending(&self, ledger_id: &str) -> Result<Vec<Hash>> {
        let pending = self
            .mempool
            .take_pending(ledger_id, self.config.builder.max_transactions);
        let ids: Vec<Hash> = pending.iter().map(|tx| tx.id).collect();
        let confirmed = self.store.confirmed_among(ledger_id, &ids).await?;
        let ctx = ValidationContext::new(ledger_id, self.clock.now_millis()).with_confirmed(confirmed);
        Ok(pending
            .iter()
            .zip(self.validator.validate_batch(&pending, &ctx))
            .filter(|(_, result)| result.is_err())
            .map(|(tx, _)| tx.id)
            .collect())
    }

    async fn commit(&self, ledger_id: &str, docket: Docket) -> Result<()> {
        self.store.persist_docket(&docket).await?;
        let ids = docket.transaction_ids();
        self.mempool.remove(ledger_id, &ids);
        self.metrics.record_persisted();
        self.update_counters(ledger_id, |c| {
            c.dockets_confirmed += 1;
            c.transactions_confirmed += ids.len() as u64;
        });
        info!(
            ledger = ledger_id,
            sequence = docket.sequence_number,
            hash = %docket.hash,
            transactions = ids.len(),
            "docket committed"
        );
        self.events.publish(ValidatorEvent::DocketPersisted {
            ledger_id: ledger_id.to_string(),
            sequence: docket.sequence_number,
            hash: docket.hash,
        });
        Ok(())
    }

    /// Run a cycle, retrying transient collaborator failures with backoff.
    async fn cycle_with_retry(self: &Arc<Self>, ledger_id: &str) -> Result<CycleOutcome> {
        let policy = &self.config.orchestrator.retry;
        let mut attempt = 1;
        loop {
            match self.run_cycle(ledger_id).await {
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        ledger = ledger_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "cycle failed; retrying"
                    );
                    self.update_counters(ledger_id, |c| c.retries += 1);
                    self.record_error(ledger_id, e.to_string());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn fault(&self, ledger_id: &str, error: &OrchestratorError) {
        error!(ledger = ledger_id, %error, "ledger loop faulted");
        self.record_error(ledger_id, error.to_string());
        self.transition(
            ledger_id,
            Some(&[
                LedgerState::Starting,
                LedgerState::Running,
                LedgerState::Pausing,
                LedgerState::Paused,
            ]),
            LedgerState::Error,
        );
        self.events.publish(ValidatorEvent::LedgerFaulted {
            ledger_id: ledger_id.to_string(),
            error: error.to_string(),
        });
    }
}

async fn wait_for_stop(control: &mut watch::Receiver<Control>) {
    loop {
        if *control.borrow_and_update() == Control::Stop {
            return;
        }
        if control.changed().await.is_err() {
            return;
        }
    }
}

async fn ledger_loop(inner: Arc<Inner>, ledger_id: String, mut control: watch::Receiver<Control>) {
    inner.transition(&ledger_id, Some(&[LedgerState::Starting]), LedgerState::Running);

    let mut ticker = tokio::time::interval(inner.config.orchestrator.cycle_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The sender is dropped once `stop` has claimed the ledger.
        if control.has_changed().is_err() {
            break;
        }
        let current = *control.borrow_and_update();
        match current {
            Control::Stop => break,
            Control::Pause => {
                inner.transition(&ledger_id, Some(&[LedgerState::Pausing]), LedgerState::Paused);
                if control.changed().await.is_err() {
                    break;
                }
                continue;
            }
            Control::Run => {}
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let mut stop_signal = control.clone();
        let result = tokio::select! {
            biased;
            _ = wait_for_stop(&mut stop_signal) => {
                info!(ledger = %ledger_id, "abandoning in-flight cycle");
                break;
            }
            result = inner.cycle_with_retry(&ledger_id) => result,
        };

        if let Err(e) = result {
            inner.fault(&ledger_id, &e);
            return;
        }
    }
}

use async_trait::async_trait;
use docketchain_chain::{
    CycleOutcome, InProcessPeers, LedgerState, ManualClock, MempoolError, OrchestratorDeps,
    ValidatorConfig, ValidatorEvent, ValidatorOrchestrator,
};
use docketchain_consensus::{
    ConsensusEngine, JsonSchemaRegistry, KeyRegistry, PeerBroadcast, PeerError, QuorumParams,
    TransactionValidator, VoteStream, Voter,
};
use docketchain_core::{
    Address, ConsensusState, Docket, ErrorCode, GenesisConfig, Hash, Keypair, Payload, SchemaRef,
    Transaction,
};
use docketchain_storage::{DocketStore, MemoryDocketStore, StorageError};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const NOW: u64 = 1_700_000_000_000;
const WAIT: Duration = Duration::from_secs(5);

struct Node {
    orchestrator: ValidatorOrchestrator,
    clock: Arc<ManualClock>,
    keys: Arc<KeyRegistry>,
    peers: Arc<InProcessPeers>,
    validator: Arc<TransactionValidator>,
    alice: Keypair,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

fn config() -> ValidatorConfig {
    let mut config = ValidatorConfig::default();
    config.orchestrator.node_address = "validator-A".into();
    config.orchestrator.cycle_interval_ms = 10;
    config.orchestrator.retry.max_attempts = 3;
    config.orchestrator.retry.initial_backoff_ms = 1;
    config.orchestrator.retry.max_backoff_ms = 5;
    config.consensus.vote_timeout_ms = 1_000;
    config
}

fn node_with(config: ValidatorConfig, store: Arc<dyn DocketStore>) -> Node {
    node_with_peers(config, store, |peers| peers as Arc<dyn PeerBroadcast>)
}

fn node_with_peers(
    config: ValidatorConfig,
    store: Arc<dyn DocketStore>,
    wrap: impl FnOnce(Arc<InProcessPeers>) -> Arc<dyn PeerBroadcast>,
) -> Node {
    init_tracing();
    let clock = Arc::new(ManualClock::new(NOW));
    let keys = Arc::new(KeyRegistry::new());
    let schemas = Arc::new(JsonSchemaRegistry::new());
    schemas.register(SchemaRef::new("note/v1"), ["text"]);
    let validator = Arc::new(TransactionValidator::new(keys.clone(), schemas.clone()));
    let peers = Arc::new(InProcessPeers::new(store.clone(), clock.clone()));

    let alice = Keypair::generate();
    keys.register(Address::new_unchecked("alice"), alice.public_key.clone());

    let orchestrator = ValidatorOrchestrator::new(
        config,
        OrchestratorDeps {
            store,
            peers: wrap(peers.clone()),
            verifier: keys.clone(),
            schemas,
            clock: clock.clone(),
        },
    )
    .unwrap();

    let node = Node {
        orchestrator,
        clock,
        keys,
        peers,
        validator,
        alice,
    };
    join(&node, "validator-A");
    node
}

fn node() -> Node {
    node_with(config(), Arc::new(MemoryDocketStore::new()))
}

fn join(node: &Node, name: &str) {
    let kp = Keypair::generate();
    let address = Address::new_unchecked(name);
    node.keys.register(address.clone(), kp.public_key.clone());
    node.peers
        .add_voter(Voter::new(address, kp, node.validator.clone()));
}

fn note(node: &Node, ledger_id: &str, text: &str) -> Transaction {
    Transaction::new(
        ledger_id,
        Address::new_unchecked("alice"),
        None,
        Payload::new(
            SchemaRef::new("note/v1"),
            format!(r#"{{"text":"{text}"}}"#).into_bytes(),
        ),
        NOW,
        None,
    )
    .signed(&node.alice)
}

fn validators(names: &[&str]) -> BTreeSet<Address> {
    names.iter().map(|n| Address::new_unchecked(*n)).collect()
}

async fn wait_for(
    rx: &mut broadcast::Receiver<ValidatorEvent>,
    matches: impl Fn(&ValidatorEvent) -> bool,
) -> ValidatorEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_build_and_approve_on_fresh_ledger() {
    let node = node();
    for name in ["validator-B", "validator-C"] {
        join(&node, name);
    }
    for n in 0..3 {
        let receipt = node
            .orchestrator
            .submit_transaction(note(&node, "ledger-1", &n.to_string()));
        assert!(receipt.accepted);
    }

    let built = node
        .orchestrator
        .build_docket("ledger-1", &Address::new_unchecked("validator-A"), 10)
        .await
        .unwrap();
    assert_eq!(built.docket.sequence_number, 1);
    assert_eq!(built.metrics.included, 3);
    assert_eq!(built.metrics.rejected, 0);
    assert!(built.previous.is_genesis);
    assert_eq!(built.docket.previous_hash, built.previous.hash);

    let engine = ConsensusEngine::new(node.peers.clone(), node.keys.clone());
    let mut docket = built.docket;
    let outcome = engine
        .seek_quorum(
            &mut docket,
            &validators(&["validator-A", "validator-B", "validator-C"]),
            &QuorumParams::default(),
        )
        .await
        .unwrap();
    assert!(outcome.is_achieved());
    assert_eq!(outcome.tally().approvals, 3);
    assert_eq!(docket.consensus_state, ConsensusState::Approved);
    assert_eq!(docket.consensus_votes.len(), 3);
}

#[tokio::test]
async fn test_cycle_commits_with_three_validators() {
    let node = node();
    for name in ["validator-B", "validator-C"] {
        join(&node, name);
    }
    let genesis = GenesisConfig::new(
        "ledger-1",
        Address::new_unchecked("validator-A"),
        validators(&["validator-A", "validator-B", "validator-C"]),
    );
    node.orchestrator.create_genesis(&genesis).await.unwrap();

    let txs: Vec<Transaction> = (0..3).map(|n| note(&node, "ledger-1", &n.to_string())).collect();
    for tx in &txs {
        node.orchestrator.submit_transaction(tx.clone());
    }

    let outcome = node.orchestrator.run_cycle("ledger-1").await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Committed {
            sequence: 1,
            transactions: 3
        }
    );
    assert_eq!(node.orchestrator.mempool().len("ledger-1"), 0);

    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.last_sequence, Some(1));
    assert_eq!(status.counters.dockets_confirmed, 1);
    assert_eq!(status.counters.transactions_confirmed, 3);

    assert_eq!(node.orchestrator.run_cycle("ledger-1").await.unwrap(), CycleOutcome::Idle);
}

#[tokio::test]
async fn test_consensus_failure_keeps_transactions_pending() {
    let mut config = config();
    config.consensus.minimum_validators = 2;
    config.consensus.vote_timeout_ms = 50;
    let node = node_with(config, Arc::new(MemoryDocketStore::new()));
    let genesis = GenesisConfig::new(
        "ledger-1",
        Address::new_unchecked("validator-A"),
        validators(&["validator-A", "validator-B", "validator-C"]),
    );
    node.orchestrator.create_genesis(&genesis).await.unwrap();
    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "waiting"));

    let outcome = node.orchestrator.run_cycle("ledger-1").await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::ConsensusFailed { sequence: 1, .. }
    ));
    assert_eq!(node.orchestrator.mempool().len("ledger-1"), 1);
    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.last_sequence, Some(0));
    assert_eq!(status.counters.consensus_failures, 1);
}

#[tokio::test]
async fn test_loop_commits_submitted_transactions() {
    let node = node();
    let mut events = node.orchestrator.subscribe();

    node.orchestrator.start("ledger-1").await.unwrap();
    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "hello"));

    let event = wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::DocketPersisted { sequence: 1, .. })
    })
    .await;
    assert_eq!(event.ledger_id(), "ledger-1");

    node.orchestrator.stop("ledger-1").await.unwrap();
    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.state, LedgerState::Stopped);
    assert_eq!(status.last_sequence, Some(1));
    assert_eq!(status.mempool_size, 0);
}

#[tokio::test]
async fn test_paused_ledger_does_not_build() {
    let node = node();
    let mut events = node.orchestrator.subscribe();

    node.orchestrator.start("ledger-1").await.unwrap();
    node.orchestrator.pause("ledger-1").await.unwrap();
    wait_for(&mut events, |e| {
        matches!(
            e,
            ValidatorEvent::StateChanged {
                to: LedgerState::Paused,
                ..
            }
        )
    })
    .await;

    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "later"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(node.orchestrator.mempool().len("ledger-1"), 1);

    node.orchestrator.resume("ledger-1").await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::DocketPersisted { sequence: 1, .. })
    })
    .await;
    node.orchestrator.shutdown().await;
    assert_eq!(
        node.orchestrator.status("ledger-1").await.unwrap().state,
        LedgerState::Stopped
    );
}

#[tokio::test]
async fn test_replayed_transaction_is_rejected() {
    let node = node();
    let tx = note(&node, "ledger-1", "once");
    node.orchestrator.submit_transaction(tx.clone());
    assert!(matches!(
        node.orchestrator.run_cycle("ledger-1").await.unwrap(),
        CycleOutcome::Committed { sequence: 1, .. }
    ));

    // Already confirmed, but no longer pending, so the mempool takes it.
    assert!(node.orchestrator.submit_transaction(tx.clone()).accepted);
    let outcome = node.orchestrator.run_cycle("ledger-1").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Idle);
    assert!(!node.orchestrator.mempool().contains("ledger-1", &tx.id));

    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.last_sequence, Some(1));
    assert_eq!(status.counters.transactions_rejected, 1);
}

#[tokio::test]
async fn test_build_excludes_confirmed_duplicate() {
    let node = node();
    let first = note(&node, "ledger-1", "first");
    node.orchestrator.submit_transaction(first.clone());
    node.orchestrator.run_cycle("ledger-1").await.unwrap();

    let second = note(&node, "ledger-1", "second");
    node.orchestrator.submit_transaction(second.clone());
    node.orchestrator.submit_transaction(first.clone());

    let built = node
        .orchestrator
        .build_docket("ledger-1", &Address::new_unchecked("validator-A"), 10)
        .await
        .unwrap();
    assert_eq!(built.docket.sequence_number, 2);
    assert_eq!(built.docket.transaction_ids(), vec![second.id]);
    assert_eq!(built.rejections.len(), 1);
    assert_eq!(built.rejections[0].tx_id, first.id);
    assert_eq!(built.rejections[0].code(), ErrorCode::Replay);

    // A duplicate of something still pending never gets past the mempool.
    let again = node.orchestrator.submit_transaction(second);
    assert!(matches!(again.rejection, Some(MempoolError::Duplicate(_))));
}

#[tokio::test]
async fn test_mempool_capacity_is_enforced() {
    let mut config = config();
    config.mempool.capacity = 2;
    let node = node_with(config, Arc::new(MemoryDocketStore::new()));

    assert!(node.orchestrator.submit_transaction(note(&node, "ledger-1", "a")).accepted);
    assert!(node.orchestrator.submit_transaction(note(&node, "ledger-1", "b")).accepted);
    let refused = node
        .orchestrator
        .submit_transaction(note(&node, "ledger-1", "c"));
    assert!(!refused.accepted);
    assert_eq!(refused.mempool_size, 2);
    let rejection = refused.rejection.unwrap();
    assert!(matches!(rejection, MempoolError::Full { capacity: 2, .. }));
    assert_eq!(rejection.code(), ErrorCode::Capacity);

    // Other ledgers have their own pools.
    assert!(node.orchestrator.submit_transaction(note(&node, "ledger-2", "c")).accepted);
}

#[tokio::test]
async fn test_expired_transactions_never_reach_a_docket() {
    let mut config = config();
    config.mempool.default_ttl_ms = 1_000;
    let node = node_with(config, Arc::new(MemoryDocketStore::new()));

    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "stale"));
    node.clock.advance(2_000);

    assert_eq!(node.orchestrator.run_cycle("ledger-1").await.unwrap(), CycleOutcome::Idle);
    assert_eq!(node.orchestrator.mempool().len("ledger-1"), 0);
    assert_eq!(node.orchestrator.status("ledger-1").await.unwrap().last_sequence, None);
}

#[tokio::test]
async fn test_ledgers_are_isolated() {
    let node = node();
    for ledger in ["ledger-1", "ledger-2"] {
        node.orchestrator.submit_transaction(note(&node, ledger, ledger));
    }
    node.orchestrator
        .submit_transaction(note(&node, "ledger-2", "extra"));

    assert!(matches!(
        node.orchestrator.run_cycle("ledger-1").await.unwrap(),
        CycleOutcome::Committed { sequence: 1, transactions: 1 }
    ));
    assert_eq!(node.orchestrator.mempool().len("ledger-2"), 2);
    assert!(matches!(
        node.orchestrator.run_cycle("ledger-2").await.unwrap(),
        CycleOutcome::Committed { sequence: 1, transactions: 2 }
    ));

    let statuses = node.orchestrator.statuses().await.unwrap();
    let ids: Vec<&str> = statuses.iter().map(|s| s.ledger_id.as_str()).collect();
    assert_eq!(ids, ["ledger-1", "ledger-2"]);
    assert!(statuses.iter().all(|s| s.last_sequence == Some(1)));
}

#[tokio::test]
async fn test_validate_docket_reports_tampering() {
    let node = node();
    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "original"));
    node.orchestrator.run_cycle("ledger-1").await.unwrap();

    let mut forged = Docket::new(
        "ledger-1",
        2,
        Hash::ZERO,
        NOW,
        Address::new_unchecked("validator-A"),
        vec![note(&node, "ledger-1", "forged")],
    )
    .sealed();
    forged.transactions[0].payload.data = br#"{"text":"edited"}"#.to_vec();

    let verdict = node.orchestrator.validate_docket(&forged).await.unwrap();
    assert!(!verdict.valid);
    let fields: HashSet<&str> = verdict.failures.iter().map(|f| f.field.as_str()).collect();
    assert!(fields.contains("previous_hash"));
    assert!(fields.iter().any(|f| f.starts_with("transactions[0].")));
}

/// Store whose reads fail while `failing` is set.
struct FlakyStore {
    inner: MemoryDocketStore,
    failing: AtomicBool,
}

#[async_trait]
impl DocketStore for FlakyStore {
    async fn latest_docket(&self, ledger_id: &str) -> Result<Option<Docket>, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk offline".into()));
        }
        self.inner.latest_docket(ledger_id).await
    }

    async fn docket_at(
        &self,
        ledger_id: &str,
        sequence: u64,
    ) -> Result<Option<Docket>, StorageError> {
        self.inner.docket_at(ledger_id, sequence).await
    }

    async fn persist_docket(&self, docket: &Docket) -> Result<(), StorageError> {
        self.inner.persist_docket(docket).await
    }

    async fn confirmed_among(
        &self,
        ledger_id: &str,
        ids: &[Hash],
    ) -> Result<HashSet<Hash>, StorageError> {
        self.inner.confirmed_among(ledger_id, ids).await
    }

    async fn ledgers(&self) -> Result<Vec<String>, StorageError> {
        self.inner.ledgers().await
    }
}

#[tokio::test]
async fn test_persistent_store_failure_faults_ledger() {
    let store = Arc::new(FlakyStore {
        inner: MemoryDocketStore::new(),
        failing: AtomicBool::new(true),
    });
    let node = node_with(config(), store.clone());
    let mut events = node.orchestrator.subscribe();

    node.orchestrator.start("ledger-1").await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::LedgerFaulted { .. })
    })
    .await;
    assert!(matches!(event, ValidatorEvent::LedgerFaulted { ref error, .. } if error.contains("disk offline")));

    store.failing.store(false, Ordering::SeqCst);
    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.state, LedgerState::Error);
    assert_eq!(status.counters.retries, 2);
    assert!(status.last_error.is_some());

    // A faulted ledger can be restarted once the store recovers.
    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "after"));
    node.orchestrator.start("ledger-1").await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::DocketPersisted { sequence: 1, .. })
    })
    .await;
    node.orchestrator.stop("ledger-1").await.unwrap();
    assert_eq!(
        node.orchestrator.status("ledger-1").await.unwrap().state,
        LedgerState::Stopped
    );
}

/// Peers that take `delay` before any voter sees the docket.
struct SlowPeers {
    inner: Arc<InProcessPeers>,
    delay: Duration,
}

#[async_trait]
impl PeerBroadcast for SlowPeers {
    async fn broadcast(
        &self,
        docket: &Docket,
        validators: &BTreeSet<Address>,
    ) -> Result<VoteStream, PeerError> {
        tokio::time::sleep(self.delay).await;
        self.inner.broadcast(docket, validators).await
    }
}

/// Store whose writes take `delay`.
struct SlowStore {
    inner: MemoryDocketStore,
    delay: Duration,
}

#[async_trait]
impl DocketStore for SlowStore {
    async fn latest_docket(&self, ledger_id: &str) -> Result<Option<Docket>, StorageError> {
        self.inner.latest_docket(ledger_id).await
    }

    async fn docket_at(
        &self,
        ledger_id: &str,
        sequence: u64,
    ) -> Result<Option<Docket>, StorageError> {
        self.inner.docket_at(ledger_id, sequence).await
    }

    async fn persist_docket(&self, docket: &Docket) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.persist_docket(docket).await
    }

    async fn confirmed_among(
        &self,
        ledger_id: &str,
        ids: &[Hash],
    ) -> Result<HashSet<Hash>, StorageError> {
        self.inner.confirmed_among(ledger_id, ids).await
    }

    async fn ledgers(&self) -> Result<Vec<String>, StorageError> {
        self.inner.ledgers().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_vote_keeps_transactions_pending() {
    let node = node_with_peers(config(), Arc::new(MemoryDocketStore::new()), |peers| {
        Arc::new(SlowPeers {
            inner: peers,
            delay: Duration::from_secs(3),
        })
    });
    let genesis = GenesisConfig::new(
        "ledger-1",
        Address::new_unchecked("validator-A"),
        validators(&["validator-A"]),
    );
    node.orchestrator.create_genesis(&genesis).await.unwrap();
    let mut events = node.orchestrator.subscribe();

    let tx = note(&node, "ledger-1", "in flight");
    node.orchestrator.submit_transaction(tx.clone());
    node.orchestrator.start("ledger-1").await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::DocketBuilt { sequence: 1, .. })
    })
    .await;

    let stopped = tokio::time::timeout(Duration::from_secs(1), node.orchestrator.stop("ledger-1"))
        .await
        .expect("stop waited for the vote")
        .unwrap();
    assert_eq!(stopped, LedgerState::Stopped);

    assert!(node.orchestrator.mempool().contains("ledger-1", &tx.id));
    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.last_sequence, Some(0));
    assert_eq!(status.counters.dockets_confirmed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_commit_waits_for_persistence() {
    let store = Arc::new(SlowStore {
        inner: MemoryDocketStore::new(),
        delay: Duration::from_millis(300),
    });
    let node = node_with(config(), store);
    let mut events = node.orchestrator.subscribe();

    node.orchestrator.start("ledger-1").await.unwrap();
    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "first"));
    wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::ConsensusAchieved { sequence: 1, .. })
    })
    .await;

    node.orchestrator.stop("ledger-1").await.unwrap();
    let status = node.orchestrator.status("ledger-1").await.unwrap();
    assert_eq!(status.state, LedgerState::Stopped);
    assert_eq!(status.last_sequence, Some(1));
    assert_eq!(status.mempool_size, 0);

    // The next cycle builds on the committed head, not a stale one.
    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "second"));
    assert_eq!(
        node.orchestrator.run_cycle("ledger-1").await.unwrap(),
        CycleOutcome::Committed {
            sequence: 2,
            transactions: 1
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cycle_waits_for_abandoned_commit() {
    let store = Arc::new(SlowStore {
        inner: MemoryDocketStore::new(),
        delay: Duration::from_millis(300),
    });
    let node = node_with(config(), store);
    let mut events = node.orchestrator.subscribe();

    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "first"));
    let background = node.orchestrator.clone();
    let cycle = tokio::spawn(async move { background.run_cycle("ledger-1").await });
    wait_for(&mut events, |e| {
        matches!(e, ValidatorEvent::ConsensusAchieved { sequence: 1, .. })
    })
    .await;
    cycle.abort();

    node.orchestrator
        .submit_transaction(note(&node, "ledger-1", "second"));
    assert!(matches!(
        node.orchestrator.run_cycle("ledger-1").await.unwrap(),
        CycleOutcome::Committed { sequence: 2, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_spawn_one_loop() {
    let node = node();
    let mut events = node.orchestrator.subscribe();

    let starts: Vec<_> = (0..8)
        .map(|_| {
            let o = node.orchestrator.clone();
            tokio::spawn(async move { o.start("ledger-1").await })
        })
        .collect();
    for start in starts {
        assert!(start.await.unwrap().unwrap().is_active());
    }

    node.orchestrator.stop("ledger-1").await.unwrap();
    let mut starting = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            ValidatorEvent::StateChanged {
                to: LedgerState::Starting,
                ..
            }
        ) {
            starting += 1;
        }
    }
    assert_eq!(starting, 1);
}

//! Validator node for docketchain.
//!
//! This crate brings the consensus and storage layers together into a
//! running validator:
//! - **Mempool**: per-ledger pools of pending transactions
//! - **Builder**: assembles validated transactions into candidate dockets
//! - **Orchestrator**: one build, vote and commit loop per ledger
//! - **Peers**: in-process voters for single-node and test deployments
//!
//! # Example
//!
//! ```rust,no_run
//! use docketchain_chain::{
//!     InProcessPeers, OrchestratorDeps, SystemClock, ValidatorConfig, ValidatorOrchestrator,
//! };
//! use docketchain_consensus::{JsonSchemaRegistry, KeyRegistry};
//! use docketchain_storage::SledDocketStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ValidatorConfig::from_file("validator.toml")?;
//! config.apply_env()?;
//!
//! let store = Arc::new(SledDocketStore::open("./docketchain_data")?);
//! let clock = Arc::new(SystemClock);
//! let orchestrator = ValidatorOrchestrator::new(
//!     config,
//!     OrchestratorDeps {
//!         store: store.clone(),
//!         peers: Arc::new(InProcessPeers::new(store, clock.clone())),
//!         verifier: Arc::new(KeyRegistry::new()),
//!         schemas: Arc::new(JsonSchemaRegistry::new()),
//!         clock,
//!     },
//! )?;
//!
//! orchestrator.start("ledger-1").await?;
//! // Submit transactions, watch events, etc.
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod clock;
pub mod config;
pub mod events;
pub mod mempool;
pub mod metrics;
pub mod orchestrator;
pub mod peers;
pub mod state;

pub use builder::{BuildError, BuildMetrics, BuiltDocket, BuilderConfig, DocketBuilder, Rejection};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConsensusConfig, OrchestratorConfig, RetryPolicy, ValidatorConfig};
pub use events::{EventBus, ValidatorEvent};
pub use mempool::{MemPoolManager, MempoolConfig, MempoolEntry, MempoolError, MempoolStats};
pub use metrics::Metrics;
pub use orchestrator::{
    CycleOutcome, OrchestratorDeps, OrchestratorError, SubmitReceipt, ValidatorOrchestrator,
};
pub use peers::InProcessPeers;
pub use state::{LedgerCounters, LedgerState, LedgerStatus};

//! Prometheus metrics for the validator.
//!
//! # Metrics
//!
//! - `docketchain_dockets_built_total` - Candidate dockets built
//! - `docketchain_dockets_persisted_total` - Approved dockets persisted
//! - `docketchain_transactions_rejected_total{code}` - Transactions excluded from a build
//! - `docketchain_docket_validations_total{outcome}` - Received dockets reviewed
//! - `docketchain_consensus_rounds_total{outcome}` - Voting rounds by result
//! - `docketchain_build_duration_seconds` - Docket build latency
//! - `docketchain_validation_duration_seconds` - Docket review latency
//! - `docketchain_consensus_duration_seconds` - Voting round latency
//! - `docketchain_mempool_transactions{ledger}` - Pending transactions
//! - `docketchain_mempool_bytes{ledger}` - Pending transaction bytes
//!
//! Metrics live in a registry owned by [`Metrics`], so several validators can
//! run in one process without clashing on the default registry.

use docketchain_core::ErrorCode;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0];

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    pub dockets_built: IntCounter,
    pub dockets_persisted: IntCounter,
    pub transactions_rejected: IntCounterVec,
    pub validations: IntCounterVec,
    pub consensus_rounds: IntCounterVec,
    pub build_duration: Histogram,
    pub validation_duration: Histogram,
    pub consensus_duration: Histogram,
    pub mempool_transactions: IntGaugeVec,
    pub mempool_bytes: IntGaugeVec,
    registry: Arc<Registry>,
}

fn histogram(name: &str, help: &str) -> prometheus::Result<Histogram> {
    Histogram::with_opts(HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS.to_vec()))
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let dockets_built = IntCounter::new(
            "docketchain_dockets_built_total",
            "Candidate dockets built",
        )?;
        registry.register(Box::new(dockets_built.clone()))?;

        let dockets_persisted = IntCounter::new(
            "docketchain_dockets_persisted_total",
            "Approved dockets persisted",
        )?;
        registry.register(Box::new(dockets_persisted.clone()))?;

        let transactions_rejected = IntCounterVec::new(
            Opts::new(
                "docketchain_transactions_rejected_total",
                "Transactions excluded from a docket build",
            ),
            &["code"],
        )?;
        registry.register(Box::new(transactions_rejected.clone()))?;

        let validations = IntCounterVec::new(
            Opts::new(
                "docketchain_docket_validations_total",
                "Received dockets reviewed",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(validations.clone()))?;

        let consensus_rounds = IntCounterVec::new(
            Opts::new(
                "docketchain_consensus_rounds_total",
                "Consensus rounds by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(consensus_rounds.clone()))?;

        let build_duration = histogram(
            "docketchain_build_duration_seconds",
            "Docket build latency",
        )?;
        registry.register(Box::new(build_duration.clone()))?;

        let validation_duration = histogram(
            "docketchain_validation_duration_seconds",
            "Docket review latency",
        )?;
        registry.register(Box::new(validation_duration.clone()))?;

        let consensus_duration = histogram(
            "docketchain_consensus_duration_seconds",
            "Consensus round latency",
        )?;
        registry.register(Box::new(consensus_duration.clone()))?;

        let mempool_transactions = IntGaugeVec::new(
            Opts::new("docketchain_mempool_transactions", "Pending transactions"),
            &["ledger"],
        )?;
        registry.register(Box::new(mempool_transactions.clone()))?;

        let mempool_bytes = IntGaugeVec::new(
            Opts::new("docketchain_mempool_bytes", "Pending transaction bytes"),
            &["ledger"],
        )?;
        registry.register(Box::new(mempool_bytes.clone()))?;

        Ok(Self {
            dockets_built,
            dockets_persisted,
            transactions_rejected,
            validations,
            consensus_rounds,
            build_duration,
            validation_duration,
            consensus_duration,
            mempool_transactions,
            mempool_bytes,
            registry,
        })
    }

    pub fn record_build(&self, elapsed: Duration, rejected: &[ErrorCode]) {
        self.dockets_built.inc();
        self.build_duration.observe(elapsed.as_secs_f64());
        for code in rejected {
            self.transactions_rejected
                .with_label_values(&[code.as_str()])
                .inc();
        }
    }

    pub fn record_validation(&self, elapsed: Duration, valid: bool) {
        let outcome = if valid { "valid" } else { "invalid" };
        self.validations.with_label_values(&[outcome]).inc();
        self.validation_duration.observe(elapsed.as_secs_f64());
    }

    /// `outcome` is `achieved`, or the failure code.
    pub fn record_consensus(&self, elapsed: Duration, outcome: &str) {
        self.consensus_rounds.with_label_values(&[outcome]).inc();
        self.consensus_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_persisted(&self) {
        self.dockets_persisted.inc();
    }

    pub fn set_mempool(&self, ledger_id: &str, transactions: usize, bytes: u64) {
        self.mempool_transactions
            .with_label_values(&[ledger_id])
            .set(transactions as i64);
        self.mempool_bytes
            .with_label_values(&[ledger_id])
            .set(bytes as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format.
    pub fn gather_text(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

//! Transaction validation rules.
//!
//! Checks run in a fixed order and stop at the first stage that fails:
//! structure, schema conformance, authenticity, then replay. Within a stage
//! every failed check is reported.

use crate::ports::{SchemaValidator, SignatureVerifier};
use docketchain_core::{
    into_result, ErrorCode, Hash, Transaction, ValidationFailure, ValidationIssue,
    ValidationResult,
};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

/// Limits applied by structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRules {
    /// How far a transaction timestamp may run ahead of the validator clock.
    pub max_clock_skew_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for TransactionRules {
    fn default() -> Self {
        Self {
            max_clock_skew_ms: 5 * 60 * 1000,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

/// What a transaction is validated against.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub ledger_id: String,
    /// Validator clock, Unix milliseconds.
    pub now_ms: u64,
    /// Transaction ids already confirmed in this ledger's history.
    pub confirmed: HashSet<Hash>,
}

impl ValidationContext {
    pub fn new(ledger_id: impl Into<String>, now_ms: u64) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            now_ms,
            confirmed: HashSet::new(),
        }
    }

    pub fn with_confirmed(mut self, ids: impl IntoIterator<Item = Hash>) -> Self {
        self.confirmed.extend(ids);
        self
    }
}

fn structural(field: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue::new(ErrorCode::Structural, field, message)
}

/// Required fields, address formats, size limits, clock skew and content id.
pub fn check_structure(
    tx: &Transaction,
    ctx: &ValidationContext,
    rules: &TransactionRules,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if tx.ledger_id.is_empty() {
        issues.push(structural("ledger_id", "missing"));
    } else if tx.ledger_id != ctx.ledger_id {
        issues.push(structural(
            "ledger_id",
            format!("expected {}, got {}", ctx.ledger_id, tx.ledger_id),
        ));
    }

    if !tx.sender.is_well_formed() {
        issues.push(structural("sender", format!("malformed address {:?}", tx.sender.as_str())));
    }
    if let Some(recipient) = &tx.recipient {
        if !recipient.is_well_formed() {
            issues.push(structural(
                "recipient",
                format!("malformed address {:?}", recipient.as_str()),
            ));
        }
    }

    if tx.payload.schema.as_str().is_empty() {
        issues.push(structural("payload.schema", "missing"));
    }
    if tx.payload.data.len() > rules.max_payload_bytes {
        issues.push(structural(
            "payload.data",
            format!(
                "{} bytes exceeds limit of {}",
                tx.payload.data.len(),
                rules.max_payload_bytes
            ),
        ));
    }

    if tx.timestamp == 0 {
        issues.push(structural("timestamp", "missing"));
    } else if tx.timestamp > ctx.now_ms.saturating_add(rules.max_clock_skew_ms) {
        issues.push(structural(
            "timestamp",
            format!(
                "{} is more than {}ms ahead of {}",
                tx.timestamp, rules.max_clock_skew_ms, ctx.now_ms
            ),
        ));
    }

    if !tx.is_signed() {
        issues.push(structural("signature", "missing"));
    }

    if !tx.has_valid_id() {
        issues.push(structural("id", "does not match transaction content"));
    } else if tx.previous_tx_id == Some(tx.id) {
        issues.push(structural("previous_tx_id", "transaction cannot precede itself"));
    }

    issues
}

/// Replay against confirmed history.
pub fn check_history(tx: &Transaction, ctx: &ValidationContext) -> Option<ValidationIssue> {
    ctx.confirmed.contains(&tx.id).then(|| {
        ValidationIssue::new(
            ErrorCode::Replay,
            "id",
            format!("transaction {} already confirmed", tx.id),
        )
    })
}

fn duplicate_in_batch(tx: &Transaction) -> ValidationIssue {
    ValidationIssue::new(
        ErrorCode::Replay,
        "id",
        format!("transaction {} appears earlier in the batch", tx.id),
    )
}

/// Stateless transaction validator.
pub struct TransactionValidator {
    verifier: Arc<dyn SignatureVerifier>,
    schemas: Arc<dyn SchemaValidator>,
    rules: TransactionRules,
}

impl TransactionValidator {
    pub fn new(verifier: Arc<dyn SignatureVerifier>, schemas: Arc<dyn SchemaValidator>) -> Self {
        Self {
            verifier,
            schemas,
            rules: TransactionRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: TransactionRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &TransactionRules {
        &self.rules
    }

    /// Validate one transaction.
    pub fn validate(&self, tx: &Transaction, ctx: &ValidationContext) -> ValidationResult {
        into_result(check_structure(tx, ctx, &self.rules))?;

        self.schemas
            .validate_payload(&tx.payload.schema, &tx.payload.data)?;

        if !self
            .verifier
            .verify_signature(&tx.sender, tx.id.as_bytes(), &tx.signature)
        {
            return Err(ValidationFailure::single(ValidationIssue::new(
                ErrorCode::Authenticity,
                "signature",
                format!("signature does not verify for sender {}", tx.sender),
            )));
        }

        match check_history(tx, ctx) {
            Some(issue) => Err(ValidationFailure::single(issue)),
            None => Ok(()),
        }
    }

    /// Validate many transactions independently, one result per input in input order.
    ///
    /// Per-transaction checks run in parallel. A repeated id is rejected as a
    /// replay for every occurrence after the first.
    pub fn validate_batch(
        &self,
        txs: &[Transaction],
        ctx: &ValidationContext,
    ) -> Vec<ValidationResult> {
        let mut results: Vec<ValidationResult> =
            txs.par_iter().map(|tx| self.validate(tx, ctx)).collect();

        let mut seen = HashSet::with_capacity(txs.len());
        for (tx, result) in txs.iter().zip(results.iter_mut()) {
            if !seen.insert(tx.id) && result.is_ok() {
                *result = Err(ValidationFailure::single(duplicate_in_batch(tx)));
            }
        }

        results
    }
}

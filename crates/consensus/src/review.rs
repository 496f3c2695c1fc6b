//! Independent review of a candidate docket by a validator.

use crate::chain::ChainValidator;
use crate::validator::{TransactionValidator, ValidationContext};
use docketchain_core::{
    Address, ConsensusVote, Docket, ErrorCode, Keypair, ValidationFailure, ValidationIssue,
};
use std::sync::Arc;
use tracing::debug;

/// Aggregated result of reviewing a docket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocketVerdict {
    pub valid: bool,
    pub failures: Vec<ValidationIssue>,
}

impl DocketVerdict {
    fn from_failures(failures: Vec<ValidationIssue>) -> Self {
        Self {
            valid: failures.is_empty(),
            failures,
        }
    }
}

/// Re-derive a docket's hash, check its link to `previous` and re-validate
/// every transaction.
///
/// Transaction issues are reported with the field prefixed by the
/// transaction's position, e.g. `transactions[2].signature`.
pub fn review_docket(
    docket: &Docket,
    previous: Option<&Docket>,
    validator: &TransactionValidator,
    ctx: &ValidationContext,
) -> DocketVerdict {
    let mut failures = Vec::new();

    let link = match previous {
        Some(previous) => ChainValidator::validate_chain_link(docket, previous),
        None if docket.is_genesis => ChainValidator::validate_genesis(docket),
        None => Err(ValidationFailure::single(ValidationIssue::new(
            ErrorCode::ChainIntegrity,
            "previous_hash",
            "no previous docket to link against",
        ))),
    };
    if let Err(failure) = link {
        failures.extend(failure.into_issues());
    }

    if docket.ledger_id != ctx.ledger_id {
        failures.push(ValidationIssue::new(
            ErrorCode::ChainIntegrity,
            "ledger_id",
            format!("reviewing {} but docket is for {}", ctx.ledger_id, docket.ledger_id),
        ));
    }

    let results = validator.validate_batch(&docket.transactions, ctx);
    for (index, result) in results.into_iter().enumerate() {
        if let Err(failure) = result {
            failures.extend(failure.into_issues().into_iter().map(|mut issue| {
                issue.field = format!("transactions[{index}].{}", issue.field);
                issue
            }));
        }
    }

    DocketVerdict::from_failures(failures)
}

/// A validator's voting identity.
pub struct Voter {
    address: Address,
    keypair: Keypair,
    validator: Arc<TransactionValidator>,
}

impl Voter {
    pub fn new(address: Address, keypair: Keypair, validator: Arc<TransactionValidator>) -> Self {
        Self {
            address,
            keypair,
            validator,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Review `docket` and sign an approve or reject vote for it.
    ///
    /// `previous` is this voter's own view of the chain tip and `ctx` carries
    /// its confirmed history.
    pub fn vote(
        &self,
        docket: &Docket,
        previous: Option<&Docket>,
        ctx: &ValidationContext,
    ) -> ConsensusVote {
        let verdict = review_docket(docket, previous, &self.validator, ctx);
        if !verdict.valid {
            debug!(
                voter = %self.address,
                docket = %docket.hash,
                failures = verdict.failures.len(),
                "voting to reject docket"
            );
        }
        ConsensusVote::signed(docket.hash, self.address.clone(), verdict.valid, &self.keypair)
    }
}

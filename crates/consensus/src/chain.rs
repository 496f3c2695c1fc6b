//! Hash-chain checks between consecutive dockets.
//!
//! Nothing here performs I/O or touches shared state, so these checks can run
//! inside a restricted execution environment and be tested without mocks.

use docketchain_core::{
    into_result, Docket, ErrorCode, Hash, ValidationIssue, ValidationResult,
    GENESIS_PREVIOUS_HASH,
};

fn integrity(field: &str, message: String) -> ValidationIssue {
    ValidationIssue::new(ErrorCode::ChainIntegrity, field, message)
}

/// Docket chain validator.
pub struct ChainValidator;

impl ChainValidator {
    /// Deterministic content hash of a docket.
    pub fn compute_hash(docket: &Docket) -> Hash {
        docket.compute_hash()
    }

    /// Check that `docket` directly extends `previous`.
    pub fn validate_chain_link(docket: &Docket, previous: &Docket) -> ValidationResult {
        let mut issues = Vec::new();

        if docket.ledger_id != previous.ledger_id {
            issues.push(integrity(
                "ledger_id",
                format!(
                    "docket belongs to {} but previous docket to {}",
                    docket.ledger_id, previous.ledger_id
                ),
            ));
        }

        if docket.previous_hash != previous.hash {
            issues.push(integrity(
                "previous_hash",
                format!(
                    "expected {}, got {}",
                    previous.hash, docket.previous_hash
                ),
            ));
        }

        match previous.sequence_number.checked_add(1) {
            Some(expected) if expected == docket.sequence_number => {}
            expected => issues.push(integrity(
                "sequence_number",
                format!("expected {:?}, got {}", expected, docket.sequence_number),
            )),
        }

        if docket.is_genesis {
            issues.push(integrity(
                "is_genesis",
                "a genesis docket cannot extend another docket".to_string(),
            ));
        }

        let recomputed = Self::compute_hash(docket);
        if recomputed != docket.hash {
            issues.push(integrity(
                "hash",
                format!("stored {}, recomputed {}", docket.hash, recomputed),
            ));
        }

        into_result(issues)
    }

    /// Check the fixed shape of a genesis docket.
    pub fn validate_genesis(docket: &Docket) -> ValidationResult {
        let mut issues = Vec::new();

        if docket.sequence_number != 0 {
            issues.push(integrity(
                "sequence_number",
                format!("genesis must be 0, got {}", docket.sequence_number),
            ));
        }
        if docket.previous_hash != GENESIS_PREVIOUS_HASH {
            issues.push(integrity(
                "previous_hash",
                format!("genesis must carry the zero hash, got {}", docket.previous_hash),
            ));
        }
        if !docket.is_genesis {
            issues.push(integrity("is_genesis", "flag not set".to_string()));
        }
        let recomputed = Self::compute_hash(docket);
        if recomputed != docket.hash {
            issues.push(integrity(
                "hash",
                format!("stored {}, recomputed {}", docket.hash, recomputed),
            ));
        }

        into_result(issues)
    }
}

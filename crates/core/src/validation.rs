//! Typed validation outcomes shared by every validator in the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy. Each check that fails reports exactly one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCode {
    Structural,
    Schema,
    Authenticity,
    Replay,
    ChainIntegrity,
    Capacity,
    Expiration,
    ConsensusTimeout,
    ConsensusRejected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Structural => "structural",
            ErrorCode::Schema => "schema",
            ErrorCode::Authenticity => "authenticity",
            ErrorCode::Replay => "replay",
            ErrorCode::ChainIntegrity => "chain_integrity",
            ErrorCode::Capacity => "capacity",
            ErrorCode::Expiration => "expiration",
            ErrorCode::ConsensusTimeout => "consensus_timeout",
            ErrorCode::ConsensusRejected => "consensus_rejected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed check, naming the field that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ErrorCode,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: ErrorCode, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.field, self.message)
    }
}

/// A non-empty, ordered list of failed checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed with {count} issue(s)", count = .issues.len())]
pub struct ValidationFailure {
    issues: Vec<ValidationIssue>,
}

impl ValidationFailure {
    pub fn single(issue: ValidationIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }

    /// `None` when `issues` is empty, so a failure can never be constructed without a cause.
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Option<Self> {
        if issues.is_empty() {
            None
        } else {
            Some(Self { issues })
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }

    pub fn codes(&self) -> Vec<ErrorCode> {
        self.issues.iter().map(|i| i.code).collect()
    }

    /// Code of the first failed check.
    pub fn primary_code(&self) -> ErrorCode {
        self.issues[0].code
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Success, or the checks that failed.
pub type ValidationResult = Result<(), ValidationFailure>;

/// Collapse a list of issues into a [`ValidationResult`].
pub fn into_result(issues: Vec<ValidationIssue>) -> ValidationResult {
    match ValidationFailure::from_issues(issues) {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

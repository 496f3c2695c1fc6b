//! Collaborator contracts consumed by the validation core.
//!
//! Signature and schema checks are synchronous: they are pure CPU work and are
//! fanned out across threads by `TransactionValidator::validate_batch`. Peer
//! delivery is asynchronous and yields votes over a bounded channel.

use async_trait::async_trait;
use docketchain_core::{Address, ConsensusVote, Docket, SchemaRef, Signature, ValidationResult};
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::mpsc;

/// Verifies signatures on behalf of the wallet service. Never holds private keys.
pub trait SignatureVerifier: Send + Sync {
    /// True iff `signature` over `message` was produced by the key behind `signer`.
    fn verify_signature(&self, signer: &Address, message: &[u8], signature: &Signature) -> bool;
}

/// Checks payloads against schemas held by the blueprint service.
pub trait SchemaValidator: Send + Sync {
    fn validate_payload(&self, schema: &SchemaRef, data: &[u8]) -> ValidationResult;
}

/// Errors raised by the peer transport.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer transport unavailable: {0}")]
    Unavailable(String),
}

/// Receiving end of a vote collection round.
pub type VoteStream = mpsc::Receiver<ConsensusVote>;

/// Delivers a candidate docket to the validator set and streams back their votes.
#[async_trait]
pub trait PeerBroadcast: Send + Sync {
    async fn broadcast(
        &self,
        docket: &Docket,
        validators: &BTreeSet<Address>,
    ) -> Result<VoteStream, PeerError>;
}

//! Majority-quorum voting on candidate dockets.
//!
//! Every address in the validator set gets one equal-weight vote. A round
//! broadcasts the docket, drains the vote channel until either every expected
//! voter has answered or the vote timeout fires, and then decides.

use crate::ports::{PeerBroadcast, PeerError, SignatureVerifier};
use docketchain_core::{Address, ConsensusState, ConsensusVote, Docket, ErrorCode, Hash};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors that prevent a voting round from running at all.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid quorum parameters: {0}")]
    InvalidParams(String),

    #[error("validator set is empty")]
    EmptyValidatorSet,

    #[error("docket {0} is not pending")]
    NotPending(Hash),

    #[error("broadcast failed: {0}")]
    Broadcast(#[from] PeerError),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Thresholds for one voting round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuorumParams {
    /// Fraction of received votes that must approve, in (0, 1].
    pub quorum_percentage: f64,
    /// Fewest valid votes that can decide a round.
    pub minimum_validators: usize,
    pub vote_timeout: Duration,
}

impl Default for QuorumParams {
    fn default() -> Self {
        Self {
            quorum_percentage: 0.67,
            minimum_validators: 1,
            vote_timeout: Duration::from_secs(5),
        }
    }
}

impl QuorumParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.quorum_percentage > 0.0 && self.quorum_percentage <= 1.0) {
            return Err(ConsensusError::InvalidParams(format!(
                "quorum_percentage must be in (0, 1], got {}",
                self.quorum_percentage
            )));
        }
        if self.threshold_percent() == 0 {
            return Err(ConsensusError::InvalidParams(format!(
                "quorum_percentage {} rounds to a 0% threshold",
                self.quorum_percentage
            )));
        }
        if self.minimum_validators == 0 {
            return Err(ConsensusError::InvalidParams(
                "minimum_validators must be at least 1".into(),
            ));
        }
        if self.vote_timeout.is_zero() {
            return Err(ConsensusError::InvalidParams(
                "vote_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Threshold in whole percent.
    fn threshold_percent(&self) -> u64 {
        (self.quorum_percentage * 100.0).round() as u64
    }
}

/// Decide whether `approvals` out of `received` valid votes reach quorum.
///
/// The approval ratio is compared at whole-percent precision, rounding half
/// up, so a 2-of-3 majority (66.7%) meets a 0.67 threshold. A round with
/// no approvals never reaches quorum.
pub fn quorum_reached(approvals: usize, received: usize, params: &QuorumParams) -> bool {
    if approvals == 0 || received == 0 || received < params.minimum_validators {
        return false;
    }
    let (approvals, received) = (approvals as u64, received as u64);
    let approval_percent = (approvals * 200 + received) / (received * 2);
    approval_percent >= params.threshold_percent()
}

/// Vote counts for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub expected: usize,
    pub approvals: usize,
    pub rejections: usize,
    /// Votes with a bad signature, wrong docket hash or non-member voter.
    pub invalid: usize,
    /// Second and later votes from the same voter.
    pub duplicates: usize,
}

impl VoteTally {
    /// Valid, distinct votes.
    pub fn received(&self) -> usize {
        self.approvals + self.rejections
    }
}

/// Why a round did not reach quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Fewer than `minimum_validators` valid votes before the deadline.
    Timeout,
    /// Enough votes arrived but too few approved.
    Rejected,
}

impl FailureReason {
    pub fn code(&self) -> ErrorCode {
        match self {
            FailureReason::Timeout => ErrorCode::ConsensusTimeout,
            FailureReason::Rejected => ErrorCode::ConsensusRejected,
        }
    }
}

/// Result of a voting round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusOutcome {
    Achieved { tally: VoteTally },
    Failed { tally: VoteTally, reason: FailureReason },
}

impl ConsensusOutcome {
    pub fn is_achieved(&self) -> bool {
        matches!(self, ConsensusOutcome::Achieved { .. })
    }

    pub fn tally(&self) -> &VoteTally {
        match self {
            ConsensusOutcome::Achieved { tally } | ConsensusOutcome::Failed { tally, .. } => tally,
        }
    }
}

/// Runs voting rounds over the peer transport.
pub struct ConsensusEngine {
    peers: Arc<dyn PeerBroadcast>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ConsensusEngine {
    pub fn new(peers: Arc<dyn PeerBroadcast>, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { peers, verifier }
    }

    /// Check a vote's target, membership and signature. Duplicate detection is
    /// per round and happens in [`ConsensusEngine::seek_quorum`].
    pub fn validate_vote(
        &self,
        vote: &ConsensusVote,
        docket: &Docket,
        validators: &BTreeSet<Address>,
    ) -> bool {
        vote.docket_hash == docket.hash
            && validators.contains(&vote.voter)
            && self.verifier.verify_signature(
                &vote.voter,
                vote.message().as_bytes(),
                &vote.signature,
            )
    }

    /// Broadcast `docket`, collect votes and record the decision on it.
    ///
    /// On success the docket becomes `Approved` with every counted vote
    /// attached; otherwise it becomes `Rejected` and the votes are dropped.
    pub async fn seek_quorum(
        &self,
        docket: &mut Docket,
        validators: &BTreeSet<Address>,
        params: &QuorumParams,
    ) -> Result<ConsensusOutcome> {
        params.validate()?;
        if validators.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }
        if docket.consensus_state != ConsensusState::Pending {
            return Err(ConsensusError::NotPending(docket.hash));
        }

        let mut stream = self.peers.broadcast(docket, validators).await?;
        let deadline = Instant::now() + params.vote_timeout;

        let mut tally = VoteTally {
            expected: validators.len(),
            ..VoteTally::default()
        };
        let mut voters = HashSet::with_capacity(validators.len());
        let mut votes = Vec::with_capacity(validators.len());

        while voters.len() < validators.len() {
            let vote = match tokio::time::timeout_at(deadline, stream.recv()).await {
                Ok(Some(vote)) => vote,
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        ledger = %docket.ledger_id,
                        sequence = docket.sequence_number,
                        received = voters.len(),
                        "vote collection timed out"
                    );
                    break;
                }
            };

            if !self.validate_vote(&vote, docket, validators) {
                warn!(voter = %vote.voter, docket = %docket.hash, "discarding invalid vote");
                tally.invalid += 1;
                continue;
            }
            if !voters.insert(vote.voter.clone()) {
                tally.duplicates += 1;
                continue;
            }
            if vote.approve {
                tally.approvals += 1;
            } else {
                tally.rejections += 1;
            }
            votes.push(vote);
        }
        // Votes still in flight are discarded with the channel.
        drop(stream);

        let outcome = if quorum_reached(tally.approvals, tally.received(), params) {
            docket.consensus_state = ConsensusState::Approved;
            docket.consensus_votes = votes;
            ConsensusOutcome::Achieved { tally }
        } else {
            docket.consensus_state = ConsensusState::Rejected;
            docket.consensus_votes.clear();
            let reason = if tally.received() >= params.minimum_validators {
                FailureReason::Rejected
            } else {
                FailureReason::Timeout
            };
            ConsensusOutcome::Failed { tally, reason }
        };

        info!(
            ledger = %docket.ledger_id,
            sequence = docket.sequence_number,
            approvals = outcome.tally().approvals,
            rejections = outcome.tally().rejections,
            achieved = outcome.is_achieved(),
            "consensus round finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KeyRegistry;
    use async_trait::async_trait;
    use docketchain_core::Keypair;
    use tokio::sync::mpsc;

    struct Validator {
        address: Address,
        keypair: Keypair,
    }

    /// Replies with scripted verdicts, optionally after a delay.
    struct ScriptedPeers {
        replies: Vec<(Address, bool, Arc<Keypair>, Duration)>,
        extra: Vec<ConsensusVote>,
    }

    #[async_trait]
    impl PeerBroadcast for ScriptedPeers {
        async fn broadcast(
            &self,
            docket: &Docket,
            _validators: &BTreeSet<Address>,
        ) -> std::result::Result<crate::ports::VoteStream, PeerError> {
            let (tx, rx) = mpsc::channel(16);
            for vote in &self.extra {
                tx.send(vote.clone()).await.unwrap();
            }
            for (address, approve, keypair, delay) in &self.replies {
                let vote = ConsensusVote::signed(docket.hash, address.clone(), *approve, keypair);
                let tx = tx.clone();
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(vote).await;
                });
            }
            Ok(rx)
        }
    }

    struct DownPeers;

    #[async_trait]
    impl PeerBroadcast for DownPeers {
        async fn broadcast(
            &self,
            _docket: &Docket,
            _validators: &BTreeSet<Address>,
        ) -> std::result::Result<crate::ports::VoteStream, PeerError> {
            Err(PeerError::Unavailable("no route".into()))
        }
    }

    fn validators(n: usize) -> (Vec<Validator>, Arc<KeyRegistry>) {
        let keys = Arc::new(KeyRegistry::new());
        let set: Vec<_> = (0..n)
            .map(|i| {
                let v = Validator {
                    address: Address::new_unchecked(format!("validator-{i}")),
                    keypair: Keypair::generate(),
                };
                keys.register(v.address.clone(), v.keypair.public_key.clone());
                v
            })
            .collect();
        (set, keys)
    }

    fn docket() -> Docket {
        Docket::new(
            "ledger-1",
            1,
            Hash::from_bytes([1; 32]),
            10,
            Address::new_unchecked("validator-0"),
            vec![],
        )
        .sealed()
    }

    fn engine(
        vals: Vec<Validator>,
        keys: Arc<KeyRegistry>,
        verdicts: &[(bool, u64)],
        extra: Vec<ConsensusVote>,
    ) -> (ConsensusEngine, BTreeSet<Address>) {
        let set = vals.iter().map(|v| v.address.clone()).collect();
        let replies = vals
            .into_iter()
            .zip(verdicts)
            .map(|(v, (approve, delay))| {
                (
                    v.address,
                    *approve,
                    Arc::new(v.keypair),
                    Duration::from_millis(*delay),
                )
            })
            .collect();
        let peers = Arc::new(ScriptedPeers { replies, extra });
        (ConsensusEngine::new(peers, keys), set)
    }

    fn params(minimum: usize) -> QuorumParams {
        QuorumParams {
            quorum_percentage: 0.67,
            minimum_validators: minimum,
            vote_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_quorum_arithmetic() {
        let p = params(2);
        assert!(quorum_reached(2, 3, &p));
        assert!(!quorum_reached(1, 3, &p));
        assert!(quorum_reached(3, 3, &p));
        assert!(!quorum_reached(1, 1, &p));
        assert!(!quorum_reached(0, 0, &p));

        let half = QuorumParams {
            quorum_percentage: 0.5,
            ..p
        };
        assert!(quorum_reached(1, 2, &half));
        assert!(!quorum_reached(1, 3, &half));
        // Half-up rounding: 49.5% counts as 50%, 49.4% does not.
        assert!(quorum_reached(99, 200, &half));
        assert!(!quorum_reached(247, 500, &half));
    }

    #[test]
    fn test_zero_approvals_never_reach_quorum() {
        let tiny = QuorumParams {
            quorum_percentage: 0.004,
            ..params(2)
        };
        assert!(!quorum_reached(0, 3, &tiny));
        assert!(!quorum_reached(0, 3, &params(1)));
        assert!(quorum_reached(3, 3, &params(1)));
    }

    #[test]
    fn test_params_validation() {
        assert!(params(1).validate().is_ok());
        assert!(QuorumParams {
            quorum_percentage: 0.0,
            ..params(1)
        }
        .validate()
        .is_err());
        assert!(QuorumParams {
            quorum_percentage: 1.5,
            ..params(1)
        }
        .validate()
        .is_err());
        assert!(params(0).validate().is_err());
        assert!(matches!(
            QuorumParams {
                quorum_percentage: 0.004,
                ..params(1)
            }
            .validate(),
            Err(ConsensusError::InvalidParams(_))
        ));
        assert!(QuorumParams {
            quorum_percentage: 0.01,
            ..params(1)
        }
        .validate()
        .is_ok());
    }

    #[tokio::test]
    async fn test_two_of_three_achieves_quorum() {
        let (vals, keys) = validators(3);
        let (engine, set) = engine(vals, keys, &[(true, 0), (true, 0), (false, 0)], vec![]);
        let mut d = docket();

        let outcome = engine.seek_quorum(&mut d, &set, &params(2)).await.unwrap();
        assert!(outcome.is_achieved());
        assert_eq!(outcome.tally().approvals, 2);
        assert_eq!(d.consensus_state, ConsensusState::Approved);
        assert_eq!(d.consensus_votes.len(), 3);
    }

    #[tokio::test]
    async fn test_one_of_three_fails() {
        let (vals, keys) = validators(3);
        let (engine, set) = engine(vals, keys, &[(true, 0), (false, 0), (false, 0)], vec![]);
        let mut d = docket();

        let outcome = engine.seek_quorum(&mut d, &set, &params(2)).await.unwrap();
        assert_eq!(
            outcome,
            ConsensusOutcome::Failed {
                tally: VoteTally {
                    expected: 3,
                    approvals: 1,
                    rejections: 2,
                    invalid: 0,
                    duplicates: 0,
                },
                reason: FailureReason::Rejected,
            }
        );
        assert_eq!(d.consensus_state, ConsensusState::Rejected);
        assert!(d.consensus_votes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_votes_are_discarded() {
        let (vals, keys) = validators(3);
        let (engine, set) = engine(
            vals,
            keys,
            &[(true, 10), (true, 10_000), (true, 10_000)],
            vec![],
        );
        let mut d = docket();

        let outcome = engine.seek_quorum(&mut d, &set, &params(2)).await.unwrap();
        assert_eq!(
            outcome,
            ConsensusOutcome::Failed {
                tally: VoteTally {
                    expected: 3,
                    approvals: 1,
                    ..VoteTally::default()
                },
                reason: FailureReason::Timeout,
            }
        );
        assert_eq!(FailureReason::Timeout.code(), ErrorCode::ConsensusTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_and_foreign_votes_ignored() {
        let (vals, keys) = validators(2);
        let d = docket();
        let dup = ConsensusVote::signed(d.hash, vals[0].address.clone(), false, &vals[0].keypair);
        let outsider = Keypair::generate();
        let foreign = ConsensusVote::signed(d.hash, Address::new_unchecked("outsider"), true, &outsider);
        let wrong_docket =
            ConsensusVote::signed(Hash::from_bytes([7; 32]), vals[1].address.clone(), true, &vals[1].keypair);

        let (engine, set) = engine(
            vals,
            keys,
            &[(true, 0), (true, 50)],
            vec![dup, foreign, wrong_docket],
        );
        let mut d = d;
        let outcome = engine.seek_quorum(&mut d, &set, &params(2)).await.unwrap();

        // The scripted "reject" from validator-0 arrived first and wins.
        let tally = outcome.tally();
        assert_eq!(tally.invalid, 2);
        assert_eq!(tally.rejections, 1);
        assert_eq!(tally.approvals, 1);
        assert_eq!(tally.duplicates, 1);
        assert!(!outcome.is_achieved());
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_an_error() {
        let (_, keys) = validators(1);
        let engine = ConsensusEngine::new(Arc::new(DownPeers), keys);
        let set = [Address::new_unchecked("validator-0")].into_iter().collect();
        let mut d = docket();
        assert!(matches!(
            engine.seek_quorum(&mut d, &set, &params(1)).await,
            Err(ConsensusError::Broadcast(_))
        ));
        assert_eq!(d.consensus_state, ConsensusState::Pending);
    }

    #[tokio::test]
    async fn test_already_decided_docket_rejected() {
        let (vals, keys) = validators(1);
        let (engine, set) = engine(vals, keys, &[(true, 0)], vec![]);
        let mut d = docket();
        d.consensus_state = ConsensusState::Approved;
        assert!(matches!(
            engine.seek_quorum(&mut d, &set, &params(1)).await,
            Err(ConsensusError::NotPending(_))
        ));
    }
}

//! Outbound notifications from the orchestration loop.

use crate::state::LedgerState;
use docketchain_consensus::FailureReason;
use docketchain_core::Hash;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorEvent {
    DocketBuilt {
        ledger_id: String,
        sequence: u64,
        hash: Hash,
        included: usize,
        rejected: usize,
    },
    ConsensusAchieved {
        ledger_id: String,
        sequence: u64,
        hash: Hash,
        approvals: usize,
        received: usize,
    },
    ConsensusFailed {
        ledger_id: String,
        sequence: u64,
        hash: Hash,
        reason: FailureReason,
    },
    DocketPersisted {
        ledger_id: String,
        sequence: u64,
        hash: Hash,
    },
    StateChanged {
        ledger_id: String,
        from: LedgerState,
        to: LedgerState,
    },
    /// A ledger's loop gave up after exhausting retries.
    LedgerFaulted { ledger_id: String, error: String },
}

impl ValidatorEvent {
    pub fn ledger_id(&self) -> &str {
        match self {
            ValidatorEvent::DocketBuilt { ledger_id, .. }
            | ValidatorEvent::ConsensusAchieved { ledger_id, .. }
            | ValidatorEvent::ConsensusFailed { ledger_id, .. }
            | ValidatorEvent::DocketPersisted { ledger_id, .. }
            | ValidatorEvent::StateChanged { ledger_id, .. }
            | ValidatorEvent::LedgerFaulted { ledger_id, .. } => ledger_id,
        }
    }
}

/// Fan-out of [`ValidatorEvent`]s. Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ValidatorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ValidatorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValidatorEvent> {
        self.sender.subscribe()
    }
}

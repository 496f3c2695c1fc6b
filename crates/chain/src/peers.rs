//! Peer transport backed by voters living in this process.

use crate::clock::Clock;
use async_trait::async_trait;
use docketchain_consensus::{PeerBroadcast, PeerError, ValidationContext, VoteStream, Voter};
use docketchain_core::{Address, Docket};
use docketchain_storage::{DocketStore, StorageError};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

fn unavailable(e: StorageError) -> PeerError {
    PeerError::Unavailable(format!("voter history unavailable: {e}"))
}

/// Delivers dockets to local [`Voter`]s.
///
/// Voters read their view of the chain from a shared store. Validators in the
/// round with no local voter simply never answer.
pub struct InProcessPeers {
    voters: RwLock<HashMap<Address, Arc<Voter>>>,
    store: Arc<dyn DocketStore>,
    clock: Arc<dyn Clock>,
}

impl InProcessPeers {
    pub fn new(store: Arc<dyn DocketStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            voters: RwLock::new(HashMap::new()),
            store,
            clock,
        }
    }

    pub fn add_voter(&self, voter: Voter) {
        self.voters
            .write()
            .insert(voter.address().clone(), Arc::new(voter));
    }

    pub fn remove_voter(&self, address: &Address) -> bool {
        self.voters.write().remove(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.voters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.read().is_empty()
    }
}

#[async_trait]
impl PeerBroadcast for InProcessPeers {
    async fn broadcast(
        &self,
        docket: &Docket,
        validators: &BTreeSet<Address>,
    ) -> Result<VoteStream, PeerError> {
        let previous = match docket.sequence_number.checked_sub(1) {
            Some(seq) if !docket.is_genesis => self
                .store
                .docket_at(&docket.ledger_id, seq)
                .await
                .map_err(unavailable)?,
            _ => None,
        };
        let confirmed = self
            .store
            .confirmed_among(&docket.ledger_id, &docket.transaction_ids())
            .await
            .map_err(unavailable)?;
        let ctx = Arc::new(
            ValidationContext::new(docket.ledger_id.clone(), self.clock.now_millis())
                .with_confirmed(confirmed),
        );

        let voters: Vec<Arc<Voter>> = {
            let registered = self.voters.read();
            validators
                .iter()
                .filter_map(|address| registered.get(address).cloned())
                .collect()
        };
        debug!(
            ledger = %docket.ledger_id,
            sequence = docket.sequence_number,
            local = voters.len(),
            expected = validators.len(),
            "broadcasting docket to local voters"
        );

        let (tx, rx) = mpsc::channel(validators.len().max(1));
        let docket = Arc::new(docket.clone());
        for voter in voters {
            let tx = tx.clone();
            let docket = docket.clone();
            let previous = previous.clone();
            let ctx = ctx.clone();
            tokio::task::spawn_blocking(move || {
                let vote = voter.vote(&docket, previous.as_ref(), &ctx);
                // The round may already be over.
                let _ = tx.blocking_send(vote);
            });
        }
        Ok(rx)
    }
}

//! Genesis configuration carried in a ledger's first docket.

use crate::crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inputs for a ledger's genesis docket. Consumed once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub ledger_id: String,
    pub creator: Address,
    /// Ordered so the encoded metadata is deterministic.
    pub initial_validators: BTreeSet<Address>,
    pub initial_state: Vec<u8>,
}

impl GenesisConfig {
    pub fn new(
        ledger_id: impl Into<String>,
        creator: Address,
        initial_validators: impl IntoIterator<Item = Address>,
    ) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            creator,
            initial_validators: initial_validators.into_iter().collect(),
            initial_state: Vec::new(),
        }
    }

    pub fn with_initial_state(mut self, state: Vec<u8>) -> Self {
        self.initial_state = state;
        self
    }

    /// Encode for storage in `Docket::metadata`.
    pub fn to_metadata(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from a genesis docket's metadata.
    pub fn from_metadata(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

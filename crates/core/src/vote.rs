//! Signed approve/reject votes on a candidate docket.

use crate::crypto::{Address, Keypair, Signature};
use crate::hash::{FieldHasher, Hash};
use serde::{Deserialize, Serialize};

const VOTE_DOMAIN: &[u8] = b"docketchain/vote/v1";

/// One validator's verdict on one docket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusVote {
    pub docket_hash: Hash,
    pub voter: Address,
    pub approve: bool,
    pub signature: Signature,
}

impl ConsensusVote {
    /// The digest a voter signs: binds the docket hash to the verdict.
    pub fn signing_message(docket_hash: &Hash, approve: bool) -> Hash {
        FieldHasher::new(VOTE_DOMAIN)
            .hash(docket_hash)
            .bool(approve)
            .finish()
    }

    /// Build and sign a vote.
    pub fn signed(docket_hash: Hash, voter: Address, approve: bool, keypair: &Keypair) -> Self {
        let message = Self::signing_message(&docket_hash, approve);
        Self {
            docket_hash,
            voter,
            approve,
            signature: keypair.sign_hash(&message),
        }
    }

    pub fn message(&self) -> Hash {
        Self::signing_message(&self.docket_hash, self.approve)
    }
}

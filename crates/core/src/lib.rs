//! Core ledger primitives for docketchain.
//!
//! Everything in this crate is a plain value type with no I/O:
//! - Blake3 hashing and the canonical field encoder
//! - Addresses and Ed25519 signatures
//! - Transactions, dockets and consensus votes
//! - Genesis configuration
//! - The validation issue taxonomy

pub mod crypto;
pub mod docket;
pub mod genesis;
pub mod hash;
pub mod transaction;
pub mod validation;
pub mod vote;

// Re-export commonly used types at the crate root
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use docket::{now_millis, ConsensusState, Docket, GENESIS_PREVIOUS_HASH};
pub use genesis::GenesisConfig;
pub use hash::{hash, FieldHasher, Hash, H256};
pub use transaction::{Payload, SchemaRef, Transaction};
pub use validation::{into_result, ErrorCode, ValidationFailure, ValidationIssue, ValidationResult};
pub use vote::ConsensusVote;

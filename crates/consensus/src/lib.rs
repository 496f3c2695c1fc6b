//! Docket validation and quorum voting for docketchain.
//!
//! The validators in this crate never perform I/O:
//! - `ChainValidator`: hash recomputation and chain-link checks
//! - `TransactionValidator`: structure, schema, authenticity and replay checks
//! - `GenesisManager`: construction and validation of a ledger's first docket
//! - `review_docket` / `Voter`: a validator's independent verdict on a candidate
//!
//! `ConsensusEngine` is the only async component; it drives a vote round over
//! the `PeerBroadcast` port.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docketchain_consensus::{JsonSchemaRegistry, KeyRegistry, TransactionValidator, ValidationContext};
//! use docketchain_core::{Address, Keypair, Payload, SchemaRef, Transaction};
//!
//! let keypair = Keypair::generate();
//! let alice = Address::new_unchecked("alice");
//! let keys = Arc::new(KeyRegistry::new());
//! keys.register(alice.clone(), keypair.public_key.clone());
//! let schemas = Arc::new(JsonSchemaRegistry::new());
//! schemas.register(SchemaRef::new("note/v1"), ["text"]);
//!
//! let validator = TransactionValidator::new(keys, schemas);
//! let tx = Transaction::new(
//!     "ledger-1",
//!     alice,
//!     None,
//!     Payload::new(SchemaRef::new("note/v1"), br#"{"text":"hi"}"#.to_vec()),
//!     1_700_000_000_000,
//!     None,
//! )
//! .signed(&keypair);
//!
//! validator
//!     .validate(&tx, &ValidationContext::new("ledger-1", 1_700_000_000_000))
//!     .unwrap();
//! ```

pub mod chain;
pub mod genesis;
pub mod ports;
pub mod quorum;
pub mod registry;
pub mod review;
pub mod validator;

// Re-export commonly used types
pub use chain::ChainValidator;
pub use genesis::{GenesisError, GenesisManager};
pub use ports::{PeerBroadcast, PeerError, SchemaValidator, SignatureVerifier, VoteStream};
pub use quorum::{
    quorum_reached, ConsensusEngine, ConsensusError, ConsensusOutcome, FailureReason,
    QuorumParams, VoteTally,
};
pub use registry::{JsonSchemaRegistry, KeyRegistry};
pub use review::{review_docket, DocketVerdict, Voter};
pub use validator::{
    check_history, check_structure, TransactionRules, TransactionValidator, ValidationContext,
};

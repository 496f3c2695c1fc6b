//! Construction of a ledger's first docket.

use crate::chain::ChainValidator;
use docketchain_core::{
    now_millis, Address, ConsensusState, Docket, GenesisConfig, ValidationFailure,
    GENESIS_PREVIOUS_HASH,
};
use thiserror::Error;

/// Errors that can occur while creating a genesis docket.
#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("ledger id must not be empty")]
    EmptyLedgerId,

    #[error("initial validator set must not be empty")]
    EmptyValidatorSet,

    #[error("malformed creator address {0}")]
    InvalidCreator(Address),

    #[error("malformed validator address {0}")]
    InvalidValidator(Address),

    #[error("failed to encode genesis config: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("genesis docket is invalid: {0}")]
    Invalid(ValidationFailure),
}

pub type Result<T> = std::result::Result<T, GenesisError>;

/// Genesis docket factory.
pub struct GenesisManager;

impl GenesisManager {
    /// Check a config before anything is built from it.
    pub fn validate_config(config: &GenesisConfig) -> Result<()> {
        if config.ledger_id.trim().is_empty() {
            return Err(GenesisError::EmptyLedgerId);
        }
        if config.initial_validators.is_empty() {
            return Err(GenesisError::EmptyValidatorSet);
        }
        if !config.creator.is_well_formed() {
            return Err(GenesisError::InvalidCreator(config.creator.clone()));
        }
        if let Some(bad) = config
            .initial_validators
            .iter()
            .find(|v| !v.is_well_formed())
        {
            return Err(GenesisError::InvalidValidator(bad.clone()));
        }
        Ok(())
    }

    /// Create a genesis docket stamped with the current time.
    pub fn create_genesis(config: &GenesisConfig) -> Result<Docket> {
        Self::create_genesis_at(config, now_millis())
    }

    /// Create a genesis docket with an explicit timestamp.
    ///
    /// The result is already `Approved`: the creator is authoritative and no
    /// vote is held.
    pub fn create_genesis_at(config: &GenesisConfig, timestamp: u64) -> Result<Docket> {
        Self::validate_config(config)?;

        let mut docket = Docket::new(
            config.ledger_id.clone(),
            0,
            GENESIS_PREVIOUS_HASH,
            timestamp,
            config.creator.clone(),
            Vec::new(),
        );
        docket.is_genesis = true;
        docket.metadata = config.to_metadata()?;
        docket.seal();
        docket.consensus_state = ConsensusState::Approved;

        ChainValidator::validate_genesis(&docket).map_err(GenesisError::Invalid)?;
        Ok(docket)
    }

    pub fn is_genesis_valid(docket: &Docket) -> bool {
        ChainValidator::validate_genesis(docket).is_ok()
    }

    /// Recover the config a genesis docket was built from.
    pub fn config_of(docket: &Docket) -> Option<GenesisConfig> {
        if !docket.is_genesis {
            return None;
        }
        GenesisConfig::from_metadata(&docket.metadata).ok()
    }
}

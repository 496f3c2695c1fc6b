//! Validator configuration.
//!
//! Loaded from TOML, then overridden by `DOCKETCHAIN_*` environment
//! variables. Every section and field is optional in the file; missing values
//! take their defaults.
//!
//! ```toml
//! [mempool]
//! capacity = 10000
//! default_ttl_ms = 3600000
//!
//! [builder]
//! max_transactions = 100
//! allow_empty = false
//!
//! [consensus]
//! quorum_percentage = 0.67
//! minimum_validators = 1
//! vote_timeout_ms = 5000
//!
//! [orchestrator]
//! node_address = "validator-A"
//! cycle_interval_ms = 1000
//! ```

use crate::builder::BuilderConfig;
use crate::mempool::MempoolConfig;
use docketchain_consensus::QuorumParams;
use docketchain_core::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    Env { var: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Voting thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub quorum_percentage: f64,
    pub minimum_validators: usize,
    pub vote_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let params = QuorumParams::default();
        Self {
            quorum_percentage: params.quorum_percentage,
            minimum_validators: params.minimum_validators,
            vote_timeout_ms: params.vote_timeout.as_millis() as u64,
        }
    }
}

impl ConsensusConfig {
    pub fn params(&self) -> QuorumParams {
        QuorumParams {
            quorum_percentage: self.quorum_percentage,
            minimum_validators: self.minimum_validators,
            vote_timeout: Duration::from_millis(self.vote_timeout_ms),
        }
    }
}

/// Bounded exponential backoff for collaborator failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per cycle, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Per-node orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Address this node builds dockets as.
    pub node_address: String,
    pub cycle_interval_ms: u64,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            node_address: "validator-1".to_string(),
            cycle_interval_ms: 1_000,
            event_buffer: 256,
            retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn address(&self) -> Address {
        Address::new_unchecked(self.node_address.clone())
    }
}

/// Top-level validator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub mempool: MempoolConfig,
    pub builder: BuilderConfig,
    pub consensus: ConsensusConfig,
    pub orchestrator: OrchestratorConfig,
}

impl ValidatorConfig {
    /// Load from a TOML file and apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply `DOCKETCHAIN_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &str,
            slot: &mut T,
        ) -> Result<()> {
            if let Some(value) = lookup(var) {
                *slot = value.trim().parse().map_err(|_| ConfigError::Env {
                    var: var.to_string(),
                    value,
                })?;
            }
            Ok(())
        }

        parsed(&lookup, "DOCKETCHAIN_MEMPOOL_CAPACITY", &mut self.mempool.capacity)?;
        parsed(&lookup, "DOCKETCHAIN_MEMPOOL_TTL_MS", &mut self.mempool.default_ttl_ms)?;
        parsed(&lookup, "DOCKETCHAIN_MAX_TRANSACTIONS", &mut self.builder.max_transactions)?;
        parsed(&lookup, "DOCKETCHAIN_ALLOW_EMPTY", &mut self.builder.allow_empty)?;
        parsed(&lookup, "DOCKETCHAIN_QUORUM_PERCENTAGE", &mut self.consensus.quorum_percentage)?;
        parsed(&lookup, "DOCKETCHAIN_MINIMUM_VALIDATORS", &mut self.consensus.minimum_validators)?;
        parsed(&lookup, "DOCKETCHAIN_VOTE_TIMEOUT_MS", &mut self.consensus.vote_timeout_ms)?;
        parsed(&lookup, "DOCKETCHAIN_CYCLE_INTERVAL_MS", &mut self.orchestrator.cycle_interval_ms)?;
        if let Some(address) = lookup("DOCKETCHAIN_NODE_ADDRESS") {
            self.orchestrator.node_address = address;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mempool.capacity == 0 {
            return Err(ConfigError::Invalid("mempool.capacity must be positive".into()));
        }
        if self.mempool.default_ttl_ms == 0 {
            return Err(ConfigError::Invalid("mempool.default_ttl_ms must be positive".into()));
        }
        if self.builder.max_transactions == 0 {
            return Err(ConfigError::Invalid("builder.max_transactions must be positive".into()));
        }
        self.consensus
            .params()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !self.orchestrator.address().is_well_formed() {
            return Err(ConfigError::Invalid(format!(
                "orchestrator.node_address {:?} is not a valid address",
                self.orchestrator.node_address
            )));
        }
        if self.orchestrator.cycle_interval_ms == 0 {
            return Err(ConfigError::Invalid("orchestrator.cycle_interval_ms must be positive".into()));
        }
        if self.orchestrator.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("orchestrator.retry.max_attempts must be positive".into()));
        }
        if self.orchestrator.event_buffer == 0 {
            return Err(ConfigError::Invalid("orchestrator.event_buffer must be positive".into()));
        }
        Ok(())
    }
}

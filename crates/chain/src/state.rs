//! Per-ledger lifecycle state and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one ledger's validation loop.
///
/// `Stopped → Starting → Running ⇄ Pausing/Paused → Stopping → Stopped`,
/// with `Error` reachable from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Stopping,
    Error,
}

impl LedgerState {
    /// A loop task exists for the ledger.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LedgerState::Starting
                | LedgerState::Running
                | LedgerState::Pausing
                | LedgerState::Paused
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerState::Stopped => "stopped",
            LedgerState::Starting => "starting",
            LedgerState::Running => "running",
            LedgerState::Pausing => "pausing",
            LedgerState::Paused => "paused",
            LedgerState::Stopping => "stopping",
            LedgerState::Error => "error",
        }
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative per-ledger counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounters {
    pub cycles: u64,
    pub dockets_built: u64,
    pub dockets_confirmed: u64,
    pub consensus_failures: u64,
    pub transactions_confirmed: u64,
    pub transactions_rejected: u64,
    pub retries: u64,
}

/// Point-in-time view of a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub ledger_id: String,
    pub state: LedgerState,
    /// Sequence of the last confirmed docket, if the ledger has any.
    pub last_sequence: Option<u64>,
    pub mempool_size: usize,
    pub counters: LedgerCounters,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

//! Engine configuration

use serde::{Deserialize, Serialize};

/// Which committed history entries a proposal is transformed against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebaseWindow {
    /// Entries whose sequence number is strictly less than the proposal's
    #[default]
    Preceding,
    /// Entries whose sequence number is strictly greater than the proposal's
    Unseen,
}

impl RebaseWindow {
    /// Whether a committed entry at `committed` takes part in rebasing a proposal at `base`
    pub fn includes(self, base: u64, committed: u64) -> bool {
        match self {
            RebaseWindow::Preceding => committed < base,
            RebaseWindow::Unseen => committed > base,
        }
    }
}

impl std::str::FromStr for RebaseWindow {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preceding" => Ok(RebaseWindow::Preceding),
            "unseen" => Ok(RebaseWindow::Unseen),
            _ => Err(crate::Error::Validation(format!("Unknown rebase window: {}", s))),
        }
    }
}

/// Tunables shared by every session a manager owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rebase_window: RebaseWindow,
    /// Committed operations kept in memory per document (0 = unbounded)
    pub max_history: usize,
    /// Capacity of the commit broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rebase_window: RebaseWindow::default(),
            max_history: 0,
            broadcast_capacity: 10_000,
        }
    }
}

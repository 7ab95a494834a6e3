use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-token cluster lifecycle.
///
/// There is no internal timer: transitions happen when `process_trade_event`
/// writes to the store or when a store TTL lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenClusterState {
    /// No bucket for the current window and no cooldown
    Idle,
    /// Bucket exists below threshold
    Accumulating { wallets: usize },
    /// A signal was emitted and the cooldown marker is live
    Signaled,
}

impl TokenClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClusterState::Idle => "IDLE",
            TokenClusterState::Accumulating { .. } => "ACCUMULATING",
            TokenClusterState::Signaled => "SIGNALED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: TokenClusterState) -> bool {
        use TokenClusterState::*;

        match (self, target) {
            // First qualifying event creates the bucket
            (Idle, Accumulating { .. }) => true,
            // min_cluster_size of 1 crosses immediately
            (Idle, Signaled) => true,

            (Accumulating { .. }, Accumulating { .. }) => true,
            (Accumulating { .. }, Signaled) => true,
            // Bucket TTL lapsed before threshold
            (Accumulating { .. }, Idle) => true,

            // Cooldown TTL lapsed
            (Signaled, Idle) => true,
            // Cooldown lapsed while a newer bucket is already filling
            (Signaled, Accumulating { .. }) => true,

            _ => false,
        }
    }

    /// Get valid next state kinds from current state
    pub fn valid_transitions(&self) -> Vec<&'static str> {
        use TokenClusterState::*;

        match self {
            Idle => vec!["ACCUMULATING", "SIGNALED"],
            Accumulating { .. } => vec!["ACCUMULATING", "SIGNALED", "IDLE"],
            Signaled => vec!["IDLE", "ACCUMULATING"],
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, TokenClusterState::Signaled)
    }
}

impl fmt::Display for TokenClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenClusterState::Accumulating { wallets } => {
                write!(f, "{} ({} wallets)", self.as_str(), wallets)
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

//! Conflict resolution policy.
//!
//! Conflicts are resolved on the server; the client only sends its preferred
//! policy and records the one the server applied.

use serde::{Deserialize, Serialize};

/// Policy for resolving conflicting rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictResolutionPolicy {
    /// Server version wins.
    #[default]
    ServerWins,
    /// Client version wins.
    ClientWins,
}

impl ConflictResolutionPolicy {
    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictResolutionPolicy::ServerWins => 1,
            ConflictResolutionPolicy::ClientWins => 2,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictResolutionPolicy::ServerWins),
            2 => Some(ConflictResolutionPolicy::ClientWins),
            _ => None,
        }
    }

    /// Returns the policy as seen from the other side of the exchange.
    pub fn reversed(&self) -> Self {
        match self {
            ConflictResolutionPolicy::ServerWins => ConflictResolutionPolicy::ClientWins,
            ConflictResolutionPolicy::ClientWins => ConflictResolutionPolicy::ServerWins,
        }
    }
}

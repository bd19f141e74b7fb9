use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single delegation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationState {
    /// Registered, nothing dispatched yet
    Pending,
    /// Initiated event emitted, task about to dispatch
    Initiated,
    /// Features handed to the downstream subsystem
    InProgress,
    /// Every feature completed
    Completed,
    /// Some features completed, the rest failed
    Partial,
    /// No feature completed
    Failed,
    /// Cancelled by a caller
    Cancelled,
    /// Recovery handler is about to re-run work
    Retrying,
}

impl DelegationState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if work may still be running for this delegation
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Initiated | Self::InProgress | Self::Retrying
        )
    }

    /// Check if a final result can be aggregated in this state
    pub fn has_result(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    /// Transitions the lifecycle allows. Recovery may move a failed or partial
    /// delegation back through `Retrying`; completed and cancelled are final.
    pub fn can_transition_to(&self, next: DelegationState) -> bool {
        match (self, next) {
            (from, to) if *from == to => true,
            (Self::Completed | Self::Cancelled, _) => false,
            (_, Self::Pending) => false,
            (Self::Failed, Self::Initiated | Self::InProgress) => false,
            _ => true,
        }
    }

    /// Derives the delegation state from per-feature counts:
    /// all completed => `Completed`, all failed => `Failed`,
    /// every feature settled with a mix => `Partial`, otherwise `InProgress`.
    pub fn derive(total: usize, completed: usize, failed: usize) -> Self {
        if total > 0 && completed == total {
            Self::Completed
        } else if total > 0 && failed == total && completed == 0 {
            Self::Failed
        } else if completed > 0 && failed > 0 && completed + failed == total {
            Self::Partial
        } else {
            Self::InProgress
        }
    }
}

impl fmt::Display for DelegationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Initiated => write!(f, "initiated"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

impl std::str::FromStr for DelegationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "initiated" => Ok(Self::Initiated),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "retrying" => Ok(Self::Retrying),
            _ => Err(format!("Invalid delegation state: {s}")),
        }
    }
}

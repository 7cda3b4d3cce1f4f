use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Delivery state of a device command.
///
/// `Pending → Sent → Acknowledged → Completed` is the success path. A retry
/// moves a failed or timed out attempt back to `Pending`; `Failed` and
/// `Timeout` are only reached once the retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Expired,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled | Self::Expired
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn transition(&self, to: Self, allowed: bool) -> Result<Self> {
        if allowed {
            Ok(to)
        } else {
            Err(DomainError::InvalidTransition { from: *self, to })
        }
    }

    /// Transport accepted the command
    pub fn to_sent(&self) -> Result<Self> {
        self.transition(Self::Sent, matches!(self, Self::Pending))
    }

    /// Device confirmed receipt
    pub fn to_acknowledged(&self) -> Result<Self> {
        self.transition(Self::Acknowledged, matches!(self, Self::Sent))
    }

    pub fn to_completed(&self) -> Result<Self> {
        self.transition(
            Self::Completed,
            matches!(self, Self::Sent | Self::Acknowledged),
        )
    }

    /// Back to the queue for another attempt
    pub fn to_retry(&self) -> Result<Self> {
        self.transition(Self::Pending, !self.is_terminal())
    }

    pub fn to_failed(&self) -> Result<Self> {
        self.transition(Self::Failed, !self.is_terminal())
    }

    pub fn to_timeout(&self) -> Result<Self> {
        self.transition(Self::Timeout, matches!(self, Self::Pending | Self::Sent))
    }

    pub fn to_cancelled(&self) -> Result<Self> {
        self.transition(Self::Cancelled, matches!(self, Self::Pending))
    }

    pub fn to_expired(&self) -> Result<Self> {
        self.transition(Self::Expired, matches!(self, Self::Pending))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl Default for CommandStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

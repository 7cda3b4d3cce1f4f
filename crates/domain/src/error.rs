use thiserror::Error;

use crate::command::CommandStatus;
use crate::ids::{CommandId, NotificationId, RuleId};

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid rule definition: {0}")]
    InvalidRuleDefinition(String),

    #[error("Rule {0} is no longer indexed or enabled")]
    RuleIndexStale(RuleId),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Command not found: {0}")]
    CommandNotFound(CommandId),

    #[error("Invalid command transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: CommandStatus,
        to: CommandStatus,
    },

    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    #[error("Repository error: {0}")]
    Repository(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Failure to hand a command over to the device transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Device {0} has no known route")]
    UnknownDevice(String),

    #[error("Failed to encode command: {0}")]
    Encoding(String),

    #[error("Publish rejected: {0}")]
    Rejected(String),
}

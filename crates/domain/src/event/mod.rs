use serde::{Deserialize, Serialize};

mod publisher;
pub use publisher::EventPublisher;

use crate::command::Command;
use crate::execution::SkipReason;
use crate::ids::{ExecutionId, NotificationId, RoomId, RuleId};
use crate::notification::{NotificationLevel, NotificationType};
use crate::time::Timestamp;

/// Facts emitted by the engine.
///
/// Command events carry a snapshot of the command taken right after the
/// transition they describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    RuleFired {
        rule_id: RuleId,
        room_id: RoomId,
        execution_id: ExecutionId,
        value: f64,
        timestamp: Timestamp,
    },

    RuleSkipped {
        rule_id: RuleId,
        room_id: RoomId,
        execution_id: ExecutionId,
        reason: SkipReason,
        timestamp: Timestamp,
    },

    CommandQueued {
        command: Command,
        timestamp: Timestamp,
    },

    CommandSent {
        command: Command,
        timestamp: Timestamp,
    },

    CommandAcknowledged {
        command: Command,
        timestamp: Timestamp,
    },

    /// An attempt failed or timed out and another one is scheduled
    CommandRetryScheduled {
        command: Command,
        reason: String,
        delay_ms: i64,
        timestamp: Timestamp,
    },

    CommandCompleted {
        command: Command,
        timestamp: Timestamp,
    },

    /// Delivery failed with no retries left
    CommandFailed {
        command: Command,
        timestamp: Timestamp,
    },

    /// Timed out with no retries left
    CommandTimedOut {
        command: Command,
        timestamp: Timestamp,
    },

    CommandCancelled {
        command: Command,
        timestamp: Timestamp,
    },

    CommandExpired {
        command: Command,
        timestamp: Timestamp,
    },

    NotificationRaised {
        notification_id: NotificationId,
        level: NotificationLevel,
        kind: NotificationType,
        timestamp: Timestamp,
    },

    NotificationEscalated {
        notification_id: NotificationId,
        escalation_level: u32,
        timestamp: Timestamp,
    },
}

impl DomainEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::RuleFired { timestamp, .. }
            | Self::RuleSkipped { timestamp, .. }
            | Self::CommandQueued { timestamp, .. }
            | Self::CommandSent { timestamp, .. }
            | Self::CommandAcknowledged { timestamp, .. }
            | Self::CommandRetryScheduled { timestamp, .. }
            | Self::CommandCompleted { timestamp, .. }
            | Self::CommandFailed { timestamp, .. }
            | Self::CommandTimedOut { timestamp, .. }
            | Self::CommandCancelled { timestamp, .. }
            | Self::CommandExpired { timestamp, .. }
            | Self::NotificationRaised { timestamp, .. }
            | Self::NotificationEscalated { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RuleFired { .. } => "RuleFired",
            Self::RuleSkipped { .. } => "RuleSkipped",
            Self::CommandQueued { .. } => "CommandQueued",
            Self::CommandSent { .. } => "CommandSent",
            Self::CommandAcknowledged { .. } => "CommandAcknowledged",
            Self::CommandRetryScheduled { .. } => "CommandRetryScheduled",
            Self::CommandCompleted { .. } => "CommandCompleted",
            Self::CommandFailed { .. } => "CommandFailed",
            Self::CommandTimedOut { .. } => "CommandTimedOut",
            Self::CommandCancelled { .. } => "CommandCancelled",
            Self::CommandExpired { .. } => "CommandExpired",
            Self::NotificationRaised { .. } => "NotificationRaised",
            Self::NotificationEscalated { .. } => "NotificationEscalated",
        }
    }

    /// Command snapshot for command events
    pub fn command(&self) -> Option<&Command> {
        match self {
            Self::CommandQueued { command, .. }
            | Self::CommandSent { command, .. }
            | Self::CommandAcknowledged { command, .. }
            | Self::CommandRetryScheduled { command, .. }
            | Self::CommandCompleted { command, .. }
            | Self::CommandFailed { command, .. }
            | Self::CommandTimedOut { command, .. }
            | Self::CommandCancelled { command, .. }
            | Self::CommandExpired { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Whether this event closes a command's lifecycle
    pub fn is_command_terminal(&self) -> bool {
        matches!(
            self,
            Self::CommandCompleted { .. }
                | Self::CommandFailed { .. }
                | Self::CommandTimedOut { .. }
                | Self::CommandCancelled { .. }
                | Self::CommandExpired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandDefaults, CommandRequest};
    use crate::ids::DeviceId;
    use chrono::Utc;
    use serde_json::json;

    fn command() -> Command {
        let request = CommandRequest::manual(
            DeviceId::new("fan-1").unwrap(),
            "turn_on_fan",
            json!({}),
            "user-1",
        );
        Command::issue(request, &CommandDefaults::default(), Utc::now())
    }

    #[test]
    fn test_command_event_exposes_snapshot() {
        let cmd = command();
        let event = DomainEvent::CommandCompleted {
            command: cmd.clone(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "CommandCompleted");
        assert_eq!(event.command().map(|c| c.id), Some(cmd.id));
        assert!(event.is_command_terminal());
    }

    #[test]
    fn test_event_serialization() {
        let event = DomainEvent::RuleSkipped {
            rule_id: RuleId::new("r1").unwrap(),
            room_id: RoomId::new("room-1").unwrap(),
            execution_id: ExecutionId::new(),
            reason: SkipReason::CooldownActive,
            timestamp: Utc::now(),
        };

        let json_str = serde_json::to_string(&event).unwrap();
        assert!(json_str.contains("\"type\":\"RuleSkipped\""));
        assert!(json_str.contains("cooldown_active"));

        let deserialized: DomainEvent = serde_json::from_str(&json_str).unwrap();
        assert_eq!(deserialized.event_type(), "RuleSkipped");
        assert!(deserialized.command().is_none());
    }
}

use serde::{Deserialize, Serialize};

use super::Command;
use crate::ids::{CommandId, DeviceId, RoomId};
use crate::time::Timestamp;

/// One delivery attempt handed to a `CommandTransport`
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub device_id: DeviceId,
    pub room_id: Option<RoomId>,
    pub attempt: u32,
    pub payload: CommandPayload,
}

/// Wire body published to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command_id: CommandId,
    pub command: String,
    pub params: serde_json::Value,
    pub timestamp: Timestamp,
}

impl CommandEnvelope {
    pub fn for_attempt(command: &Command, now: Timestamp) -> Self {
        Self {
            device_id: command.device_id.clone(),
            room_id: command.room_id.clone(),
            attempt: command.retry_count,
            payload: CommandPayload {
                command_id: command.id,
                command: command.command.clone(),
                params: command.params.clone(),
                timestamp: now,
            },
        }
    }

    pub fn command_id(&self) -> CommandId {
        self.payload.command_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandDefaults, CommandRequest};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let request = CommandRequest::manual(
            DeviceId::new("light-1").unwrap(),
            "set_light_intensity",
            json!({ "intensity": 40 }),
            "user-1",
        );
        let command = Command::issue(request, &CommandDefaults::default(), Utc::now());
        let envelope = CommandEnvelope::for_attempt(&command, Utc::now());

        let body = serde_json::to_value(&envelope.payload).unwrap();
        assert_eq!(body["command_id"], json!(command.id.to_string()));
        assert_eq!(body["command"], "set_light_intensity");
        assert_eq!(body["params"]["intensity"], 40);
        assert!(body["timestamp"].is_string());
        assert_eq!(envelope.attempt, 0);
    }
}

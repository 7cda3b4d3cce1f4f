use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::ids::{DeviceId, ExecutionId, RoomId, RuleId};
use crate::rule::{MAX_PRIORITY, MIN_PRIORITY};
use crate::time::Timestamp;

/// Principal recorded on automation-originated commands
pub const SYSTEM_PRINCIPAL: &str = "system";

/// Commands that carry a mandatory parameter
const REQUIRED_PARAMS: &[(&str, &str)] = &[
    ("set_temperature", "temperature"),
    ("set_humidity", "humidity"),
    ("set_light_intensity", "intensity"),
];

/// Where a command came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandOrigin {
    Automation {
        rule_id: RuleId,
        execution_id: ExecutionId,
    },
    Manual,
}

impl CommandOrigin {
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self {
            Self::Automation { execution_id, .. } => Some(*execution_id),
            Self::Manual => None,
        }
    }

    pub fn rule_id(&self) -> Option<&RuleId> {
        match self {
            Self::Automation { rule_id, .. } => Some(rule_id),
            Self::Manual => None,
        }
    }

    pub fn is_automation(&self) -> bool {
        matches!(self, Self::Automation { .. })
    }
}

/// Input to the dispatcher. Unset limits fall back to the dispatcher's
/// configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub device_id: DeviceId,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub issued_by: String,
    pub origin: CommandOrigin,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

impl CommandRequest {
    pub fn manual(
        device_id: DeviceId,
        command: impl Into<String>,
        params: serde_json::Value,
        issued_by: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            room_id: None,
            command: command.into(),
            params,
            issued_by: issued_by.into(),
            origin: CommandOrigin::Manual,
            priority: None,
            max_retries: None,
            timeout_secs: None,
            expires_at: None,
        }
    }

    pub fn automation(
        rule_id: RuleId,
        execution_id: ExecutionId,
        device_id: DeviceId,
        room_id: RoomId,
        command: impl Into<String>,
        params: serde_json::Value,
        priority: u8,
    ) -> Self {
        Self {
            device_id,
            room_id: Some(room_id),
            command: command.into(),
            params,
            issued_by: SYSTEM_PRINCIPAL.to_string(),
            origin: CommandOrigin::Automation {
                rule_id,
                execution_id,
            },
            priority: Some(priority),
            max_retries: None,
            timeout_secs: None,
            expires_at: None,
        }
    }

    pub fn with_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DomainError::InvalidCommand(msg));

        let command = self.command.trim();
        if command.is_empty() {
            return invalid("Command cannot be empty".to_string());
        }

        if !self.params.is_object() && !self.params.is_null() {
            return invalid(format!("Parameters for {command} must be a JSON object"));
        }

        for (name, param) in REQUIRED_PARAMS {
            if command.eq_ignore_ascii_case(name) && self.params.get(param).is_none() {
                return invalid(format!("{command} requires a '{param}' parameter"));
            }
        }

        if let Some(priority) = self.priority {
            if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                return invalid(format!(
                    "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"
                ));
            }
        }

        if self.timeout_secs == Some(0) {
            return invalid("Timeout must be at least one second".to_string());
        }

        Ok(())
    }
}

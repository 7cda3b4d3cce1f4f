use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::{NotificationLevel, NotificationType};
use crate::ids::{CommandId, DeviceId, ExecutionId, NotificationId, RoomId, RuleId};
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
    Acknowledged,
    Escalated,
    Resolved,
    Expired,
    Dismissed,
}

impl NotificationStatus {
    /// Still waiting on a human
    pub fn awaits_acknowledgment(&self) -> bool {
        matches!(self, Self::Unread | Self::Read | Self::Escalated)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Expired | Self::Dismissed)
    }
}

/// Everything needed to raise a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDraft {
    pub level: NotificationLevel,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub room_id: Option<RoomId>,
    pub device_id: Option<DeviceId>,
    pub rule_id: Option<RuleId>,
    pub command_id: Option<CommandId>,
    pub execution_id: Option<ExecutionId>,
    pub action_required: bool,
    pub auto_acknowledge_after_minutes: Option<u32>,
    pub expires_at: Option<Timestamp>,
}

impl NotificationDraft {
    pub fn new(
        level: NotificationLevel,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            kind,
            title: title.into(),
            message: message.into(),
            room_id: None,
            device_id: None,
            rule_id: None,
            command_id: None,
            execution_id: None,
            action_required: false,
            auto_acknowledge_after_minutes: None,
            expires_at: None,
        }
    }

    pub fn room(mut self, room_id: Option<RoomId>) -> Self {
        self.room_id = room_id;
        self
    }

    pub fn device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn rule(mut self, rule_id: Option<RuleId>) -> Self {
        self.rule_id = rule_id;
        self
    }

    pub fn command(mut self, command_id: CommandId) -> Self {
        self.command_id = Some(command_id);
        self
    }

    pub fn execution(mut self, execution_id: Option<ExecutionId>) -> Self {
        self.execution_id = execution_id;
        self
    }

    pub fn action_required(mut self) -> Self {
        self.action_required = true;
        self
    }

    pub fn auto_acknowledge_after(mut self, minutes: u32) -> Self {
        self.auto_acknowledge_after_minutes = Some(minutes);
        self
    }

    pub fn expires_at(mut self, at: Timestamp) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Level weight, plus 50 for critical types or 20 for warning types,
    /// plus 30 when action is required
    pub fn priority_score(&self) -> u32 {
        let mut score = self.level.weight();
        if self.kind.is_critical() {
            score += 50;
        } else if self.kind.is_warning() {
            score += 20;
        }
        if self.action_required {
            score += 30;
        }
        score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub level: NotificationLevel,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub room_id: Option<RoomId>,
    pub device_id: Option<DeviceId>,
    pub rule_id: Option<RuleId>,
    pub command_id: Option<CommandId>,
    pub execution_id: Option<ExecutionId>,
    pub status: NotificationStatus,
    pub action_required: bool,
    pub priority_score: u32,
    pub escalation_level: u32,
    pub escalated_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<Timestamp>,
    pub acknowledgment_note: Option<String>,
    pub resolved_at: Option<Timestamp>,
    pub resolution_note: Option<String>,
    pub auto_acknowledge: bool,
    pub auto_acknowledge_after_minutes: Option<u32>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn raise(draft: NotificationDraft, now: Timestamp) -> Self {
        let priority_score = draft.priority_score();
        Self {
            id: NotificationId::new(),
            level: draft.level,
            kind: draft.kind,
            title: draft.title,
            message: draft.message,
            room_id: draft.room_id,
            device_id: draft.device_id,
            rule_id: draft.rule_id,
            command_id: draft.command_id,
            execution_id: draft.execution_id,
            status: NotificationStatus::Unread,
            action_required: draft.action_required,
            priority_score,
            escalation_level: 0,
            escalated_at: None,
            read_at: None,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledgment_note: None,
            resolved_at: None,
            resolution_note: None,
            auto_acknowledge: draft.auto_acknowledge_after_minutes.is_some(),
            auto_acknowledge_after_minutes: draft.auto_acknowledge_after_minutes,
            expires_at: draft.expires_at,
            created_at: now,
        }
    }

    pub fn mark_read(&mut self, now: Timestamp) -> bool {
        if self.status != NotificationStatus::Unread {
            return false;
        }
        self.status = NotificationStatus::Read;
        self.read_at = Some(now);
        true
    }

    pub fn acknowledge(&mut self, by: impl Into<String>, note: Option<String>, now: Timestamp) -> bool {
        if !self.status.awaits_acknowledgment() {
            return false;
        }
        self.status = NotificationStatus::Acknowledged;
        self.acknowledged_by = Some(by.into());
        self.acknowledged_at = Some(now);
        self.acknowledgment_note = note;
        true
    }

    pub fn resolve(&mut self, note: Option<String>, now: Timestamp) -> bool {
        if self.status.is_closed() {
            return false;
        }
        self.status = NotificationStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolution_note = note;
        true
    }

    pub fn dismiss(&mut self) -> bool {
        if self.status.is_closed() {
            return false;
        }
        self.status = NotificationStatus::Dismissed;
        true
    }

    pub fn expire_if_due(&mut self, now: Timestamp) -> bool {
        let due = self.expires_at.is_some_and(|at| at < now);
        if !due || !self.status.awaits_acknowledgment() {
            return false;
        }
        self.status = NotificationStatus::Expired;
        true
    }

    pub fn auto_acknowledge_if_due(&mut self, now: Timestamp) -> bool {
        let Some(minutes) = self.auto_acknowledge_after_minutes else {
            return false;
        };
        if !self.auto_acknowledge || now - self.created_at <= Duration::minutes(i64::from(minutes)) {
            return false;
        }
        self.acknowledge("system", Some("Auto-acknowledged".to_string()), now)
    }

    /// Bump the escalation level when nobody acknowledged within `after`
    /// since creation or the previous escalation
    pub fn escalate_if_due(&mut self, now: Timestamp, after: Duration, max_level: u32) -> bool {
        if !self.status.awaits_acknowledgment() || self.escalation_level >= max_level {
            return false;
        }
        let since = self.escalated_at.unwrap_or(self.created_at);
        if now - since < after {
            return false;
        }
        self.status = NotificationStatus::Escalated;
        self.escalation_level += 1;
        self.escalated_at = Some(now);
        true
    }
}

use serde::{Deserialize, Serialize};

use crate::ids::{CommandId, DeviceId, ExecutionId, RoomId, RuleId};
use crate::rule::AutomationRule;
use crate::time::Timestamp;

/// Why a rule whose condition held did not fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CooldownActive,
    RateLimitExceeded,
    OutsideActiveWindow,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CooldownActive => "cooldown_active",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::OutsideActiveWindow => "outside_active_window",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Success,
    Failed,
    Skipped,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Timeout | Self::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Executing => 1,
            _ => 2,
        }
    }

    /// Status only moves forward and never leaves a terminal state
    pub fn can_advance_to(&self, next: ExecutionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one rule firing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationExecution {
    pub id: ExecutionId,
    pub rule_id: RuleId,
    pub room_id: RoomId,
    pub device_id: DeviceId,
    pub trigger_value: f64,
    pub threshold: f64,
    pub command: String,
    pub params: serde_json::Value,
    pub status: ExecutionStatus,
    pub skip_reason: Option<SkipReason>,
    pub command_id: Option<CommandId>,
    pub executed_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl AutomationExecution {
    fn from_rule(rule: &AutomationRule, value: f64, status: ExecutionStatus, at: Timestamp) -> Self {
        Self {
            id: ExecutionId::new(),
            rule_id: rule.id.clone(),
            room_id: rule.room_id.clone(),
            device_id: rule.action.device_id.clone(),
            trigger_value: value,
            threshold: rule.threshold,
            command: rule.action.command.clone(),
            params: rule.action.params.clone(),
            status,
            skip_reason: None,
            command_id: None,
            executed_at: at,
            finished_at: None,
            duration_ms: None,
            error: None,
            retry_count: 0,
        }
    }

    /// A firing attempt that passed every gate and awaits dispatch
    pub fn fired(rule: &AutomationRule, value: f64, at: Timestamp) -> Self {
        Self::from_rule(rule, value, ExecutionStatus::Pending, at)
    }

    pub fn skipped(rule: &AutomationRule, value: f64, reason: SkipReason, at: Timestamp) -> Self {
        let mut execution = Self::from_rule(rule, value, ExecutionStatus::Skipped, at);
        execution.skip_reason = Some(reason);
        execution.finished_at = Some(at);
        execution.duration_ms = Some(0);
        execution
    }

    /// Link the dispatched command. Returns false when the execution
    /// already reached a terminal status.
    pub fn mark_executing(&mut self, command_id: CommandId) -> bool {
        if !self.status.can_advance_to(ExecutionStatus::Executing) {
            return false;
        }
        self.status = ExecutionStatus::Executing;
        self.command_id = Some(command_id);
        true
    }

    /// Move to a terminal status. Returns false if already terminal.
    pub fn finish(&mut self, status: ExecutionStatus, at: Timestamp, error: Option<String>) -> bool {
        if !status.is_terminal() || !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        self.finished_at = Some(at);
        self.duration_ms = Some((at - self.executed_at).num_milliseconds().max(0));
        if error.is_some() {
            self.error = error;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Comparator, RuleAction, SensorParameter};
    use chrono::{Duration, TimeZone, Utc};

    fn rule() -> AutomationRule {
        AutomationRule::new(
            RuleId::new("r1").unwrap(),
            RoomId::new("room-1").unwrap(),
            "Too dry",
            SensorParameter::Humidity,
            Comparator::LessThan,
            75.0,
            RuleAction {
                device_id: DeviceId::new("humidifier-1").unwrap(),
                command: "turn_on".into(),
                params: serde_json::json!({}),
            },
        )
    }

    #[test]
    fn test_success_records_duration() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let mut execution = AutomationExecution::fired(&rule(), 70.0, start);
        assert!(execution.mark_executing(CommandId::new()));
        assert!(execution.finish(
            ExecutionStatus::Success,
            start + Duration::milliseconds(1500),
            None
        ));
        assert_eq!(execution.duration_ms, Some(1500));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let now = Utc::now();
        let mut execution = AutomationExecution::fired(&rule(), 70.0, now);
        assert!(execution.finish(ExecutionStatus::Failed, now, Some("boom".into())));
        assert!(!execution.finish(ExecutionStatus::Success, now, None));
        assert!(!execution.mark_executing(CommandId::new()));
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_pending_can_skip_executing() {
        let now = Utc::now();
        let mut execution = AutomationExecution::fired(&rule(), 70.0, now);
        assert!(execution.finish(ExecutionStatus::Cancelled, now, None));
    }

    #[test]
    fn test_skipped_carries_reason() {
        let execution =
            AutomationExecution::skipped(&rule(), 70.0, SkipReason::CooldownActive, Utc::now());
        assert_eq!(execution.status, ExecutionStatus::Skipped);
        assert_eq!(execution.skip_reason, Some(SkipReason::CooldownActive));
        assert!(execution.status.is_terminal());
    }
}

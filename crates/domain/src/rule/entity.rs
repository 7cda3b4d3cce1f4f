use chrono::{Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{ActiveHours, Comparator, SensorParameter, TriggerState};
use crate::error::{DomainError, Result};
use crate::ids::{DeviceId, RoomId, RuleId};
use crate::time::Timestamp;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Device command issued when a rule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub device_id: DeviceId,
    pub command: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u8 {
    5
}

fn default_cooldown_minutes() -> u32 {
    5
}

/// A threshold rule bound to one room and one sensor parameter.
///
/// The trigger bookkeeping fields (`last_triggered_at`, `executions_today`,
/// `last_execution_date`, `trigger_count`) are what the external store last
/// persisted. The engine seeds its own per-rule trigger state from them when
/// the rule is first indexed and owns that state afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: RuleId,
    pub room_id: RoomId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parameter: SensorParameter,
    pub comparator: Comparator,
    pub threshold: f64,
    pub action: RuleAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 1 is the highest priority
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    #[serde(default)]
    pub active_hours: Option<ActiveHours>,
    #[serde(default)]
    pub active_days: Option<Vec<Weekday>>,
    #[serde(default)]
    pub max_executions_per_day: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: Timestamp,

    #[serde(default)]
    pub last_triggered_at: Option<Timestamp>,
    #[serde(default)]
    pub executions_today: u32,
    #[serde(default)]
    pub last_execution_date: Option<NaiveDate>,
    #[serde(default)]
    pub trigger_count: u64,
}

impl AutomationRule {
    pub fn new(
        id: RuleId,
        room_id: RoomId,
        name: impl Into<String>,
        parameter: SensorParameter,
        comparator: Comparator,
        threshold: f64,
        action: RuleAction,
    ) -> Self {
        Self {
            id,
            room_id,
            name: name.into(),
            description: None,
            parameter,
            comparator,
            threshold,
            action,
            enabled: true,
            priority: default_priority(),
            cooldown_minutes: default_cooldown_minutes(),
            active_hours: None,
            active_days: None,
            max_executions_per_day: None,
            created_at: Utc::now(),
            last_triggered_at: None,
            executions_today: 0,
            last_execution_date: None,
            trigger_count: 0,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown_minutes(mut self, minutes: u32) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn with_active_hours(mut self, start: u32, end: u32) -> Self {
        self.active_hours = Some(ActiveHours::new(start, end));
        self
    }

    pub fn with_active_days(mut self, days: Vec<Weekday>) -> Self {
        self.active_days = Some(days);
        self
    }

    pub fn with_max_executions_per_day(mut self, max: u32) -> Self {
        self.max_executions_per_day = Some(max);
        self
    }

    pub fn with_created_at(mut self, at: Timestamp) -> Self {
        self.created_at = at;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::minutes(i64::from(self.cooldown_minutes))
    }

    /// Whether `value` satisfies the rule's comparator against its threshold
    pub fn condition_met(&self, value: f64) -> bool {
        self.comparator.evaluate(value, self.threshold)
    }

    /// Trigger state as last persisted by the external store
    pub fn persisted_trigger_state(&self) -> TriggerState {
        TriggerState::restore(
            self.last_triggered_at,
            self.executions_today,
            self.last_execution_date,
            self.trigger_count,
        )
    }

    /// Reject malformed definitions at creation/update time
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DomainError::InvalidRuleDefinition(msg));

        if self.name.trim().is_empty() {
            return invalid("Rule name cannot be empty".to_string());
        }
        if self.action.command.trim().is_empty() {
            return invalid("Action command cannot be empty".to_string());
        }
        if !self.threshold.is_finite() {
            return invalid(format!("Threshold must be finite, got {}", self.threshold));
        }

        let range = self.parameter.valid_range();
        if !range.contains(&self.threshold) {
            return invalid(format!(
                "{} threshold must be between {} and {} {}",
                self.parameter,
                range.start(),
                range.end(),
                self.parameter.unit()
            ));
        }

        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return invalid(format!(
                "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {}",
                self.priority
            ));
        }

        if let Some(hours) = &self.active_hours {
            if !hours.is_valid() {
                return invalid(format!(
                    "Active hours must be within 0-23, got {}-{}",
                    hours.start, hours.end
                ));
            }
        }

        if self.max_executions_per_day == Some(0) {
            return invalid("Max executions per day must be at least 1".to_string());
        }

        if !self.action.params.is_object() && !self.action.params.is_null() {
            return invalid("Action params must be a JSON object".to_string());
        }

        Ok(())
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{day_allowed, AutomationRule};
use crate::execution::SkipReason;
use crate::time::Timestamp;

/// Mutable firing bookkeeping for one rule.
///
/// The daily counter is reset lazily: it refers to `execution_date` and
/// counts as zero on any other UTC day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerState {
    pub last_triggered_at: Option<Timestamp>,
    pub executions_today: u32,
    pub execution_date: Option<NaiveDate>,
    pub trigger_count: u64,
}

impl TriggerState {
    pub fn restore(
        last_triggered_at: Option<Timestamp>,
        executions_today: u32,
        execution_date: Option<NaiveDate>,
        trigger_count: u64,
    ) -> Self {
        Self {
            last_triggered_at,
            executions_today,
            execution_date,
            trigger_count,
        }
    }

    /// Executions counted against the UTC day of `now`
    pub fn executions_on(&self, now: Timestamp) -> u32 {
        if self.execution_date == Some(now.date_naive()) {
            self.executions_today
        } else {
            0
        }
    }

    /// Side-effect free gate: cooldown, then daily cap, then active window
    pub fn check(&self, rule: &AutomationRule, now: Timestamp) -> Result<(), SkipReason> {
        if let Some(last) = self.last_triggered_at {
            if now < last + rule.cooldown() {
                return Err(SkipReason::CooldownActive);
            }
        }

        if let Some(cap) = rule.max_executions_per_day {
            if self.executions_on(now) >= cap {
                return Err(SkipReason::RateLimitExceeded);
            }
        }

        let in_hours = rule.active_hours.is_none_or(|hours| hours.contains(now));
        if !in_hours || !day_allowed(rule.active_days.as_deref(), now) {
            return Err(SkipReason::OutsideActiveWindow);
        }

        Ok(())
    }

    pub fn record(&mut self, now: Timestamp) {
        let today = now.date_naive();
        if self.execution_date == Some(today) {
            self.executions_today += 1;
        } else {
            self.execution_date = Some(today);
            self.executions_today = 1;
        }
        self.last_triggered_at = Some(now);
        self.trigger_count += 1;
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use domain::{AutomationRule, RuleId, SkipReason, Timestamp, TriggerState};
use tokio::sync::Mutex;
use tracing::debug;

/// Cooldown, daily cap and active-window gate, one lock per rule.
///
/// State is seeded from the rule's persisted counters the first time the
/// rule is seen and owned here afterwards.
#[derive(Debug, Default)]
pub struct RateLimiter {
    states: DashMap<RuleId, Arc<Mutex<TriggerState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, rule: &AutomationRule) -> Arc<Mutex<TriggerState>> {
        self.states
            .entry(rule.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(rule.persisted_trigger_state())))
            .clone()
    }

    /// Side-effect free check
    pub async fn can_trigger(&self, rule: &AutomationRule, now: Timestamp) -> Result<(), SkipReason> {
        let slot = self.slot(rule);
        let state = slot.lock().await;
        state.check(rule, now)
    }

    pub async fn record_trigger(&self, rule: &AutomationRule, now: Timestamp) {
        let slot = self.slot(rule);
        slot.lock().await.record(now);
    }

    /// Check and record as one step under the rule's lock
    pub async fn try_acquire(&self, rule: &AutomationRule, now: Timestamp) -> Result<(), SkipReason> {
        let slot = self.slot(rule);
        let mut state = slot.lock().await;
        match state.check(rule, now) {
            Ok(()) => {
                state.record(now);
                Ok(())
            }
            Err(reason) => {
                debug!(rule_id = %rule.id, reason = %reason, "Rule gated");
                Err(reason)
            }
        }
    }

    pub async fn state(&self, rule_id: &RuleId) -> Option<TriggerState> {
        let slot = self.states.get(rule_id).map(|s| s.value().clone())?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    pub fn forget(&self, rule_id: &RuleId) {
        self.states.remove(rule_id);
    }
}

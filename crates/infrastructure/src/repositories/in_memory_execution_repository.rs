use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use domain::ports::ExecutionRepository;
use domain::{AutomationExecution, DomainError, ExecutionId, RoomId, RuleId};

/// Execution audit trail held in process memory.
///
/// Executions recorded at the same instant are ordered by insertion.
#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    executions: DashMap<ExecutionId, (u64, AutomationExecution)>,
    sequence: AtomicU64,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    fn newest_first(&self, keep: impl Fn(&AutomationExecution) -> bool) -> Vec<AutomationExecution> {
        let mut found: Vec<(u64, AutomationExecution)> = self
            .executions
            .iter()
            .filter(|e| keep(&e.value().1))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|(seq_a, a), (seq_b, b)| {
            b.executed_at.cmp(&a.executed_at).then(seq_b.cmp(seq_a))
        });
        found.into_iter().map(|(_, e)| e).collect()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &AutomationExecution) -> Result<(), DomainError> {
        self.executions
            .entry(execution.id)
            .and_modify(|(_, stored)| *stored = execution.clone())
            .or_insert_with(|| {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                (seq, execution.clone())
            });
        Ok(())
    }

    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<AutomationExecution>, DomainError> {
        Ok(self.executions.get(id).map(|e| e.value().1.clone()))
    }

    async fn find_last_for_rule(
        &self,
        rule_id: &RuleId,
    ) -> Result<Option<AutomationExecution>, DomainError> {
        Ok(self.newest_first(|e| &e.rule_id == rule_id).into_iter().next())
    }

    async fn find_by_rule(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<AutomationExecution>, DomainError> {
        let mut found = self.newest_first(|e| &e.rule_id == rule_id);
        found.truncate(limit);
        Ok(found)
    }

    async fn find_by_room(&self, room_id: &RoomId) -> Result<Vec<AutomationExecution>, DomainError> {
        Ok(self.newest_first(|e| &e.room_id == room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use domain::{AutomationRule, Comparator, DeviceId, RuleAction, SensorParameter, SkipReason};

    fn rule(id: &str) -> AutomationRule {
        AutomationRule::new(
            RuleId::new(id).unwrap(),
            RoomId::new("room-1").unwrap(),
            "Too hot",
            SensorParameter::Temperature,
            Comparator::GreaterThan,
            28.0,
            RuleAction {
                device_id: DeviceId::new("fan-1").unwrap(),
                command: "turn_on_fan".into(),
                params: serde_json::json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_newest_first_with_insertion_tie_break() {
        let repo = InMemoryExecutionRepository::new();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let r1 = rule("r1");

        let older = AutomationExecution::fired(&r1, 30.0, t0 - Duration::minutes(1));
        let first = AutomationExecution::fired(&r1, 30.0, t0);
        let second = AutomationExecution::skipped(&r1, 31.0, SkipReason::CooldownActive, t0);
        for e in [&older, &first, &second] {
            repo.save(e).await.unwrap();
        }
        // Updating keeps the original position
        repo.save(&first).await.unwrap();

        let history = repo.find_by_rule(&r1.id, 10).await.unwrap();
        let ids: Vec<ExecutionId> = history.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id, older.id]);

        assert_eq!(repo.find_by_rule(&r1.id, 1).await.unwrap().len(), 1);
        assert_eq!(repo.find_last_for_rule(&r1.id).await.unwrap().unwrap().id, second.id);
        assert!(repo.find_last_for_rule(&RuleId::new("other").unwrap()).await.unwrap().is_none());
    }
}

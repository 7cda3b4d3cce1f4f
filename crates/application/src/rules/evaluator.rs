use std::sync::Arc;

use dashmap::DashMap;
use domain::{
    AutomationRule, Clock, DomainEvent, EventPublisher, ExecutionId, RoomId, TelemetryReading,
    Timestamp,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::index::evaluation_order;
use super::{RateLimiter, RuleIndex};
use crate::executions::ExecutionRecorder;

/// A rule that passed every gate and must now be dispatched
#[derive(Debug, Clone)]
pub struct FiringDecision {
    pub rule: Arc<AutomationRule>,
    pub value: f64,
    pub execution_id: ExecutionId,
    pub decided_at: Timestamp,
}

/// Matches readings against indexed rules.
///
/// Readings for the same room are evaluated one at a time; rooms never wait
/// on each other. Evaluation never touches the transport.
pub struct RuleEvaluator {
    index: Arc<RuleIndex>,
    limiter: Arc<RateLimiter>,
    recorder: Arc<ExecutionRecorder>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl RuleEvaluator {
    pub fn new(
        index: Arc<RuleIndex>,
        limiter: Arc<RateLimiter>,
        recorder: Arc<ExecutionRecorder>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            limiter,
            recorder,
            publisher,
            clock,
            room_locks: DashMap::new(),
        }
    }

    fn room_lock(&self, room_id: &RoomId) -> Arc<Mutex<()>> {
        self.room_locks
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn forget_room(&self, room_id: &RoomId) {
        self.room_locks.remove(room_id);
    }

    /// Rules are handled independently: a storage error for one rule never
    /// drops the decisions made for the others.
    pub async fn evaluate(&self, reading: &TelemetryReading) -> Vec<FiringDecision> {
        let lock = self.room_lock(&reading.room_id);
        let _guard = lock.lock().await;

        let mut matched: Vec<(Arc<AutomationRule>, f64)> = Vec::new();
        for (parameter, value) in &reading.values {
            for rule in self.index.candidates(&reading.room_id, *parameter) {
                let hit = rule.condition_met(*value);
                debug!(
                    rule_id = %rule.id,
                    value = %value,
                    threshold = %rule.threshold,
                    op = %rule.comparator,
                    matched = hit,
                    "Evaluation"
                );
                if hit {
                    matched.push((rule, *value));
                }
            }
        }
        matched.sort_by(|(a, _), (b, _)| evaluation_order(a, b));

        let mut decisions = Vec::new();
        for (rule, value) in matched {
            if !self.index.is_live(&rule.id) {
                debug!(rule_id = %rule.id, "Rule no longer indexed or enabled, skipping");
                continue;
            }

            let now = self.clock.now();
            match self.limiter.try_acquire(&rule, now).await {
                Ok(()) => {
                    let execution = self.recorder.record_fired(&rule, value).await;
                    info!(
                        rule_id = %rule.id,
                        room_id = %rule.room_id,
                        value = %value,
                        threshold = %rule.threshold,
                        "🔥 Rule fired"
                    );
                    self.emit(DomainEvent::RuleFired {
                        rule_id: rule.id.clone(),
                        room_id: rule.room_id.clone(),
                        execution_id: execution.id,
                        value,
                        timestamp: now,
                    })
                    .await;
                    decisions.push(FiringDecision {
                        rule,
                        value,
                        execution_id: execution.id,
                        decided_at: now,
                    });
                }
                Err(reason) => match self.recorder.record_skipped(&rule, value, reason).await {
                    Ok(execution) => {
                        self.emit(DomainEvent::RuleSkipped {
                            rule_id: rule.id.clone(),
                            room_id: rule.room_id.clone(),
                            execution_id: execution.id,
                            reason,
                            timestamp: now,
                        })
                        .await;
                    }
                    Err(e) => {
                        warn!(rule_id = %rule.id, reason = %reason, error = %e, "Failed to record skipped execution");
                    }
                },
            }
        }

        decisions
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(error = %e, "Failed to publish rule event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::{
        Comparator, DeviceId, ExecutionStatus, ManualClock, RuleAction, RuleId, SensorParameter,
        SkipReason,
    };
    use infrastructure::repositories::InMemoryExecutionRepository;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct MockEventPublisher {
        events: StdMutex<Vec<DomainEvent>>,
    }

    #[async_trait::async_trait]
    impl EventPublisher for MockEventPublisher {
        async fn publish(
            &self,
            event: DomainEvent,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Fixture {
        evaluator: RuleEvaluator,
        index: Arc<RuleIndex>,
        recorder: Arc<ExecutionRecorder>,
        publisher: Arc<MockEventPublisher>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
        ));
        let index = Arc::new(RuleIndex::new());
        let recorder = Arc::new(ExecutionRecorder::new(
            Arc::new(InMemoryExecutionRepository::new()),
            clock.clone(),
        ));
        let publisher = Arc::new(MockEventPublisher {
            events: StdMutex::new(Vec::new()),
        });
        let evaluator = RuleEvaluator::new(
            index.clone(),
            Arc::new(RateLimiter::new()),
            recorder.clone(),
            publisher.clone(),
            clock,
        );
        Fixture {
            evaluator,
            index,
            recorder,
            publisher,
        }
    }

    fn rule(id: &str, parameter: SensorParameter, comparator: Comparator, threshold: f64, priority: u8) -> AutomationRule {
        AutomationRule::new(
            RuleId::new(id).unwrap(),
            RoomId::new("room-1").unwrap(),
            id,
            parameter,
            comparator,
            threshold,
            RuleAction {
                device_id: DeviceId::new("dev-1").unwrap(),
                command: "turn_on".into(),
                params: json!({}),
            },
        )
        .with_priority(priority)
    }

    fn reading(values: &[(SensorParameter, f64)]) -> TelemetryReading {
        let mut reading = TelemetryReading::new(
            RoomId::new("room-1").unwrap(),
            DeviceId::new("sensor-1").unwrap(),
            Utc::now(),
        );
        for (parameter, value) in values {
            reading = reading.with_value(*parameter, *value);
        }
        reading
    }

    #[tokio::test]
    async fn test_fires_only_when_condition_holds() {
        let f = fixture();
        f.index
            .upsert(rule("hot", SensorParameter::Temperature, Comparator::GreaterThan, 28.0, 5))
            .unwrap();

        let none = f
            .evaluator
            .evaluate(&reading(&[(SensorParameter::Temperature, 25.0)]))
            .await;
        assert!(none.is_empty());
        // An unmet condition leaves no trace
        assert!(
            f.recorder
                .list_for_rule(&RuleId::new("hot").unwrap(), 10)
                .await
                .unwrap()
                .is_empty()
        );

        let fired = f
            .evaluator
            .evaluate(&reading(&[(SensorParameter::Temperature, 30.0)]))
            .await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].value, 30.0);

        let execution = f.recorder.get(&fired[0].execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn test_decisions_merged_across_parameters_by_priority() {
        let f = fixture();
        f.index
            .upsert(rule("wet", SensorParameter::Humidity, Comparator::LessThan, 80.0, 2))
            .unwrap();
        f.index
            .upsert(rule("hot", SensorParameter::Temperature, Comparator::GreaterThan, 28.0, 1))
            .unwrap();
        f.index
            .upsert(rule("co2", SensorParameter::Co2, Comparator::GreaterThan, 1000.0, 3))
            .unwrap();

        let fired = f
            .evaluator
            .evaluate(&reading(&[
                (SensorParameter::Co2, 1500.0),
                (SensorParameter::Humidity, 70.0),
                (SensorParameter::Temperature, 30.0),
            ]))
            .await;

        let order: Vec<&str> = fired.iter().map(|d| d.rule.id.as_str()).collect();
        assert_eq!(order, vec!["hot", "wet", "co2"]);
    }

    #[tokio::test]
    async fn test_rejection_recorded_as_skipped() {
        let f = fixture();
        f.index
            .upsert(rule("hot", SensorParameter::Temperature, Comparator::GreaterThan, 28.0, 5))
            .unwrap();
        let hot = reading(&[(SensorParameter::Temperature, 30.0)]);

        assert_eq!(f.evaluator.evaluate(&hot).await.len(), 1);
        assert!(f.evaluator.evaluate(&hot).await.is_empty());

        let last = f
            .recorder
            .last_for_rule(&RuleId::new("hot").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.status, ExecutionStatus::Skipped);
        assert_eq!(last.skip_reason, Some(SkipReason::CooldownActive));

        let events = f.publisher.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "RuleFired");
        assert_eq!(events[1].event_type(), "RuleSkipped");
    }

    #[tokio::test]
    async fn test_concurrent_readings_fire_once() {
        let f = fixture();
        f.index
            .upsert(rule("hot", SensorParameter::Temperature, Comparator::GreaterThan, 28.0, 5))
            .unwrap();
        let evaluator = Arc::new(f.evaluator);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let evaluator = evaluator.clone();
            handles.push(tokio::spawn(async move {
                evaluator
                    .evaluate(&reading(&[(SensorParameter::Temperature, 31.0)]))
                    .await
                    .len()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1);
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use application::{AutomationEngine, EnginePorts, EngineSettings};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::ports::{CommandTransport, ExecutionRepository, NotificationSink};
use domain::{
    AutomationExecution, AutomationRule, Clock, Comparator, CommandEnvelope, DeviceId, DomainError,
    DomainEvent, EventPublisher, ExecutionId, ExecutionStatus, ManualClock, Notification, RoomId,
    RuleAction, RuleId, SensorParameter, Timestamp, TransportError,
};
use infrastructure::InMemoryExecutionRepository;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Records every envelope and rejects the first `failures` hand-offs
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<CommandEnvelope>>,
    failures_left: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<CommandEnvelope> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for FakeTransport {
    async fn send(&self, envelope: &CommandEnvelope) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(TransportError::Unavailable("broker down".into()));
        }
        self.sent.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        notification: &Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEventPublisher {
    pub events: Mutex<Vec<DomainEvent>>,
}

impl MockEventPublisher {
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Execution store whose writes of skipped executions fail
#[derive(Default)]
pub struct SkipRejectingStore {
    pub inner: InMemoryExecutionRepository,
}

#[async_trait]
impl ExecutionRepository for SkipRejectingStore {
    async fn save(&self, execution: &AutomationExecution) -> Result<(), DomainError> {
        if execution.status == ExecutionStatus::Skipped {
            return Err(DomainError::Repository("disk full".into()));
        }
        self.inner.save(execution).await
    }

    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<AutomationExecution>, DomainError> {
        self.inner.find_by_id(id).await
    }

    async fn find_last_for_rule(
        &self,
        rule_id: &RuleId,
    ) -> Result<Option<AutomationExecution>, DomainError> {
        self.inner.find_last_for_rule(rule_id).await
    }

    async fn find_by_rule(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<AutomationExecution>, DomainError> {
        self.inner.find_by_rule(rule_id, limit).await
    }

    async fn find_by_room(&self, room_id: &RoomId) -> Result<Vec<AutomationExecution>, DomainError> {
        self.inner.find_by_room(room_id).await
    }
}

pub struct TestEngine {
    pub engine: AutomationEngine,
    pub transport: Arc<FakeTransport>,
    pub sink: Arc<RecordingSink>,
    pub events: Arc<MockEventPublisher>,
    pub clock: Arc<ManualClock>,
}

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
}

pub fn room() -> RoomId {
    RoomId::new("room-1").unwrap()
}

pub fn sensor() -> DeviceId {
    DeviceId::new("sensor-1").unwrap()
}

pub fn rule_id(id: &str) -> RuleId {
    RuleId::new(id).unwrap()
}

/// `temperature > 28 -> turn_on_fan` on fan-1
pub fn hot_rule(id: &str) -> AutomationRule {
    AutomationRule::new(
        rule_id(id),
        room(),
        "Ventilate when hot",
        SensorParameter::Temperature,
        Comparator::GreaterThan,
        28.0,
        RuleAction {
            device_id: DeviceId::new("fan-1").unwrap(),
            command: "turn_on_fan".into(),
            params: json!({}),
        },
    )
    .with_created_at(t0())
}

pub fn engine_with(
    settings: EngineSettings,
    transport: FakeTransport,
    rules: Vec<AutomationRule>,
) -> TestEngine {
    engine_with_store(
        settings,
        transport,
        Arc::new(InMemoryExecutionRepository::new()),
        rules,
    )
}

pub fn engine_with_store(
    settings: EngineSettings,
    transport: FakeTransport,
    executions: Arc<dyn ExecutionRepository>,
    rules: Vec<AutomationRule>,
) -> TestEngine {
    let clock = Arc::new(ManualClock::new(t0()));
    let transport = Arc::new(transport);
    let sink = Arc::new(RecordingSink::default());
    let events = Arc::new(MockEventPublisher::default());
    let engine = AutomationEngine::new(
        settings,
        EnginePorts {
            transport: transport.clone(),
            sink: sink.clone(),
            executions,
            publisher: events.clone(),
            clock: clock.clone(),
        },
        rules,
        CancellationToken::new(),
    )
    .unwrap();
    TestEngine {
        engine,
        transport,
        sink,
        events,
        clock,
    }
}

pub fn engine(rules: Vec<AutomationRule>) -> TestEngine {
    engine_with(EngineSettings::default(), FakeTransport::default(), rules)
}

/// Let device workers and backoff timers run under paused time
pub async fn settle(secs: u64) {
    tokio::time::sleep(StdDuration::from_millis(secs * 1000 + 10)).await;
}

pub fn values(pairs: &[(&str, f64)]) -> std::collections::HashMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

impl TestEngine {
    pub async fn reading(&self, pairs: &[(&str, f64)]) -> Vec<domain::Command> {
        self.engine
            .ingestion()
            .on_telemetry(room(), sensor(), &values(pairs), self.clock.now())
            .await
    }
}

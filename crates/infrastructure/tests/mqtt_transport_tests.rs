use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use domain::command::CommandDefaults;
use domain::ports::{CommandTransport, DeviceLocation, NotificationSink};
use domain::{
    Command, CommandEnvelope, CommandRequest, DeviceId, DomainEvent, EventPublisher, ExecutionId,
    FarmId, Notification, NotificationDraft, NotificationLevel, NotificationType, RoomId, RuleId,
    SkipReason, TransportError,
};
use infrastructure::messaging::mqtt_client::MqttPublisherClient;
use infrastructure::{
    CompositeEventPublisher, EventInterest, MqttCommandTransport, MqttEventPublisher,
    MqttNotificationSink, StaticDeviceDirectory,
};
use serde_json::{Value, json};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

#[derive(Clone)]
struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    connected: Arc<AtomicBool>,
    should_fail_publish: Arc<AtomicBool>,
}

impl MockMqttClient {
    fn new() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(true)),
            should_fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }

    fn messages(&self) -> Vec<(String, Value)> {
        self.published_messages
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, payload)| (topic.clone(), serde_json::from_slice(payload).unwrap()))
            .collect()
    }
}

#[async_trait]
impl MqttPublisherClient for MockMqttClient {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        _qos: rumqttc::QoS,
        _retain: bool,
    ) -> Result<()> {
        if self.should_fail_publish.load(Ordering::Relaxed) {
            return Err(anyhow!("Simulated Publish Failure"));
        }
        self.published_messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

fn directory() -> Arc<StaticDeviceDirectory> {
    let directory = StaticDeviceDirectory::new();
    directory.register(
        DeviceId::new("fan-1").unwrap(),
        DeviceLocation {
            farm_id: FarmId::new("farm-1").unwrap(),
            room_id: RoomId::new("room-7").unwrap(),
        },
    );
    Arc::new(directory)
}

fn envelope(device: &str) -> CommandEnvelope {
    let request = CommandRequest::manual(
        DeviceId::new(device).unwrap(),
        "set_humidity",
        json!({"humidity": 90}),
        "user-1",
    );
    let command = Command::issue(request, &CommandDefaults::default(), Utc::now());
    CommandEnvelope::for_attempt(&command, Utc::now())
}

#[tokio::test]
async fn test_command_published_to_device_topic() {
    let client = MockMqttClient::new();
    let transport = MqttCommandTransport::new(Arc::new(client.clone()), directory());

    let envelope = envelope("fan-1");
    transport.send(&envelope).await.unwrap();

    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    let (topic, payload) = &messages[0];
    assert_eq!(topic, "farm/farm-1/room/room-7/device/fan-1/command");
    assert_eq!(payload["command_id"], json!(envelope.command_id().to_string()));
    assert_eq!(payload["command"], "set_humidity");
    assert_eq!(payload["params"]["humidity"], 90);
    assert!(payload["timestamp"].is_string());
}

#[tokio::test]
async fn test_unknown_device_is_rejected() {
    let client = MockMqttClient::new();
    let transport = MqttCommandTransport::new(Arc::new(client.clone()), directory());

    let err = transport.send(&envelope("heater-9")).await.unwrap_err();
    assert!(matches!(err, TransportError::UnknownDevice(_)));
    assert!(client.messages().is_empty());
}

#[tokio::test]
async fn test_disconnected_broker_is_unavailable() {
    let client = MockMqttClient::new();
    client.connected.store(false, Ordering::Relaxed);
    let transport = MqttCommandTransport::new(Arc::new(client.clone()), directory());

    let err = transport.send(&envelope("fan-1")).await.unwrap_err();
    assert!(matches!(err, TransportError::Unavailable(_)));
}

#[tokio::test]
async fn test_publish_failure_is_rejected() {
    let client = MockMqttClient::new();
    client.should_fail_publish.store(true, Ordering::Relaxed);
    let transport = MqttCommandTransport::new(Arc::new(client.clone()), directory());

    let err = transport.send(&envelope("fan-1")).await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected(_)));
}

#[tokio::test]
async fn test_notification_sink_publishes_per_room() {
    let client = MockMqttClient::new();
    let sink = MqttNotificationSink::new(Arc::new(client.clone()), "growroom/notifications");

    let draft = NotificationDraft::new(
        NotificationLevel::Warning,
        NotificationType::ThresholdExceeded,
        "humidity out of range",
        "humidity in room room-7 is 70%",
    )
    .room(Some(RoomId::new("room-7").unwrap()));
    sink.notify(&Notification::raise(draft, Utc::now())).await.unwrap();

    let messages = client.messages();
    assert_eq!(messages[0].0, "growroom/notifications/room-7");
    assert_eq!(messages[0].1["type"], "threshold_exceeded");
    assert_eq!(messages[0].1["level"], "warning");
}

struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(
        &self,
        _event: DomainEvent,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("downstream offline".into())
    }
}

#[tokio::test]
async fn test_composite_keeps_publishing_after_failure() {
    let client = MockMqttClient::new();
    let composite = CompositeEventPublisher::new()
        .route("broken", EventInterest::All, Arc::new(FailingPublisher))
        .route(
            "mqtt",
            EventInterest::Lifecycle,
            Arc::new(MqttEventPublisher::new(Arc::new(client.clone()), "growroom/events")),
        );

    let request = CommandRequest::manual(DeviceId::new("fan-1").unwrap(), "turn_on_fan", json!({}), "user-1");
    let command = Command::issue(request, &CommandDefaults::default(), Utc::now());
    let result = composite
        .publish(DomainEvent::CommandQueued {
            command,
            timestamp: Utc::now(),
        })
        .await;

    let err = result.unwrap_err().to_string();
    assert!(err.contains("broken"));
    assert!(!err.contains("mqtt"));

    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "growroom/events/CommandQueued");
    assert_eq!(messages[0].1["type"], "CommandQueued");
}

#[tokio::test]
async fn test_skips_reach_only_publishers_that_want_them() {
    let audit = MockMqttClient::new();
    let lifecycle = MockMqttClient::new();
    let composite = CompositeEventPublisher::new()
        .route(
            "audit",
            EventInterest::All,
            Arc::new(MqttEventPublisher::new(Arc::new(audit.clone()), "audit/events")),
        )
        .route(
            "mqtt",
            EventInterest::Lifecycle,
            Arc::new(MqttEventPublisher::new(Arc::new(lifecycle.clone()), "growroom/events")),
        );
    assert_eq!(composite.len(), 2);

    composite
        .publish(DomainEvent::RuleSkipped {
            rule_id: RuleId::new("rule-1").unwrap(),
            room_id: RoomId::new("room-1").unwrap(),
            execution_id: ExecutionId::new(),
            reason: SkipReason::CooldownActive,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

    let audited = audit.messages();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].0, "audit/events/RuleSkipped");
    assert!(lifecycle.messages().is_empty());
}

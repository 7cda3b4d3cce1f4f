use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use application::{IngestionAdapter, NotificationEscalator};
use async_trait::async_trait;
use domain::{Clock, DomainError, NotificationDraft, NotificationLevel, NotificationType, RoomId};
use infrastructure::{DeviceTopic, MqttClient, MqttMessage, TopicChannel};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::inbound::InboundMessage;

/// Routes device publishes into the engine
pub struct DeviceMessageRouter {
    ingestion: Arc<IngestionAdapter>,
    escalator: Arc<NotificationEscalator>,
    clock: Arc<dyn Clock>,
}

impl DeviceMessageRouter {
    pub fn new(
        ingestion: Arc<IngestionAdapter>,
        escalator: Arc<NotificationEscalator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ingestion,
            escalator,
            clock,
        }
    }

    /// Decode and route one publish. Malformed payloads are logged and dropped.
    pub async fn handle(&self, topic: &str, payload: &[u8]) {
        match InboundMessage::parse(topic, payload, self.clock.now()) {
            Ok(Some(message)) => self.route(message).await,
            Ok(None) => debug!(topic = %topic, "Ignoring message on foreign topic"),
            Err(e) => warn!(topic = %topic, error = %e, "Dropping malformed device message"),
        }
    }

    pub async fn route(&self, message: InboundMessage) {
        match message {
            InboundMessage::Telemetry {
                room_id,
                device_id,
                values,
                recorded_at,
            } => {
                let commands = self
                    .ingestion
                    .on_telemetry(room_id.clone(), device_id, &values, recorded_at)
                    .await;
                if !commands.is_empty() {
                    debug!(room_id = %room_id, queued = commands.len(), "Telemetry triggered commands");
                }
            }
            InboundMessage::CommandStatus {
                device_id,
                command_id,
                status,
                payload,
            } => match self
                .ingestion
                .on_command_status(command_id, &status, Some(payload))
                .await
            {
                Ok(Some(command)) => {
                    debug!(command_id = %command_id, status = %command.status, "Command status applied")
                }
                Ok(None) => {}
                Err(DomainError::CommandNotFound(_)) => {
                    warn!(command_id = %command_id, device_id = %device_id, "Status for unknown command")
                }
                Err(e) => {
                    warn!(command_id = %command_id, status = %status, error = %e, "Command status rejected")
                }
            },
            InboundMessage::DeviceStatus {
                room_id,
                device_id,
                status,
                error,
            } => {
                let draft = if let Some(error) = error {
                    NotificationDraft::new(
                        NotificationLevel::Warning,
                        NotificationType::SystemError,
                        format!("Device {device_id} reported an error"),
                        error,
                    )
                } else if status.as_deref() == Some("offline") {
                    NotificationDraft::new(
                        NotificationLevel::Warning,
                        NotificationType::DeviceOffline,
                        format!("Device {device_id} went offline"),
                        format!("Device {device_id} in room {room_id} reported offline"),
                    )
                } else {
                    debug!(device_id = %device_id, status = ?status, "Device status");
                    return;
                };
                self.escalator
                    .raise(draft.room(Some(room_id)).device(device_id))
                    .await;
            }
        }
    }
}

/// Confirms a device message to the broker once it has been routed
#[async_trait]
pub trait MessageAck: Send + Sync + 'static {
    async fn ack(&self, msg: &MqttMessage) -> Result<()>;
}

#[async_trait]
impl MessageAck for MqttClient {
    async fn ack(&self, msg: &MqttMessage) -> Result<()> {
        MqttClient::ack(self, msg).await
    }
}

async fn ack_routed(acker: &dyn MessageAck, msg: &MqttMessage) {
    if let Err(e) = acker.ack(msg).await {
        warn!(topic = %msg.topic, error = %e, "Failed to ack device message");
    }
}

/// One ordered lane per room. Messages for a room are routed in arrival
/// order, while a slow room never holds up the others.
pub struct RoomLanes {
    router: Arc<DeviceMessageRouter>,
    acker: Arc<dyn MessageAck>,
    lanes: HashMap<RoomId, mpsc::UnboundedSender<MqttMessage>>,
    workers: JoinSet<()>,
}

impl RoomLanes {
    pub fn new(router: Arc<DeviceMessageRouter>, acker: Arc<dyn MessageAck>) -> Self {
        Self {
            router,
            acker,
            lanes: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queue a message on its room's lane. Topics outside the device layout
    /// carry no room and are handled inline.
    pub async fn submit(&mut self, msg: MqttMessage) {
        let Some(room_id) = DeviceTopic::parse(&msg.topic).map(|t| t.room_id) else {
            self.router.handle(&msg.topic, &msg.payload).await;
            ack_routed(self.acker.as_ref(), &msg).await;
            return;
        };

        let sender = match self.lanes.get(&room_id) {
            Some(sender) => sender.clone(),
            None => self.open(room_id.clone()),
        };
        let Err(mpsc::error::SendError(msg)) = sender.send(msg) else {
            return;
        };

        warn!(room_id = %room_id, "Room lane closed unexpectedly, reopening");
        if self.open(room_id.clone()).send(msg).is_err() {
            warn!(room_id = %room_id, "Dropping device message, room lane unavailable");
        }
    }

    fn open(&mut self, room_id: RoomId) -> mpsc::UnboundedSender<MqttMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MqttMessage>();
        let router = self.router.clone();
        let acker = self.acker.clone();
        let room = room_id.clone();

        self.workers.spawn(async move {
            debug!(room_id = %room, "Room lane opened");
            while let Some(msg) = rx.recv().await {
                router.handle(&msg.topic, &msg.payload).await;
                ack_routed(acker.as_ref(), &msg).await;
            }
            debug!(room_id = %room, "Room lane closed");
        });

        self.lanes.insert(room_id, tx.clone());
        tx
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Close every lane and wait for queued messages to drain
    pub async fn shutdown(mut self) {
        self.lanes.clear();
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Room lane ended abnormally");
            }
        }
    }
}

/// Subscribe to every inbound device channel and feed the room lanes until
/// cancelled. Each publish is acknowledged once it has been routed.
pub async fn run_listener(
    client: MqttClient,
    router: Arc<DeviceMessageRouter>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut rx = client.messages();
    for channel in [TopicChannel::Telemetry, TopicChannel::Status, TopicChannel::Ack] {
        let topic = DeviceTopic::subscription(channel);
        client.subscribe(&topic).await?;
        info!(topic = %topic, "📡 Listening for device messages");
    }

    let mut lanes = RoomLanes::new(router, Arc::new(client.clone()));
    loop {
        let msg: MqttMessage = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Device listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Device message channel closed");
                    break;
                }
            },
        };

        lanes.submit(msg).await;
    }

    lanes.shutdown().await;
    info!("Device listener stopped");
    Ok(())
}

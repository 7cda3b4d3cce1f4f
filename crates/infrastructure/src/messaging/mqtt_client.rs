use anyhow::{Context, Result, anyhow};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

const REQUEST_CAPACITY: usize = 100;
const INBOUND_CAPACITY: usize = 500;

/// A device message as received from the broker
#[derive(Clone, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub pkid: u16,
}

impl From<Publish> for MqttMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
            pkid: publish.pkid,
        }
    }
}

/// Publishing half of the broker connection
#[async_trait::async_trait]
pub trait MqttPublisherClient: Send + Sync {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// Broker connection shared by the command transport, the device listener
/// and the event publishers.
///
/// Incoming device messages fan out on a broadcast channel. Acks are manual:
/// the consumer calls [`MqttClient::ack`] once a message has been routed, so
/// a status report is redelivered if the engine dies mid-way.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    inbound: broadcast::Sender<MqttMessage>,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<RwLock<Vec<String>>>,
}

impl MqttClient {
    pub async fn connect(config: &MqttConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(anyhow!("MQTT host is empty"));
        }

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        // Device acks queued while the engine was away are still delivered
        options.set_clean_session(false);
        options.set_manual_acks(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        let mqtt = Self {
            client,
            inbound,
            connected: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
        };

        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "📡 Connecting to MQTT broker"
        );
        tokio::spawn(mqtt.clone().drive(eventloop));

        Ok(mqtt)
    }

    async fn drive(self, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Err(broadcast::error::SendError(dropped)) =
                        self.inbound.send(MqttMessage::from(publish))
                    {
                        debug!(topic = %dropped.topic, "No listener for MQTT message");
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("🔌 MQTT connected");
                    self.connected.store(true, Ordering::Relaxed);
                    self.resubscribe().await;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.store(false, Ordering::Relaxed);
                    info!("MQTT event loop stopped");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.connected.swap(false, Ordering::Relaxed) {
                        warn!(error = %e, "⚠️ MQTT connection lost");
                    } else {
                        debug!(error = %e, "MQTT reconnect attempt failed");
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn resubscribe(&self) {
        let topics = self
            .subscriptions
            .read()
            .map(|subs| subs.clone())
            .unwrap_or_default();

        for topic in topics {
            if let Err(e) = self.client.subscribe(&topic, QoS::AtLeastOnce).await {
                error!(topic = %topic, error = %e, "Failed to re-subscribe");
            }
        }
    }

    pub fn messages(&self) -> broadcast::Receiver<MqttMessage> {
        self.inbound.subscribe()
    }

    pub async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.publish_bytes(topic, payload.as_bytes(), QoS::AtLeastOnce, retain)
            .await
    }

    /// Subscribe now and again after every reconnect
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        if let Ok(mut subs) = self.subscriptions.write() {
            if !subs.iter().any(|t| t == topic) {
                subs.push(topic.to_string());
            }
        }

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribing to {topic}"))
    }

    pub async fn ack(&self, msg: &MqttMessage) -> Result<()> {
        let mut publish = Publish::new(&msg.topic, QoS::AtLeastOnce, Vec::new());
        publish.pkid = msg.pkid;

        self.client
            .ack(&publish)
            .await
            .with_context(|| format!("acking packet {}", msg.pkid))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .context("disconnecting from MQTT broker")
    }
}

#[async_trait::async_trait]
impl MqttPublisherClient for MqttClient {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .with_context(|| format!("publishing to {topic}"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

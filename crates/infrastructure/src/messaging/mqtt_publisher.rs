use std::sync::Arc;

use async_trait::async_trait;
use domain::DomainEvent;
use domain::event::EventPublisher;
use rumqttc::QoS;

use super::mqtt_client::MqttPublisherClient;

/// Publishes engine events as JSON to `{topic}/{EventType}`
pub struct MqttEventPublisher {
    client: Arc<dyn MqttPublisherClient>,
    topic: String,
}

impl MqttEventPublisher {
    pub fn new(client: Arc<dyn MqttPublisherClient>, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for MqttEventPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let topic = format!("{}/{}", self.topic, event.event_type());
        let payload = serde_json::to_vec(&event)?;
        self.client
            .publish_bytes(&topic, &payload, QoS::AtLeastOnce, false)
            .await?;
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use domain::ports::{CommandTransport, DeviceDirectory};
use domain::{CommandEnvelope, TransportError};
use rumqttc::QoS;
use tracing::debug;

use super::mqtt_client::MqttPublisherClient;
use super::topics::DeviceTopic;

/// Publishes command attempts to the device's command topic
pub struct MqttCommandTransport {
    client: Arc<dyn MqttPublisherClient>,
    directory: Arc<dyn DeviceDirectory>,
}

impl MqttCommandTransport {
    pub fn new(client: Arc<dyn MqttPublisherClient>, directory: Arc<dyn DeviceDirectory>) -> Self {
        Self { client, directory }
    }
}

#[async_trait]
impl CommandTransport for MqttCommandTransport {
    async fn send(&self, envelope: &CommandEnvelope) -> Result<(), TransportError> {
        let location = self
            .directory
            .locate(&envelope.device_id)
            .await
            .ok_or_else(|| TransportError::UnknownDevice(envelope.device_id.to_string()))?;

        if !self.client.is_connected() {
            return Err(TransportError::Unavailable("MQTT broker not connected".into()));
        }

        let topic = DeviceTopic::command(location.farm_id, location.room_id, envelope.device_id.clone());
        let payload = serde_json::to_vec(&envelope.payload)
            .map_err(|e| TransportError::Encoding(e.to_string()))?;

        self.client
            .publish_bytes(&topic.to_string(), &payload, QoS::AtLeastOnce, false)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        debug!(topic = %topic, command_id = %envelope.command_id(), attempt = envelope.attempt, "Command published");
        Ok(())
    }
}

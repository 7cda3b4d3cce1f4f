use std::sync::Arc;

use async_trait::async_trait;
use domain::ports::NotificationSink;
use domain::{Notification, NotificationLevel};
use rumqttc::QoS;
use tracing::{error, info, warn};

use super::mqtt_client::MqttPublisherClient;

/// Writes notifications to the log at a level matching their severity
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(
        &self,
        notification: &Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match notification.level {
            NotificationLevel::Critical => error!(
                notification_id = %notification.id,
                escalation_level = notification.escalation_level,
                "🚨 {}: {}", notification.title, notification.message
            ),
            NotificationLevel::Warning => warn!(
                notification_id = %notification.id,
                escalation_level = notification.escalation_level,
                "⚠️ {}: {}", notification.title, notification.message
            ),
            NotificationLevel::Info => info!(
                notification_id = %notification.id,
                "ℹ️ {}: {}", notification.title, notification.message
            ),
        }
        Ok(())
    }
}

/// Publishes notifications as JSON for dashboards and mobile push
pub struct MqttNotificationSink {
    client: Arc<dyn MqttPublisherClient>,
    topic: String,
}

impl MqttNotificationSink {
    pub fn new(client: Arc<dyn MqttPublisherClient>, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for MqttNotificationSink {
    async fn notify(
        &self,
        notification: &Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let topic = match &notification.room_id {
            Some(room_id) => format!("{}/{}", self.topic, room_id),
            None => self.topic.clone(),
        };
        let payload = serde_json::to_vec(notification)?;
        self.client
            .publish_bytes(&topic, &payload, QoS::AtLeastOnce, false)
            .await?;
        Ok(())
    }
}

use async_trait::async_trait;
use domain::DomainEvent;
use domain::event::EventPublisher;
use tracing::{debug, info};

/// Writes engine events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match &event {
            DomainEvent::RuleSkipped { rule_id, reason, .. } => {
                debug!(rule_id = %rule_id, reason = %reason, "event: RuleSkipped");
            }
            other => match other.command() {
                Some(command) => info!(
                    event_type = other.event_type(),
                    command_id = %command.id,
                    status = %command.status,
                    "event"
                ),
                None => info!(event_type = other.event_type(), "event"),
            },
        }
        Ok(())
    }
}

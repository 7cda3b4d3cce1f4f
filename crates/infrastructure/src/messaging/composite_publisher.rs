use std::sync::Arc;

use async_trait::async_trait;
use domain::DomainEvent;
use domain::event::EventPublisher;
use tracing::warn;

/// Which engine events a downstream publisher wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventInterest {
    All,
    /// Drops `RuleSkipped`, which fires on nearly every reading during a
    /// cooldown and only matters to the audit trail
    Lifecycle,
}

impl EventInterest {
    pub fn wants(&self, event: &DomainEvent) -> bool {
        match self {
            Self::All => true,
            Self::Lifecycle => !matches!(event, DomainEvent::RuleSkipped { .. }),
        }
    }
}

struct Route {
    name: &'static str,
    interest: EventInterest,
    publisher: Arc<dyn EventPublisher>,
}

/// Fans engine events out to every interested publisher. A failing
/// publisher is reported but never keeps the event from the rest.
#[derive(Default)]
pub struct CompositeEventPublisher {
    routes: Vec<Route>,
}

impl CompositeEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        name: &'static str,
        interest: EventInterest,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        self.routes.push(Route {
            name,
            interest,
            publisher,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait]
impl EventPublisher for CompositeEventPublisher {
    async fn publish(
        &self,
        event: DomainEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut failed = Vec::new();
        for route in self.routes.iter().filter(|r| r.interest.wants(&event)) {
            if let Err(e) = route.publisher.publish(event.clone()).await {
                warn!(
                    publisher = route.name,
                    event_type = event.event_type(),
                    error = %e,
                    "⚠️ Event publisher failed"
                );
                failed.push(route.name);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} not delivered to: {}",
                event.event_type(),
                failed.join(", ")
            )
            .into())
        }
    }
}

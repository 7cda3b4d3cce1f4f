use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use dashmap::{DashMap, DashSet};
use domain::error::{DomainError, Result};
use domain::ports::NotificationSink;
use domain::{
    AutomationRule, Clock, Command, CommandId, DeviceId, DomainEvent, EventPublisher, ExecutionId,
    Notification, NotificationDraft, NotificationId, NotificationLevel, NotificationType, RoomId,
    SensorParameter, Timestamp,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Unacknowledged notifications escalate after this long
    pub escalate_after: Duration,
    pub max_escalation_level: u32,
    /// Raise an info notification when an automation command completes
    pub notify_on_success: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            escalate_after: Duration::minutes(15),
            max_escalation_level: 3,
            notify_on_success: false,
        }
    }
}

/// What one sweep changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub auto_acknowledged: usize,
    pub escalated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationStats {
    pub total: usize,
    pub unacknowledged: usize,
    pub by_level: BTreeMap<NotificationLevel, usize>,
}

/// Raises notifications, tracks their acknowledgment lifecycle and escalates
/// the ones nobody answers.
pub struct NotificationEscalator {
    notifications: DashMap<NotificationId, Notification>,
    /// Commands that already produced their failure notification
    notified_commands: DashSet<CommandId>,
    sink: Arc<dyn NotificationSink>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: EscalationPolicy,
}

impl NotificationEscalator {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            notifications: DashMap::new(),
            notified_commands: DashSet::new(),
            sink,
            publisher,
            clock,
            policy,
        }
    }

    pub async fn raise(&self, draft: NotificationDraft) -> Notification {
        let now = self.clock.now();
        let notification = Notification::raise(draft, now);
        self.notifications
            .insert(notification.id, notification.clone());

        match notification.level {
            NotificationLevel::Critical => error!(
                notification_id = %notification.id,
                kind = %notification.kind,
                title = %notification.title,
                "🚨 Critical notification raised"
            ),
            NotificationLevel::Warning => warn!(
                notification_id = %notification.id,
                kind = %notification.kind,
                title = %notification.title,
                "🔔 Notification raised"
            ),
            NotificationLevel::Info => info!(
                notification_id = %notification.id,
                kind = %notification.kind,
                title = %notification.title,
                "🔔 Notification raised"
            ),
        }

        self.deliver(&notification).await;
        if let Err(e) = self
            .publisher
            .publish(DomainEvent::NotificationRaised {
                notification_id: notification.id,
                level: notification.level,
                kind: notification.kind,
                timestamp: now,
            })
            .await
        {
            warn!(error = %e, "Failed to publish notification event");
        }
        notification
    }

    async fn deliver(&self, notification: &Notification) {
        if let Err(e) = self.sink.notify(notification).await {
            warn!(notification_id = %notification.id, error = %e, "Notification sink failed");
        }
    }

    pub fn mark_read(&self, id: NotificationId) -> Result<Notification> {
        let now = self.clock.now();
        self.modify(id, |n| n.mark_read(now))
    }

    pub fn acknowledge(
        &self,
        id: NotificationId,
        by: impl Into<String>,
        note: Option<String>,
    ) -> Result<Notification> {
        let now = self.clock.now();
        let by = by.into();
        let notification = self.modify(id, |n| n.acknowledge(by.clone(), note, now))?;
        info!(notification_id = %id, acknowledged_by = %by, "👍 Notification acknowledged");
        Ok(notification)
    }

    pub fn resolve(&self, id: NotificationId, note: Option<String>) -> Result<Notification> {
        let now = self.clock.now();
        self.modify(id, |n| n.resolve(note, now))
    }

    pub fn dismiss(&self, id: NotificationId) -> Result<Notification> {
        self.modify(id, |n| n.dismiss())
    }

    /// Apply a lifecycle transition; an inapplicable one leaves the
    /// notification as it was
    fn modify(&self, id: NotificationId, f: impl FnOnce(&mut Notification) -> bool) -> Result<Notification> {
        let mut notification = self
            .notifications
            .get_mut(&id)
            .ok_or(DomainError::NotificationNotFound(id))?;
        if !f(&mut notification) {
            debug!(notification_id = %id, status = ?notification.status, "Notification transition not applicable");
        }
        Ok(notification.clone())
    }

    /// Expire, auto-acknowledge, then escalate. Escalated notifications are
    /// sent to the sink again.
    pub async fn sweep(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();
        let mut escalated = Vec::new();

        for mut entry in self.notifications.iter_mut() {
            let notification = entry.value_mut();
            if notification.expire_if_due(now) {
                report.expired += 1;
                continue;
            }
            if notification.auto_acknowledge_if_due(now) {
                report.auto_acknowledged += 1;
                continue;
            }
            if notification.escalate_if_due(
                now,
                self.policy.escalate_after,
                self.policy.max_escalation_level,
            ) {
                report.escalated += 1;
                escalated.push(notification.clone());
            }
        }

        for notification in escalated {
            warn!(
                notification_id = %notification.id,
                escalation_level = notification.escalation_level,
                title = %notification.title,
                "📢 Notification escalated"
            );
            self.deliver(&notification).await;
            if let Err(e) = self
                .publisher
                .publish(DomainEvent::NotificationEscalated {
                    notification_id: notification.id,
                    escalation_level: notification.escalation_level,
                    timestamp: now,
                })
                .await
            {
                warn!(error = %e, "Failed to publish notification event");
            }
        }

        if report != SweepReport::default() {
            debug!(
                expired = report.expired,
                auto_acknowledged = report.auto_acknowledged,
                escalated = report.escalated,
                "Notification sweep finished"
            );
        }
        report
    }

    /// React to a command lifecycle event
    pub async fn on_command_event(&self, event: &DomainEvent) -> Option<Notification> {
        match event {
            DomainEvent::CommandFailed { command, .. } | DomainEvent::CommandTimedOut { command, .. } => {
                self.command_exhausted(command).await
            }
            DomainEvent::CommandCompleted { command, .. }
                if self.policy.notify_on_success && command.origin.is_automation() =>
            {
                let draft = NotificationDraft::new(
                    NotificationLevel::Info,
                    NotificationType::AutomationTriggered,
                    "Automation executed",
                    format!("{} completed on device {}", command.command, command.device_id),
                )
                .room(command.room_id.clone())
                .device(command.device_id.clone())
                .rule(command.origin.rule_id().cloned())
                .execution(command.origin.execution_id())
                .command(command.id)
                .auto_acknowledge_after(60);
                Some(self.raise(draft).await)
            }
            _ => None,
        }
    }

    /// One critical notification per command whose retries ran out
    async fn command_exhausted(&self, command: &Command) -> Option<Notification> {
        if !self.notified_commands.insert(command.id) {
            debug!(command_id = %command.id, "Failure already notified");
            return None;
        }

        let reason = command
            .last_error
            .clone()
            .unwrap_or_else(|| command.status.to_string());
        let (kind, title) = if command.origin.is_automation() {
            (NotificationType::AutomationFailed, "Automation command failed")
        } else {
            (NotificationType::CommandFailed, "Command failed")
        };
        let message = format!(
            "{} on device {} ended as {} after {} retries: {}",
            command.command, command.device_id, command.status, command.retry_count, reason
        );

        let draft = NotificationDraft::new(NotificationLevel::Critical, kind, title, message)
            .room(command.room_id.clone())
            .device(command.device_id.clone())
            .rule(command.origin.rule_id().cloned())
            .execution(command.origin.execution_id())
            .command(command.id)
            .action_required();
        Some(self.raise(draft).await)
    }

    /// The dispatcher refused a fired rule's command
    pub async fn dispatch_rejected(
        &self,
        rule: &AutomationRule,
        execution_id: ExecutionId,
        reason: &str,
    ) -> Notification {
        let draft = NotificationDraft::new(
            NotificationLevel::Critical,
            NotificationType::AutomationFailed,
            "Automation could not dispatch",
            format!("Rule '{}' could not send {}: {}", rule.name, rule.action.command, reason),
        )
        .room(Some(rule.room_id.clone()))
        .device(rule.action.device_id.clone())
        .rule(Some(rule.id.clone()))
        .execution(Some(execution_id))
        .action_required();
        self.raise(draft).await
    }

    /// A reading left its configured safe range
    pub async fn threshold_exceeded(
        &self,
        room_id: &RoomId,
        device_id: &DeviceId,
        parameter: SensorParameter,
        value: f64,
        limit: f64,
    ) -> Notification {
        let direction = if value > limit { "above" } else { "below" };
        let draft = NotificationDraft::new(
            NotificationLevel::Warning,
            NotificationType::ThresholdExceeded,
            format!("{} out of range", parameter),
            format!(
                "{} in room {} is {}{} ({} limit {}{})",
                parameter,
                room_id,
                value,
                parameter.unit(),
                direction,
                limit,
                parameter.unit()
            ),
        )
        .room(Some(room_id.clone()))
        .device(device_id.clone());
        self.raise(draft).await
    }

    pub fn get(&self, id: &NotificationId) -> Option<Notification> {
        self.notifications.get(id).map(|n| n.clone())
    }

    /// Highest priority first, newest first within a priority
    pub fn list(&self, predicate: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| predicate(n.value()))
            .map(|n| n.clone())
            .collect();
        notifications.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then(b.created_at.cmp(&a.created_at))
        });
        notifications
    }

    pub fn unacknowledged(&self) -> Vec<Notification> {
        self.list(|n| n.status.awaits_acknowledgment())
    }

    pub fn stats(&self) -> NotificationStats {
        let mut stats = NotificationStats::default();
        for n in self.notifications.iter() {
            stats.total += 1;
            if n.status.awaits_acknowledgment() {
                stats.unacknowledged += 1;
            }
            *stats.by_level.entry(n.level).or_default() += 1;
        }
        stats
    }

    /// Release the failure dedupe for commands the dispatcher no longer
    /// holds. No further events can arrive for them.
    pub fn forget_commands(&self, command_ids: &[CommandId]) -> usize {
        command_ids
            .iter()
            .filter(|id| self.notified_commands.remove(*id).is_some())
            .count()
    }

    pub fn notified_command_count(&self) -> usize {
        self.notified_commands.len()
    }

    /// Drop closed notifications created before `cutoff`
    pub fn prune_closed(&self, cutoff: Timestamp) -> usize {
        let before = self.notifications.len();
        self.notifications
            .retain(|_, n| !(n.status.is_closed() && n.created_at < cutoff));
        before.saturating_sub(self.notifications.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::command::{CommandDefaults, FailureKind};
    use domain::{CommandRequest, ManualClock, NotificationStatus, RuleId};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        delivered: StdMutex<Vec<Notification>>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(
            &self,
            notification: &Notification,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct NullPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish(
            &self,
            _event: DomainEvent,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    mockall::mock! {
        Sink {}

        #[async_trait::async_trait]
        impl NotificationSink for Sink {
            async fn notify(
                &self,
                notification: &Notification,
            ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn setup(policy: EscalationPolicy) -> (NotificationEscalator, Arc<RecordingSink>, Arc<ManualClock>) {
        let sink = Arc::new(RecordingSink {
            delivered: StdMutex::new(Vec::new()),
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let escalator =
            NotificationEscalator::new(sink.clone(), Arc::new(NullPublisher), clock.clone(), policy);
        (escalator, sink, clock)
    }

    fn warning() -> NotificationDraft {
        NotificationDraft::new(
            NotificationLevel::Warning,
            NotificationType::DeviceOffline,
            "Fan offline",
            "fan-1 stopped reporting",
        )
    }

    fn exhausted_command(request: CommandRequest) -> Command {
        let mut command = Command::issue(request, &CommandDefaults::default(), t0());
        command.max_retries = 0;
        command
            .register_failure(FailureKind::Delivery, "broker down", t0(), Duration::seconds(60))
            .unwrap();
        command
    }

    #[tokio::test]
    async fn test_raise_scores_and_delivers() {
        let (escalator, sink, _) = setup(EscalationPolicy::default());
        let notification = escalator.raise(warning().action_required()).await;

        // 50 (warning) + 20 (warning type) + 30 (action)
        assert_eq!(notification.priority_score, 100);
        assert_eq!(notification.status, NotificationStatus::Unread);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
        assert_eq!(escalator.get(&notification.id), Some(notification));
    }

    #[tokio::test]
    async fn test_escalation_stops_at_max_level() {
        let policy = EscalationPolicy {
            escalate_after: Duration::minutes(10),
            max_escalation_level: 2,
            notify_on_success: false,
        };
        let (escalator, sink, clock) = setup(policy);
        let notification = escalator.raise(warning()).await;

        clock.advance(Duration::minutes(5));
        assert_eq!(escalator.sweep(clock.now()).await.escalated, 0);

        clock.advance(Duration::minutes(6));
        assert_eq!(escalator.sweep(clock.now()).await.escalated, 1);

        // Measured from the previous escalation
        clock.advance(Duration::minutes(5));
        assert_eq!(escalator.sweep(clock.now()).await.escalated, 0);
        clock.advance(Duration::minutes(5));
        assert_eq!(escalator.sweep(clock.now()).await.escalated, 1);

        clock.advance(Duration::hours(1));
        assert_eq!(escalator.sweep(clock.now()).await.escalated, 0);

        let stored = escalator.get(&notification.id).unwrap();
        assert_eq!(stored.status, NotificationStatus::Escalated);
        assert_eq!(stored.escalation_level, 2);
        // Initial delivery plus one per escalation
        assert_eq!(sink.delivered.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_acknowledged_notifications_never_escalate() {
        let (escalator, _, clock) = setup(EscalationPolicy::default());
        let notification = escalator.raise(warning()).await;
        escalator
            .acknowledge(notification.id, "grower-1", Some("on it".into()))
            .unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(escalator.sweep(clock.now()).await, SweepReport::default());

        let stored = escalator.get(&notification.id).unwrap();
        assert_eq!(stored.status, NotificationStatus::Acknowledged);
        assert_eq!(stored.acknowledged_by.as_deref(), Some("grower-1"));
    }

    #[tokio::test]
    async fn test_sweep_expires_and_auto_acknowledges() {
        let (escalator, _, clock) = setup(EscalationPolicy::default());
        let expiring = escalator
            .raise(warning().expires_at(t0() + Duration::minutes(1)))
            .await;
        let auto = escalator.raise(warning().auto_acknowledge_after(2)).await;

        clock.advance(Duration::minutes(3));
        let report = escalator.sweep(clock.now()).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.auto_acknowledged, 1);

        assert_eq!(escalator.get(&expiring.id).unwrap().status, NotificationStatus::Expired);
        let auto = escalator.get(&auto.id).unwrap();
        assert_eq!(auto.status, NotificationStatus::Acknowledged);
        assert_eq!(auto.acknowledged_by.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_exhausted_command_raises_one_critical_notification() {
        let (escalator, sink, _) = setup(EscalationPolicy::default());
        let request = CommandRequest::automation(
            RuleId::new("r1").unwrap(),
            ExecutionId::new(),
            DeviceId::new("fan-1").unwrap(),
            RoomId::new("room-1").unwrap(),
            "turn_on_fan",
            json!({}),
            5,
        );
        let event = DomainEvent::CommandFailed {
            command: exhausted_command(request),
            timestamp: t0(),
        };

        let raised = escalator.on_command_event(&event).await.unwrap();
        assert_eq!(raised.level, NotificationLevel::Critical);
        assert_eq!(raised.kind, NotificationType::AutomationFailed);
        assert_eq!(raised.rule_id, Some(RuleId::new("r1").unwrap()));
        assert!(raised.action_required);

        assert!(escalator.on_command_event(&event).await.is_none());
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_command_failure_uses_command_failed_type() {
        let (escalator, _, _) = setup(EscalationPolicy::default());
        let request = CommandRequest::manual(DeviceId::new("fan-1").unwrap(), "turn_on_fan", json!({}), "user-1");
        let raised = escalator
            .on_command_event(&DomainEvent::CommandFailed {
                command: exhausted_command(request),
                timestamp: t0(),
            })
            .await
            .unwrap();
        assert_eq!(raised.kind, NotificationType::CommandFailed);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_lose_notification() {
        let mut sink = MockSink::new();
        sink.expect_notify()
            .times(1)
            .returning(|_| Err("smtp down".into()));
        let escalator = NotificationEscalator::new(
            Arc::new(sink),
            Arc::new(NullPublisher),
            Arc::new(ManualClock::new(t0())),
            EscalationPolicy::default(),
        );

        let notification = escalator.raise(warning()).await;
        assert!(escalator.get(&notification.id).is_some());
        assert_eq!(escalator.stats().unacknowledged, 1);
    }

    #[tokio::test]
    async fn test_unknown_notification_is_an_error() {
        let (escalator, _, _) = setup(EscalationPolicy::default());
        let err = escalator.mark_read(NotificationId::new()).unwrap_err();
        assert!(matches!(err, DomainError::NotificationNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_orders_by_priority() {
        let (escalator, _, _) = setup(EscalationPolicy::default());
        let low = escalator
            .raise(NotificationDraft::new(
                NotificationLevel::Info,
                NotificationType::General,
                "Harvest reminder",
                "Room 2 ready",
            ))
            .await;
        let high = escalator.raise(warning().action_required()).await;
        escalator.dismiss(low.id).unwrap();

        let all: Vec<NotificationId> = escalator.list(|_| true).iter().map(|n| n.id).collect();
        assert_eq!(all, vec![high.id, low.id]);
        assert_eq!(escalator.unacknowledged().len(), 1);

        let stats = escalator.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_level.get(&NotificationLevel::Info), Some(&1));
    }
}

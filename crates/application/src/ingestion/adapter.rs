use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use domain::error::{DomainError, Result};
use domain::{
    AutomationRule, Clock, Command, CommandId, CommandRequest, DeviceId, RoomId, RuleId,
    SensorParameter, TelemetryReading, Timestamp,
};
use tracing::{debug, info, warn};

use super::AlertPolicy;
use crate::dispatch::CommandDispatcher;
use crate::executions::ExecutionRecorder;
use crate::notifications::NotificationEscalator;
use crate::rules::{FiringDecision, RateLimiter, RuleEvaluator, RuleIndex};

/// Device-reported command progress
#[derive(Debug, Clone, PartialEq)]
pub enum CommandStatusUpdate {
    Acknowledged,
    Completed,
    Failed(String),
}

impl CommandStatusUpdate {
    /// Map a device status string. Unknown statuses yield `None`.
    pub fn parse(status: &str, payload: Option<&serde_json::Value>) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "acknowledged" | "ack" | "acked" | "received" => Some(Self::Acknowledged),
            "completed" | "success" | "done" => Some(Self::Completed),
            "failed" | "error" => {
                let reason = payload
                    .and_then(|p| p.get("error"))
                    .and_then(|e| e.as_str())
                    .unwrap_or("Device reported failure");
                Some(Self::Failed(reason.to_string()))
            }
            _ => None,
        }
    }
}

/// What removing a device cleaned up
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCleanup {
    pub cancelled_commands: Vec<CommandId>,
    pub removed_rules: Vec<RuleId>,
}

/// Entry point for everything arriving from outside the engine: telemetry,
/// device status reports and rule changes.
pub struct IngestionAdapter {
    index: Arc<RuleIndex>,
    limiter: Arc<RateLimiter>,
    evaluator: Arc<RuleEvaluator>,
    dispatcher: CommandDispatcher,
    recorder: Arc<ExecutionRecorder>,
    escalator: Arc<NotificationEscalator>,
    clock: Arc<dyn Clock>,
    alerts: AlertPolicy,
    last_alerts: DashMap<(RoomId, SensorParameter), Timestamp>,
    latest: DashMap<RoomId, TelemetryReading>,
}

impl IngestionAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Arc<RuleIndex>,
        limiter: Arc<RateLimiter>,
        evaluator: Arc<RuleEvaluator>,
        dispatcher: CommandDispatcher,
        recorder: Arc<ExecutionRecorder>,
        escalator: Arc<NotificationEscalator>,
        clock: Arc<dyn Clock>,
        alerts: AlertPolicy,
    ) -> Self {
        Self {
            index,
            limiter,
            evaluator,
            dispatcher,
            recorder,
            escalator,
            clock,
            alerts,
            last_alerts: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    /// Evaluate a raw sensor payload and dispatch whatever fires. Returns
    /// the commands that were queued. Each firing is dispatched on its own;
    /// a rejected one is recorded and never holds back the rest.
    pub async fn on_telemetry(
        &self,
        room_id: RoomId,
        device_id: DeviceId,
        values: &HashMap<String, f64>,
        recorded_at: Timestamp,
    ) -> Vec<Command> {
        let (reading, ignored) = TelemetryReading::from_raw(
            room_id,
            device_id,
            values.iter().map(|(k, v)| (k.as_str(), *v)),
            recorded_at,
        );
        if !ignored.is_empty() {
            debug!(device_id = %reading.device_id, keys = ?ignored, "Ignored telemetry keys");
        }
        if reading.is_empty() {
            return Vec::new();
        }

        self.check_alerts(&reading).await;
        self.latest.insert(reading.room_id.clone(), reading.clone());

        let decisions = self.evaluator.evaluate(&reading).await;
        let mut commands = Vec::with_capacity(decisions.len());
        for decision in decisions {
            if let Some(command) = self.dispatch_decision(decision).await {
                commands.push(command);
            }
        }
        commands
    }

    async fn dispatch_decision(&self, decision: FiringDecision) -> Option<Command> {
        let rule = decision.rule;
        let request = CommandRequest::automation(
            rule.id.clone(),
            decision.execution_id,
            rule.action.device_id.clone(),
            rule.room_id.clone(),
            rule.action.command.clone(),
            rule.action.params.clone(),
            rule.priority,
        );

        match self.dispatcher.dispatch(request).await {
            Ok(command) => {
                info!(
                    rule_id = %rule.id,
                    command_id = %command.id,
                    device_id = %command.device_id,
                    "⚡ Automation command dispatched"
                );
                Some(command)
            }
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "Dispatcher rejected automation command");
                let reason = e.to_string();
                if let Err(store_err) = self
                    .recorder
                    .record_dispatch_failure(decision.execution_id, reason.clone())
                    .await
                {
                    warn!(
                        execution_id = %decision.execution_id,
                        error = %store_err,
                        "Failed to record dispatch failure"
                    );
                }
                self.escalator
                    .dispatch_rejected(&rule, decision.execution_id, &reason)
                    .await;
                None
            }
        }
    }

    async fn check_alerts(&self, reading: &TelemetryReading) {
        let now = self.clock.now();
        for (parameter, value) in &reading.values {
            let Some(limit) = self.alerts.check(*parameter, *value) else {
                continue;
            };

            let key = (reading.room_id.clone(), *parameter);
            let suppressed = self
                .last_alerts
                .get(&key)
                .is_some_and(|last| now - *last < self.alerts.suppression);
            if suppressed {
                debug!(room_id = %reading.room_id, parameter = %parameter, "Alert suppressed");
                continue;
            }

            self.last_alerts.insert(key, now);
            self.escalator
                .threshold_exceeded(&reading.room_id, &reading.device_id, *parameter, *value, limit)
                .await;
        }
    }

    /// Route a device status report to the dispatcher. Unknown statuses are
    /// ignored.
    pub async fn on_command_status(
        &self,
        command_id: CommandId,
        status: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Option<Command>> {
        let Some(update) = CommandStatusUpdate::parse(status, payload.as_ref()) else {
            warn!(command_id = %command_id, status = %status, "Unknown command status ignored");
            return Ok(None);
        };

        let command = match update {
            CommandStatusUpdate::Acknowledged => {
                self.dispatcher.on_acknowledged(command_id, payload).await?
            }
            CommandStatusUpdate::Completed => self.dispatcher.on_completed(command_id, payload).await?,
            CommandStatusUpdate::Failed(reason) => self.dispatcher.fail(command_id, reason).await?,
        };
        Ok(Some(command))
    }

    pub fn on_rule_created(&self, rule: AutomationRule) -> Result<()> {
        let rule_id = rule.id.clone();
        self.index.upsert(rule)?;
        info!(rule_id = %rule_id, "➕ Rule added");
        Ok(())
    }

    /// Replace a rule definition. Trigger bookkeeping carries over.
    pub fn on_rule_updated(&self, rule: AutomationRule) -> Result<()> {
        let rule_id = rule.id.clone();
        self.index.upsert(rule)?;
        info!(rule_id = %rule_id, "✏️ Rule updated");
        Ok(())
    }

    pub fn on_rule_deleted(&self, rule_id: &RuleId) -> bool {
        let removed = self.index.remove(rule_id).is_some();
        self.limiter.forget(rule_id);
        if removed {
            info!(rule_id = %rule_id, "➖ Rule deleted");
        }
        removed
    }

    pub fn on_rule_enabled_changed(&self, rule_id: &RuleId, enabled: bool) -> Result<()> {
        let rule = self
            .index
            .get(rule_id)
            .ok_or_else(|| DomainError::RuleIndexStale(rule_id.clone()))?;
        if rule.enabled == enabled {
            return Ok(());
        }
        self.index
            .upsert(AutomationRule::clone(&rule).with_enabled(enabled))?;
        info!(rule_id = %rule_id, enabled, "🔀 Rule toggled");
        Ok(())
    }

    /// Purge everything the engine holds for a room
    pub async fn on_room_removed(&self, room_id: &RoomId) -> Vec<RuleId> {
        let removed = self.index.remove_room(room_id);
        for rule_id in &removed {
            self.limiter.forget(rule_id);
        }
        self.evaluator.forget_room(room_id);
        self.latest.remove(room_id);
        self.last_alerts.retain(|(room, _), _| room != room_id);

        let pending = self.dispatcher.filter(|c| {
            c.room_id.as_ref() == Some(room_id) && c.status == domain::CommandStatus::Pending
        });
        for command in pending {
            if let Err(e) = self.dispatcher.cancel(command.id).await {
                debug!(command_id = %command.id, error = %e, "Command left its pending state first");
            }
        }

        info!(room_id = %room_id, rules = removed.len(), "🧹 Room removed from engine");
        removed
    }

    /// Cancel a device's pending commands and drop the rules that target it
    pub async fn on_device_removed(&self, device_id: &DeviceId) -> DeviceCleanup {
        let cancelled_commands = self.dispatcher.cancel_device(device_id).await;

        let mut removed_rules = Vec::new();
        for rule in self.index.rules_targeting(device_id) {
            if self.index.remove(&rule.id).is_some() {
                self.limiter.forget(&rule.id);
                removed_rules.push(rule.id.clone());
            }
        }

        info!(
            device_id = %device_id,
            commands = cancelled_commands.len(),
            rules = removed_rules.len(),
            "🧹 Device removed from engine"
        );
        DeviceCleanup {
            cancelled_commands,
            removed_rules,
        }
    }

    /// Most recent reading seen for a room
    pub fn latest_reading(&self, room_id: &RoomId) -> Option<TelemetryReading> {
        self.latest.get(room_id).map(|r| r.clone())
    }
}

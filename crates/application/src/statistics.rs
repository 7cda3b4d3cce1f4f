use std::sync::Arc;

use domain::error::Result;
use domain::{
    AutomationRule, Clock, Command, CommandStatus, DeviceId, ExecutionStatus, RoomId, RuleId,
    SkipReason, Timestamp,
};
use serde::Serialize;

use crate::dispatch::CommandDispatcher;
use crate::executions::ExecutionRecorder;
use crate::notifications::{NotificationEscalator, NotificationStats};
use crate::rules::{RateLimiter, RuleIndex};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStats {
    pub rule_id: RuleId,
    pub name: String,
    pub enabled: bool,
    pub trigger_count: u64,
    pub executions_today: u32,
    pub last_triggered_at: Option<Timestamp>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub last_skip_reason: Option<SkipReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Cancelled or expired
    pub cancelled: usize,
    /// Not finished yet
    pub pending: usize,
    /// Completed share of all commands, in percent
    pub success_rate: f64,
}

impl CommandStats {
    fn tally<'a>(commands: impl IntoIterator<Item = &'a Command>) -> Self {
        let mut stats = Self::default();
        for command in commands {
            stats.total += 1;
            match command.status {
                CommandStatus::Completed => stats.completed += 1,
                CommandStatus::Failed => stats.failed += 1,
                CommandStatus::Timeout => stats.timed_out += 1,
                CommandStatus::Cancelled | CommandStatus::Expired => stats.cancelled += 1,
                CommandStatus::Pending | CommandStatus::Sent | CommandStatus::Acknowledged => {
                    stats.pending += 1
                }
            }
        }
        if stats.total > 0 {
            stats.success_rate = stats.completed as f64 / stats.total as f64 * 100.0;
        }
        stats
    }
}

/// Read-only views over engine state
pub struct StatisticsService {
    index: Arc<RuleIndex>,
    limiter: Arc<RateLimiter>,
    recorder: Arc<ExecutionRecorder>,
    dispatcher: CommandDispatcher,
    escalator: Arc<NotificationEscalator>,
    clock: Arc<dyn Clock>,
}

impl StatisticsService {
    pub fn new(
        index: Arc<RuleIndex>,
        limiter: Arc<RateLimiter>,
        recorder: Arc<ExecutionRecorder>,
        dispatcher: CommandDispatcher,
        escalator: Arc<NotificationEscalator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            limiter,
            recorder,
            dispatcher,
            escalator,
            clock,
        }
    }

    pub async fn rule_stats(&self, rule_id: &RuleId) -> Result<Option<RuleStats>> {
        match self.index.get(rule_id) {
            Some(rule) => self.stats_for(&rule).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn room_rule_stats(&self, room_id: &RoomId) -> Result<Vec<RuleStats>> {
        let mut stats = Vec::new();
        for rule in self.index.rules_for_room(room_id) {
            stats.push(self.stats_for(&rule).await?);
        }
        Ok(stats)
    }

    async fn stats_for(&self, rule: &AutomationRule) -> Result<RuleStats> {
        let now = self.clock.now();
        // Rules that never reached the limiter still carry their seeded counters
        let state = match self.limiter.state(&rule.id).await {
            Some(state) => state,
            None => rule.persisted_trigger_state(),
        };
        let last = self.recorder.last_for_rule(&rule.id).await?;

        Ok(RuleStats {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            enabled: rule.enabled,
            trigger_count: state.trigger_count,
            executions_today: state.executions_on(now),
            last_triggered_at: state.last_triggered_at,
            last_execution_status: last.as_ref().map(|e| e.status),
            last_skip_reason: last.and_then(|e| e.skip_reason),
        })
    }

    pub fn command_stats(&self) -> CommandStats {
        CommandStats::tally(&self.dispatcher.filter(|_| true))
    }

    pub fn command_stats_for_room(&self, room_id: &RoomId) -> CommandStats {
        CommandStats::tally(&self.dispatcher.filter(|c| c.room_id.as_ref() == Some(room_id)))
    }

    pub fn command_stats_for_device(&self, device_id: &DeviceId) -> CommandStats {
        CommandStats::tally(&self.dispatcher.commands_for_device(device_id))
    }

    pub fn notification_stats(&self) -> NotificationStats {
        self.escalator.stats()
    }
}

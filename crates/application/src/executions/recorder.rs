use std::collections::HashMap;
use std::sync::Arc;

use domain::error::Result;
use domain::ports::ExecutionRepository;
use domain::{
    AutomationExecution, AutomationRule, Clock, CommandId, DomainEvent, ExecutionId,
    ExecutionStatus, RuleId, SkipReason,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Writes one `AutomationExecution` per firing attempt and keeps it in step
/// with the outcome of its command.
///
/// Non-terminal executions are cached until they finish. Every update runs
/// under one writer lock so the store never sees an older snapshot after a
/// newer one.
pub struct ExecutionRecorder {
    repository: Arc<dyn ExecutionRepository>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<ExecutionId, AutomationExecution>>,
}

impl ExecutionRecorder {
    pub fn new(repository: Arc<dyn ExecutionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn record_skipped(
        &self,
        rule: &AutomationRule,
        value: f64,
        reason: SkipReason,
    ) -> Result<AutomationExecution> {
        let execution = AutomationExecution::skipped(rule, value, reason, self.clock.now());
        self.repository.save(&execution).await?;
        debug!(
            rule_id = %rule.id,
            execution_id = %execution.id,
            reason = %reason,
            "⏭️ Execution skipped"
        );
        Ok(execution)
    }

    /// Pending execution for a rule that passed every gate.
    ///
    /// The rule has already spent its trigger, so a store failure does not
    /// stop the firing: the execution stays tracked in memory and is written
    /// again on its next update.
    pub async fn record_fired(&self, rule: &AutomationRule, value: f64) -> AutomationExecution {
        let execution = AutomationExecution::fired(rule, value, self.clock.now());
        let mut in_flight = self.in_flight.lock().await;
        in_flight.insert(execution.id, execution.clone());
        if let Err(e) = self.repository.save(&execution).await {
            warn!(
                rule_id = %rule.id,
                execution_id = %execution.id,
                error = %e,
                "⚠️ Failed to store fired execution, keeping it in memory"
            );
        }
        execution
    }

    pub async fn mark_executing(&self, execution_id: ExecutionId, command_id: CommandId) -> Result<()> {
        self.update(execution_id, |execution, _| {
            if !execution.mark_executing(command_id) {
                debug!(execution_id = %execution.id, "Execution already finished, command link ignored");
                return false;
            }
            true
        })
        .await
        .map(|_| ())
    }

    /// The dispatcher refused the command outright
    pub async fn record_dispatch_failure(&self, execution_id: ExecutionId, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.update(execution_id, move |execution, now| {
            execution.finish(ExecutionStatus::Failed, now, Some(error))
        })
        .await
        .map(|_| ())
    }

    /// Mirror a command lifecycle event onto its originating execution
    pub async fn apply_command_event(&self, event: &DomainEvent) -> Result<()> {
        let Some(command) = event.command() else {
            return Ok(());
        };
        let Some(execution_id) = command.origin.execution_id() else {
            return Ok(());
        };

        match event {
            DomainEvent::CommandQueued { command, .. } => {
                self.mark_executing(execution_id, command.id).await
            }
            DomainEvent::CommandRetryScheduled { command, .. } => {
                let retry_count = command.retry_count;
                let last_error = command.last_error.clone();
                self.update(execution_id, move |execution, _| {
                    if execution.status.is_terminal() {
                        return false;
                    }
                    execution.retry_count = retry_count;
                    execution.error = last_error;
                    true
                })
                .await
                .map(|_| ())
            }
            DomainEvent::CommandCompleted { command, .. } => {
                self.finish(execution_id, command.retry_count, ExecutionStatus::Success, None)
                    .await
            }
            DomainEvent::CommandFailed { command, .. } => {
                self.finish(
                    execution_id,
                    command.retry_count,
                    ExecutionStatus::Failed,
                    command.last_error.clone(),
                )
                .await
            }
            DomainEvent::CommandTimedOut { command, .. } => {
                self.finish(
                    execution_id,
                    command.retry_count,
                    ExecutionStatus::Timeout,
                    command.last_error.clone(),
                )
                .await
            }
            DomainEvent::CommandCancelled { command, .. } => {
                self.finish(
                    execution_id,
                    command.retry_count,
                    ExecutionStatus::Cancelled,
                    Some("Command cancelled".to_string()),
                )
                .await
            }
            DomainEvent::CommandExpired { command, .. } => {
                self.finish(
                    execution_id,
                    command.retry_count,
                    ExecutionStatus::Cancelled,
                    Some("Command expired before delivery".to_string()),
                )
                .await
            }
            _ => Ok(()),
        }
    }

    async fn finish(
        &self,
        execution_id: ExecutionId,
        retry_count: u32,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let changed = self
            .update(execution_id, move |execution, now| {
                if !execution.finish(status, now, error) {
                    return false;
                }
                execution.retry_count = retry_count;
                true
            })
            .await?;
        if changed {
            info!(execution_id = %execution_id, status = %status, "📝 Execution finished");
        }
        Ok(())
    }

    /// Apply `f` to the execution and persist it when `f` reports a change
    async fn update<F>(&self, execution_id: ExecutionId, f: F) -> Result<bool>
    where
        F: FnOnce(&mut AutomationExecution, domain::Timestamp) -> bool,
    {
        let mut in_flight = self.in_flight.lock().await;

        let mut execution = match in_flight.get(&execution_id) {
            Some(execution) => execution.clone(),
            None => match self.repository.find_by_id(&execution_id).await? {
                Some(execution) => execution,
                None => {
                    warn!(execution_id = %execution_id, "Execution not found, update dropped");
                    return Ok(false);
                }
            },
        };

        if !f(&mut execution, self.clock.now()) {
            return Ok(false);
        }

        self.repository.save(&execution).await?;
        if execution.status.is_terminal() {
            in_flight.remove(&execution_id);
        } else {
            in_flight.insert(execution_id, execution);
        }
        Ok(true)
    }

    pub async fn get(&self, execution_id: &ExecutionId) -> Result<Option<AutomationExecution>> {
        if let Some(execution) = self.in_flight.lock().await.get(execution_id) {
            return Ok(Some(execution.clone()));
        }
        self.repository.find_by_id(execution_id).await
    }

    pub async fn last_for_rule(&self, rule_id: &RuleId) -> Result<Option<AutomationExecution>> {
        self.repository.find_last_for_rule(rule_id).await
    }

    pub async fn list_for_rule(&self, rule_id: &RuleId, limit: usize) -> Result<Vec<AutomationExecution>> {
        self.repository.find_by_rule(rule_id, limit).await
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

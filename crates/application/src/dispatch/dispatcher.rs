use std::sync::{Arc, Weak};

use chrono::Duration;
use dashmap::DashMap;
use domain::command::{CommandDefaults, FailureKind, RetryDecision};
use domain::error::{DomainError, Result};
use domain::ports::CommandTransport;
use domain::{
    Clock, Command, CommandEnvelope, CommandId, CommandRequest, CommandStatus, DeviceId,
    DomainEvent, EventPublisher, Timestamp,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub defaults: CommandDefaults,
    /// Upper bound for the exponential retry backoff
    pub backoff_cap: Duration,
    /// How long terminal commands stay queryable
    pub history_retention: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            defaults: CommandDefaults::default(),
            backoff_cap: Duration::seconds(60),
            history_retention: Duration::hours(24),
        }
    }
}

/// One attempt waiting in a device queue. The retry count pins the attempt,
/// so an entry left behind by a timed out attempt is recognised as stale.
#[derive(Debug, Clone, Copy)]
struct QueuedAttempt {
    command_id: CommandId,
    retry_count: u32,
}

enum Prepared {
    Send(CommandEnvelope),
    Expired(Command),
    Stale,
}

/// Owns every command and drives it through its delivery state machine.
///
/// Each device gets a worker task that sends its commands in issuance order.
/// Transport failures are retried in place by that worker after the backoff,
/// so later commands for the device cannot overtake. Timeouts and
/// device-reported failures re-enter the queue once their backoff elapses.
#[derive(Clone)]
pub struct CommandDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    commands: DashMap<CommandId, Command>,
    queues: DashMap<DeviceId, mpsc::UnboundedSender<QueuedAttempt>>,
    transport: Arc<dyn CommandTransport>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                commands: DashMap::new(),
                queues: DashMap::new(),
                transport,
                publisher,
                clock,
                config,
                cancel,
            }),
        }
    }

    /// Validate, register and queue a command. Returns as soon as the
    /// command is queued; delivery happens on the device's worker.
    pub async fn dispatch(&self, request: CommandRequest) -> Result<Command> {
        request.validate()?;

        let now = self.inner.clock.now();
        let command = Command::issue(request, &self.inner.config.defaults, now);
        self.inner.commands.insert(command.id, command.clone());

        info!(
            command_id = %command.id,
            device_id = %command.device_id,
            command = %command.command,
            issued_by = %command.issued_by,
            "📨 Command queued"
        );
        self.inner
            .emit(DomainEvent::CommandQueued {
                command: command.clone(),
                timestamp: now,
            })
            .await;

        self.inner.enqueue(
            &command.device_id,
            QueuedAttempt {
                command_id: command.id,
                retry_count: command.retry_count,
            },
        );
        Ok(command)
    }

    /// Device confirmed receipt. Replays and acks for finished commands are
    /// no-ops.
    pub async fn on_acknowledged(&self, id: CommandId, payload: Option<serde_json::Value>) -> Result<Command> {
        let now = self.inner.clock.now();
        let (snapshot, changed) = {
            let mut cmd = self.inner.get_mut(id)?;
            match cmd.status {
                status if status.is_terminal() || status == CommandStatus::Acknowledged => {
                    (cmd.clone(), false)
                }
                CommandStatus::Pending if cmd.next_attempt_at.is_none() => {
                    // Ack overtook the transport's own confirmation
                    cmd.mark_sent(now)?;
                    cmd.mark_acknowledged(now, payload)?;
                    (cmd.clone(), true)
                }
                _ => {
                    cmd.mark_acknowledged(now, payload)?;
                    (cmd.clone(), true)
                }
            }
        };

        if changed {
            info!(command_id = %id, device_id = %snapshot.device_id, "📬 Command acknowledged");
            self.inner
                .emit(DomainEvent::CommandAcknowledged {
                    command: snapshot.clone(),
                    timestamp: now,
                })
                .await;
        } else {
            debug!(command_id = %id, status = %snapshot.status, "Duplicate acknowledgment ignored");
        }
        Ok(snapshot)
    }

    pub async fn on_completed(&self, id: CommandId, payload: Option<serde_json::Value>) -> Result<Command> {
        let now = self.inner.clock.now();
        let (snapshot, changed) = {
            let mut cmd = self.inner.get_mut(id)?;
            match cmd.status {
                status if status.is_terminal() => (cmd.clone(), false),
                CommandStatus::Pending if cmd.next_attempt_at.is_none() => {
                    cmd.mark_sent(now)?;
                    cmd.mark_completed(now, payload)?;
                    (cmd.clone(), true)
                }
                _ => {
                    cmd.mark_completed(now, payload)?;
                    (cmd.clone(), true)
                }
            }
        };

        if changed {
            info!(command_id = %id, device_id = %snapshot.device_id, "✅ Command completed");
            self.inner
                .emit(DomainEvent::CommandCompleted {
                    command: snapshot.clone(),
                    timestamp: now,
                })
                .await;
        } else {
            debug!(command_id = %id, status = %snapshot.status, "Completion for finished command ignored");
        }
        Ok(snapshot)
    }

    /// Failed attempt: retry after backoff while budget remains, else
    /// `Failed`. No-op for finished commands or ones already waiting out a
    /// backoff.
    pub async fn fail(&self, id: CommandId, reason: impl Into<String>) -> Result<Command> {
        let now = self.inner.clock.now();
        let retry = self
            .inner
            .apply_failure(id, FailureKind::Delivery, reason.into(), now, |cmd| {
                !cmd.status.is_terminal() && cmd.next_attempt_at.is_none()
            })
            .await?;

        if let Some((retry_count, delay)) = retry {
            self.inner.schedule_requeue(id, retry_count, delay);
        }
        self.get(&id).ok_or(DomainError::CommandNotFound(id))
    }

    /// Time out attempts with no acknowledgment. Returns how many commands
    /// were affected.
    pub async fn sweep_timeouts(&self, now: Timestamp) -> usize {
        let due: Vec<(CommandId, u32)> = self
            .inner
            .commands
            .iter()
            .filter(|c| c.is_timed_out(now))
            .map(|c| (c.id, c.timeout_secs))
            .collect();

        let mut affected = 0;
        for (id, timeout_secs) in due {
            let reason = format!("No acknowledgment within {timeout_secs}s");
            match self
                .inner
                .apply_failure(id, FailureKind::Timeout, reason, now, |cmd| cmd.is_timed_out(now))
                .await
            {
                Ok(Some((retry_count, delay))) => {
                    affected += 1;
                    self.inner.schedule_requeue(id, retry_count, delay);
                }
                Ok(None) => affected += 1,
                Err(e) => warn!(command_id = %id, error = %e, "Timeout sweep skipped command"),
            }
        }

        if affected > 0 {
            info!(count = affected, "⏱️ Timeout sweep processed commands");
        }
        affected
    }

    /// Expire pending commands past their expiry. No retry.
    pub async fn sweep_expired(&self, now: Timestamp) -> usize {
        let due: Vec<CommandId> = self
            .inner
            .commands
            .iter()
            .filter(|c| c.is_expired(now))
            .map(|c| c.id)
            .collect();

        let mut expired = 0;
        for id in due {
            let snapshot = match self.inner.commands.get_mut(&id) {
                Some(mut cmd) if cmd.is_expired(now) => match cmd.mark_expired(now) {
                    Ok(()) => cmd.clone(),
                    Err(_) => continue,
                },
                _ => continue,
            };
            expired += 1;
            warn!(command_id = %id, device_id = %snapshot.device_id, "⌛ Command expired before delivery");
            self.inner
                .emit(DomainEvent::CommandExpired {
                    command: snapshot,
                    timestamp: now,
                })
                .await;
        }
        expired
    }

    /// Cancel a command that has not been sent yet
    pub async fn cancel(&self, id: CommandId) -> Result<Command> {
        let now = self.inner.clock.now();
        let snapshot = {
            let mut cmd = self.inner.get_mut(id)?;
            cmd.mark_cancelled(now)?;
            cmd.clone()
        };

        info!(command_id = %id, device_id = %snapshot.device_id, "🚫 Command cancelled");
        self.inner
            .emit(DomainEvent::CommandCancelled {
                command: snapshot.clone(),
                timestamp: now,
            })
            .await;
        Ok(snapshot)
    }

    /// Cancel everything still pending for a device and stop its worker.
    /// Invoked before the device is removed.
    pub async fn cancel_device(&self, device_id: &DeviceId) -> Vec<CommandId> {
        let pending: Vec<CommandId> = self
            .inner
            .commands
            .iter()
            .filter(|c| &c.device_id == device_id && c.status == CommandStatus::Pending)
            .map(|c| c.id)
            .collect();

        let mut cancelled = Vec::with_capacity(pending.len());
        for id in pending {
            match self.cancel(id).await {
                Ok(_) => cancelled.push(id),
                Err(e) => debug!(command_id = %id, error = %e, "Command left its pending state first"),
            }
        }

        if self.inner.queues.remove(device_id).is_some() {
            info!(device_id = %device_id, cancelled = cancelled.len(), "🧹 Device dispatch queue closed");
        }
        cancelled
    }

    /// Forget terminal commands older than the retention window. Returns the
    /// ids that were dropped.
    pub fn prune_history(&self, now: Timestamp) -> Vec<CommandId> {
        let cutoff = now - self.inner.config.history_retention;
        let mut pruned = Vec::new();
        self.inner.commands.retain(|id, cmd| {
            let finished_at = cmd.completed_at.or(cmd.failed_at).unwrap_or(cmd.created_at);
            let expired = cmd.status.is_terminal() && finished_at < cutoff;
            if expired {
                pruned.push(*id);
            }
            !expired
        });
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "Command history pruned");
        }
        pruned
    }

    pub fn get(&self, id: &CommandId) -> Option<Command> {
        self.inner.commands.get(id).map(|c| c.clone())
    }

    pub fn commands_for_device(&self, device_id: &DeviceId) -> Vec<Command> {
        self.filter(|c| &c.device_id == device_id)
    }

    pub fn filter(&self, predicate: impl Fn(&Command) -> bool) -> Vec<Command> {
        let mut commands: Vec<Command> = self
            .inner
            .commands
            .iter()
            .filter(|c| predicate(c.value()))
            .map(|c| c.clone())
            .collect();
        commands.sort_by_key(|c| c.created_at);
        commands
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .commands
            .iter()
            .filter(|c| !c.status.is_terminal())
            .count()
    }

    /// Stop all workers and pending backoff timers
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.queues.clear();
        info!("🛑 Command dispatcher stopped");
    }
}

impl Inner {
    fn get_mut(&self, id: CommandId) -> Result<dashmap::mapref::one::RefMut<'_, CommandId, Command>> {
        self.commands
            .get_mut(&id)
            .ok_or(DomainError::CommandNotFound(id))
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.publisher.publish(event).await {
            warn!(error = %e, "Failed to publish command event");
        }
    }

    fn enqueue(self: &Arc<Self>, device_id: &DeviceId, attempt: QueuedAttempt) {
        if self.cancel.is_cancelled() {
            warn!(command_id = %attempt.command_id, "Dispatcher stopped, attempt not queued");
            return;
        }

        let sender = self
            .queues
            .entry(device_id.clone())
            .or_insert_with(|| self.spawn_worker(device_id.clone()))
            .clone();

        if sender.send(attempt).is_err() {
            // Worker exited; start a fresh one for this device
            let sender = self.spawn_worker(device_id.clone());
            if sender.send(attempt).is_err() {
                error!(command_id = %attempt.command_id, device_id = %device_id, "Failed to queue command");
                return;
            }
            self.queues.insert(device_id.clone(), sender);
        }
    }

    fn spawn_worker(self: &Arc<Self>, device_id: DeviceId) -> mpsc::UnboundedSender<QueuedAttempt> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(run_worker(inner, device_id, rx, cancel));
        tx
    }

    /// Check the queued attempt is still current and build its envelope
    fn prepare(&self, attempt: QueuedAttempt, now: Timestamp) -> Prepared {
        let Some(mut cmd) = self.commands.get_mut(&attempt.command_id) else {
            return Prepared::Stale;
        };
        if cmd.status != CommandStatus::Pending
            || cmd.retry_count != attempt.retry_count
            || cmd.next_attempt_at.is_some()
        {
            return Prepared::Stale;
        }
        if cmd.is_expired(now) {
            return match cmd.mark_expired(now) {
                Ok(()) => Prepared::Expired(cmd.clone()),
                Err(_) => Prepared::Stale,
            };
        }
        Prepared::Send(CommandEnvelope::for_attempt(&*cmd, now))
    }

    async fn deliver(self: &Arc<Self>, mut attempt: QueuedAttempt) {
        loop {
            let now = self.clock.now();
            let envelope = match self.prepare(attempt, now) {
                Prepared::Send(envelope) => envelope,
                Prepared::Expired(snapshot) => {
                    warn!(command_id = %snapshot.id, "⌛ Command expired before delivery");
                    self.emit(DomainEvent::CommandExpired {
                        command: snapshot,
                        timestamp: now,
                    })
                    .await;
                    return;
                }
                Prepared::Stale => {
                    debug!(command_id = %attempt.command_id, retry_count = attempt.retry_count, "Stale queue entry dropped");
                    return;
                }
            };

            let result = self.transport.send(&envelope).await;
            let now = self.clock.now();

            let reason = match result {
                Ok(()) => {
                    self.on_sent(attempt, now).await;
                    return;
                }
                Err(e) => e.to_string(),
            };

            warn!(
                command_id = %attempt.command_id,
                device_id = %envelope.device_id,
                attempt = attempt.retry_count,
                error = %reason,
                "⚠️ Command delivery failed"
            );

            let expected = attempt.retry_count;
            let retry = self
                .apply_failure(attempt.command_id, FailureKind::Delivery, reason, now, |cmd| {
                    cmd.status == CommandStatus::Pending
                        && cmd.retry_count == expected
                        && cmd.next_attempt_at.is_none()
                })
                .await;

            let (retry_count, delay) = match retry {
                Ok(Some(next)) => next,
                Ok(None) => return,
                Err(e) => {
                    error!(command_id = %attempt.command_id, error = %e, "Failed to record delivery failure");
                    return;
                }
            };

            if !self.backoff(delay).await || !self.resume(attempt.command_id, retry_count) {
                return;
            }
            attempt.retry_count = retry_count;
        }
    }

    async fn on_sent(&self, attempt: QueuedAttempt, now: Timestamp) {
        let snapshot = {
            let Some(mut cmd) = self.commands.get_mut(&attempt.command_id) else {
                return;
            };
            let current = cmd.status == CommandStatus::Pending
                && cmd.retry_count == attempt.retry_count
                && cmd.next_attempt_at.is_none();
            if !current || cmd.mark_sent(now).is_err() {
                debug!(command_id = %attempt.command_id, status = %cmd.status, "Send confirmation for superseded attempt");
                return;
            }
            cmd.clone()
        };

        info!(
            command_id = %snapshot.id,
            device_id = %snapshot.device_id,
            attempt = snapshot.retry_count,
            "📤 Command sent"
        );
        self.emit(DomainEvent::CommandSent {
            command: snapshot,
            timestamp: now,
        })
        .await;
    }

    /// Apply the retry-or-terminal policy when `accept` still holds for the
    /// command. Returns the new retry count and its delay when a retry was
    /// scheduled.
    async fn apply_failure(
        &self,
        id: CommandId,
        kind: FailureKind,
        reason: String,
        now: Timestamp,
        accept: impl FnOnce(&Command) -> bool,
    ) -> Result<Option<(u32, Duration)>> {
        let (decision, snapshot) = {
            let mut cmd = self.get_mut(id)?;
            if !accept(&*cmd) {
                debug!(command_id = %id, status = %cmd.status, "Failure for superseded attempt ignored");
                return Ok(None);
            }
            let decision = cmd.register_failure(kind, reason.clone(), now, self.config.backoff_cap)?;
            (decision, cmd.clone())
        };

        match decision {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    command_id = %id,
                    retry = attempt,
                    max_retries = snapshot.max_retries,
                    delay_ms = delay.num_milliseconds(),
                    "🔁 Command retry scheduled"
                );
                self.emit(DomainEvent::CommandRetryScheduled {
                    command: snapshot,
                    reason,
                    delay_ms: delay.num_milliseconds(),
                    timestamp: now,
                })
                .await;
                Ok(Some((attempt, delay)))
            }
            RetryDecision::Exhausted(status) => {
                error!(
                    command_id = %id,
                    device_id = %snapshot.device_id,
                    status = %status,
                    retries = snapshot.retry_count,
                    error = %reason,
                    "❌ Command retries exhausted"
                );
                let event = match kind {
                    FailureKind::Delivery => DomainEvent::CommandFailed {
                        command: snapshot,
                        timestamp: now,
                    },
                    FailureKind::Timeout => DomainEvent::CommandTimedOut {
                        command: snapshot,
                        timestamp: now,
                    },
                };
                self.emit(event).await;
                Ok(None)
            }
        }
    }

    /// Wait out a backoff. False when the dispatcher is shutting down.
    async fn backoff(&self, delay: Duration) -> bool {
        let delay = delay.to_std().unwrap_or_default();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Start the scheduled attempt if nothing else moved the command on
    fn resume(&self, id: CommandId, retry_count: u32) -> bool {
        let Some(mut cmd) = self.commands.get_mut(&id) else {
            return false;
        };
        if cmd.status != CommandStatus::Pending
            || cmd.retry_count != retry_count
            || cmd.next_attempt_at.is_none()
        {
            return false;
        }
        cmd.begin_attempt(self.clock.now());
        true
    }

    fn schedule_requeue(self: &Arc<Self>, id: CommandId, retry_count: u32, delay: Duration) {
        let inner = self.clone();
        tokio::spawn(async move {
            if !inner.backoff(delay).await || !inner.resume(id, retry_count) {
                return;
            }
            let Some(device_id) = inner.commands.get(&id).map(|c| c.device_id.clone()) else {
                return;
            };
            inner.enqueue(
                &device_id,
                QueuedAttempt {
                    command_id: id,
                    retry_count,
                },
            );
        });
    }
}

async fn run_worker(
    inner: Weak<Inner>,
    device_id: DeviceId,
    mut rx: mpsc::UnboundedReceiver<QueuedAttempt>,
    cancel: CancellationToken,
) {
    debug!(device_id = %device_id, "Dispatch worker started");
    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(attempt) => attempt,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.deliver(attempt).await;
    }
    debug!(device_id = %device_id, "Dispatch worker stopped");
}

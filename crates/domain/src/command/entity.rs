use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::{CommandOrigin, CommandRequest, CommandStatus};
use crate::error::Result;
use crate::ids::{CommandId, DeviceId, RoomId};
use crate::time::Timestamp;

/// Limits applied when a request leaves them unset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDefaults {
    pub max_retries: u32,
    pub timeout_secs: u32,
    pub priority: u8,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 30,
            priority: 5,
        }
    }
}

/// Why an attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport rejected the hand-off, or the device reported an error
    Delivery,
    /// No acknowledgment within the timeout
    Timeout,
}

/// What happens after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `Pending`; `attempt` is the new retry count
    Retry { attempt: u32, delay: Duration },
    /// Budget spent; the command is now terminal
    Exhausted(CommandStatus),
}

/// `min(2^retry_count, cap)` seconds
pub fn retry_backoff(retry_count: u32, cap: Duration) -> Duration {
    if retry_count >= 32 {
        return cap;
    }
    std::cmp::min(Duration::seconds(1i64 << retry_count), cap)
}

/// A dispatched device instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub device_id: DeviceId,
    pub room_id: Option<RoomId>,
    pub command: String,
    pub params: serde_json::Value,
    pub issued_by: String,
    pub origin: CommandOrigin,
    pub status: CommandStatus,
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_secs: u32,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    /// Start of the current attempt
    pub issued_at: Timestamp,
    pub sent_at: Option<Timestamp>,
    pub acknowledged_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub failed_at: Option<Timestamp>,
    /// Set while a retry waits out its backoff
    pub next_attempt_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub response: Option<serde_json::Value>,
}

impl Command {
    pub fn issue(request: CommandRequest, defaults: &CommandDefaults, now: Timestamp) -> Self {
        let params = if request.params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            request.params
        };

        Self {
            id: CommandId::new(),
            device_id: request.device_id,
            room_id: request.room_id,
            command: request.command.trim().to_string(),
            params,
            issued_by: request.issued_by,
            origin: request.origin,
            status: CommandStatus::Pending,
            priority: request.priority.unwrap_or(defaults.priority),
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(defaults.max_retries),
            timeout_secs: request.timeout_secs.unwrap_or(defaults.timeout_secs),
            expires_at: request.expires_at,
            created_at: now,
            issued_at: now,
            sent_at: None,
            acknowledged_at: None,
            completed_at: None,
            failed_at: None,
            next_attempt_at: None,
            last_error: None,
            response: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::seconds(i64::from(self.timeout_secs))
    }

    /// When the current attempt times out, if it can time out at all
    pub fn deadline(&self) -> Option<Timestamp> {
        match self.status {
            CommandStatus::Sent => self.sent_at.map(|at| at + self.timeout()),
            CommandStatus::Pending if self.next_attempt_at.is_none() => {
                Some(self.issued_at + self.timeout())
            }
            _ => None,
        }
    }

    pub fn is_timed_out(&self, now: Timestamp) -> bool {
        self.deadline().is_some_and(|deadline| deadline < now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == CommandStatus::Pending && self.expires_at.is_some_and(|at| at < now)
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Start a new attempt once a scheduled backoff has elapsed
    pub fn begin_attempt(&mut self, now: Timestamp) {
        self.next_attempt_at = None;
        self.issued_at = now;
    }

    pub fn mark_sent(&mut self, now: Timestamp) -> Result<()> {
        self.status = self.status.to_sent()?;
        self.sent_at = Some(now);
        self.next_attempt_at = None;
        Ok(())
    }

    pub fn mark_acknowledged(&mut self, now: Timestamp, payload: Option<serde_json::Value>) -> Result<()> {
        self.status = self.status.to_acknowledged()?;
        self.acknowledged_at = Some(now);
        if payload.is_some() {
            self.response = payload;
        }
        Ok(())
    }

    pub fn mark_completed(&mut self, now: Timestamp, payload: Option<serde_json::Value>) -> Result<()> {
        self.status = self.status.to_completed()?;
        self.completed_at = Some(now);
        if payload.is_some() {
            self.response = payload;
        }
        Ok(())
    }

    pub fn mark_cancelled(&mut self, now: Timestamp) -> Result<()> {
        self.status = self.status.to_cancelled()?;
        self.next_attempt_at = None;
        self.failed_at = Some(now);
        Ok(())
    }

    pub fn mark_expired(&mut self, now: Timestamp) -> Result<()> {
        self.status = self.status.to_expired()?;
        self.next_attempt_at = None;
        self.failed_at = Some(now);
        Ok(())
    }

    /// Apply the retry-or-terminal policy to a failed attempt
    pub fn register_failure(
        &mut self,
        kind: FailureKind,
        reason: impl Into<String>,
        now: Timestamp,
        backoff_cap: Duration,
    ) -> Result<RetryDecision> {
        let terminal = match kind {
            FailureKind::Delivery => self.status.to_failed()?,
            FailureKind::Timeout => self.status.to_timeout()?,
        };
        self.last_error = Some(reason.into());

        if self.has_retries_left() {
            let delay = retry_backoff(self.retry_count, backoff_cap);
            self.status = self.status.to_retry()?;
            self.retry_count += 1;
            self.next_attempt_at = Some(now + delay);
            return Ok(RetryDecision::Retry {
                attempt: self.retry_count,
                delay,
            });
        }

        self.status = terminal;
        self.failed_at = Some(now);
        self.next_attempt_at = None;
        Ok(RetryDecision::Exhausted(terminal))
    }
}

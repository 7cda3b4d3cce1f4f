//! Domain layer - Pure growing-room automation model with no I/O
//!
//! This crate contains:
//! - Identifiers (rooms, devices, rules, commands)
//! - Automation rules and their trigger bookkeeping
//! - Executions, commands and notifications with their state machines
//! - Domain events
//! - Ports (traits) implemented by the infrastructure layer
//!
//! Principles:
//! - No dependencies on infrastructure
//! - Every time-dependent decision takes an explicit timestamp
//! - Testable in isolation

pub mod command;
pub mod error;
pub mod event;
pub mod execution;
pub mod ids;
pub mod notification;
pub mod ports;
pub mod rule;
pub mod telemetry;
pub mod time;

// Re-export commonly used types
pub use command::{Command, CommandEnvelope, CommandOrigin, CommandRequest, CommandStatus};
pub use error::{DomainError, TransportError};
pub use event::{DomainEvent, EventPublisher};
pub use execution::{AutomationExecution, ExecutionStatus, SkipReason};
pub use ids::{CommandId, DeviceId, ExecutionId, FarmId, NotificationId, RoomId, RuleId};
pub use notification::{
    Notification, NotificationDraft, NotificationLevel, NotificationStatus, NotificationType,
};
pub use rule::{AutomationRule, Comparator, RuleAction, SensorParameter, TriggerState};
pub use telemetry::TelemetryReading;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

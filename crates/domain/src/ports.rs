//! Interfaces the engine consumes. Implementations live in the
//! infrastructure layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::CommandEnvelope;
use crate::error::{DomainError, TransportError};
use crate::execution::AutomationExecution;
use crate::ids::{DeviceId, ExecutionId, FarmId, RoomId, RuleId};
use crate::notification::Notification;

/// Hands one command attempt to the device network.
///
/// `Ok` means the transport accepted the message, not that the device
/// received it; delivery is confirmed by a separate acknowledgment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, envelope: &CommandEnvelope) -> Result<(), TransportError>;
}

/// Outbound channel for user-facing alerts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        notification: &Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Storage for the execution audit trail
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert or replace
    async fn save(&self, execution: &AutomationExecution) -> Result<(), DomainError>;

    async fn find_by_id(&self, id: &ExecutionId)
    -> Result<Option<AutomationExecution>, DomainError>;

    /// Most recent execution of a rule by `executed_at`
    async fn find_last_for_rule(
        &self,
        rule_id: &RuleId,
    ) -> Result<Option<AutomationExecution>, DomainError>;

    /// Newest first
    async fn find_by_rule(
        &self,
        rule_id: &RuleId,
        limit: usize,
    ) -> Result<Vec<AutomationExecution>, DomainError>;

    async fn find_by_room(&self, room_id: &RoomId) -> Result<Vec<AutomationExecution>, DomainError>;
}

/// Where a device is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocation {
    pub farm_id: FarmId,
    pub room_id: RoomId,
}

/// Resolves devices to their farm and room, owned by the device CRUD layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn locate(&self, device_id: &DeviceId) -> Option<DeviceLocation>;
}

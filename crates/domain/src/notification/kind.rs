use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl NotificationLevel {
    pub fn weight(&self) -> u32 {
        match self {
            Self::Info => 10,
            Self::Warning => 50,
            Self::Critical => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a notification is about. Each type carries a fixed warning/critical
/// classification that feeds the priority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    DeviceOffline,
    DeviceOnline,
    SensorAlert,
    AutomationTriggered,
    AutomationFailed,
    CommandFailed,
    SystemError,
    ThresholdExceeded,
    General,
}

impl NotificationType {
    pub fn is_warning(&self) -> bool {
        !matches!(
            self,
            Self::DeviceOnline | Self::AutomationTriggered | Self::General
        )
    }

    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::SensorAlert
                | Self::AutomationFailed
                | Self::CommandFailed
                | Self::SystemError
                | Self::ThresholdExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceOffline => "device_offline",
            Self::DeviceOnline => "device_online",
            Self::SensorAlert => "sensor_alert",
            Self::AutomationTriggered => "automation_triggered",
            Self::AutomationFailed => "automation_failed",
            Self::CommandFailed => "command_failed",
            Self::SystemError => "system_error",
            Self::ThresholdExceeded => "threshold_exceeded",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_flags() {
        assert!(NotificationType::DeviceOffline.is_warning());
        assert!(!NotificationType::DeviceOffline.is_critical());
        assert!(NotificationType::CommandFailed.is_critical());
        assert!(!NotificationType::AutomationTriggered.is_warning());
        assert!(!NotificationType::General.is_critical());
    }

    #[test]
    fn test_level_ordering() {
        assert!(NotificationLevel::Critical > NotificationLevel::Warning);
        assert_eq!(NotificationLevel::Warning.weight(), 50);
    }
}

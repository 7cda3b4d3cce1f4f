use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use domain::ports::DeviceLocation;
use domain::{AutomationRule, DeviceId, FarmId, RoomId, SensorParameter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Topic for engine events; none disables event publishing
    #[serde(default)]
    pub events_topic: Option<String>,
    #[serde(default)]
    pub notifications_topic: Option<String>,
}

fn default_client_id() -> String {
    "growroom-automation".to_string()
}

fn default_keep_alive_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatcherSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_command_sweep_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_history_retention_hours")]
    pub history_retention_hours: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u32 {
    30
}
fn default_backoff_cap_secs() -> u64 {
    60
}
fn default_command_sweep_secs() -> u64 {
    5
}
fn default_history_retention_hours() -> u64 {
    24
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            sweep_interval_secs: default_command_sweep_secs(),
            history_retention_hours: default_history_retention_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationSection {
    #[serde(default = "default_escalate_after_minutes")]
    pub escalate_after_minutes: u64,
    #[serde(default = "default_max_escalation_level")]
    pub max_escalation_level: u32,
    #[serde(default = "default_notification_sweep_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub notify_on_success: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

fn default_escalate_after_minutes() -> u64 {
    15
}
fn default_max_escalation_level() -> u32 {
    3
}
fn default_notification_sweep_secs() -> u64 {
    60
}
fn default_retention_days() -> u64 {
    7
}

impl Default for NotificationSection {
    fn default() -> Self {
        Self {
            escalate_after_minutes: default_escalate_after_minutes(),
            max_escalation_level: default_max_escalation_level(),
            sweep_interval_secs: default_notification_sweep_secs(),
            notify_on_success: false,
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq)]
pub struct LimitConfig {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertSection {
    #[serde(default = "default_suppression_minutes")]
    pub suppression_minutes: u64,
    /// Keyed by parameter name (`temperature`, `co2`, ...)
    #[serde(default)]
    pub limits: HashMap<String, LimitConfig>,
}

fn default_suppression_minutes() -> u64 {
    30
}

impl Default for AlertSection {
    fn default() -> Self {
        Self {
            suppression_minutes: default_suppression_minutes(),
            limits: HashMap::new(),
        }
    }
}

impl AlertSection {
    /// Limits with recognised parameter names; unknown names are logged
    pub fn parameter_limits(&self) -> HashMap<SensorParameter, LimitConfig> {
        self.limits
            .iter()
            .filter_map(|(key, limit)| match SensorParameter::from_key(key) {
                Some(parameter) => Some((parameter, *limit)),
                None => {
                    tracing::warn!(parameter = %key, "Unknown alert parameter ignored");
                    None
                }
            })
            .collect()
    }
}

/// Where one device is installed
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceEntry {
    pub device_id: DeviceId,
    pub farm_id: FarmId,
    pub room_id: RoomId,
}

impl DeviceEntry {
    pub fn location(&self) -> DeviceLocation {
        DeviceLocation {
            farm_id: self.farm_id.clone(),
            room_id: self.room_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite URL for the execution audit trail. In memory when unset.
    #[serde(default)]
    pub executions_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub notifications: NotificationSection,
    #[serde(default)]
    pub alerts: AlertSection,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rules: Vec<AutomationRule>,
}

impl EngineConfig {
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.port", 1883)?
            // Required so the engine never starts from an empty configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(true))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // e.g. GROWROOM__MQTT__HOST=10.0.0.1
            .add_source(Environment::with_prefix("GROWROOM").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const SAMPLE: &str = r#"
        [mqtt]
        host = "broker.local"
        port = 1884

        [dispatcher]
        max_retries = 5

        [alerts.limits.temperature]
        max = 30.0

        [alerts.limits.humidity]
        min = 80.0
        max = 95.0

        [[devices]]
        device_id = "fan-1"
        farm_id = "farm-1"
        room_id = "room-1"

        [[rules]]
        id = "too-hot"
        room_id = "room-1"
        name = "Too hot"
        parameter = "temperature"
        comparator = ">"
        threshold = 28.0
        cooldown_minutes = 10

        [rules.action]
        device_id = "fan-1"
        command = "turn_on_fan"
    "#;

    fn parse(source: &str) -> EngineConfig {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_sections_and_defaults() {
        let config = parse(SAMPLE);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.client_id, "growroom-automation");
        assert_eq!(config.dispatcher.max_retries, 5);
        assert_eq!(config.dispatcher.timeout_secs, 30);
        assert_eq!(config.notifications.max_escalation_level, 3);
        assert!(config.storage.executions_url.is_none());
        assert_eq!(config.devices[0].location().room_id.as_str(), "room-1");
    }

    #[test]
    fn test_rules_use_domain_defaults() {
        let config = parse(SAMPLE);
        let rule = &config.rules[0];
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.cooldown_minutes, 10);
        assert!(rule.enabled);
        assert_eq!(rule.action.params, serde_json::json!({}));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_alert_limits_by_parameter() {
        let limits = parse(SAMPLE).alerts.parameter_limits();
        assert_eq!(limits[&SensorParameter::Temperature].max, Some(30.0));
        assert_eq!(limits[&SensorParameter::Humidity].min, Some(80.0));
    }
}

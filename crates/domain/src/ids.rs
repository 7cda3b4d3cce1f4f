use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a string identifier owned by the external CRUD layer.
///
/// Rules:
/// - Must be non-empty
/// - Must contain only alphanumeric, underscore, and hyphen
/// - Max length 64 characters (fits a hyphenated UUID with room to spare)
macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier with validation
            pub fn new(id: impl Into<String>) -> Result<Self> {
                let id = id.into();
                validate_external(&id, $label)?;
                Ok(Self(id))
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

/// Declares an identifier minted by the engine itself.
macro_rules! engine_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| DomainError::InvalidId(format!("{s}: {e}")))
            }
        }
    };
}

fn validate_external(id: &str, label: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DomainError::InvalidId(format!("{label} cannot be empty")));
    }

    if id.len() > 64 {
        return Err(DomainError::InvalidId(format!(
            "{label} too long: {} chars (max 64)",
            id.len()
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::InvalidId(format!(
            "{label} {id} must contain only alphanumeric, underscore and hyphen"
        )));
    }

    Ok(())
}

external_id!(
    /// Farm that owns a set of rooms
    FarmId,
    "Farm ID"
);
external_id!(
    /// Growing room
    RoomId,
    "Room ID"
);
external_id!(
    /// Sensor or actuator installed in a room
    DeviceId,
    "Device ID"
);
external_id!(
    /// Automation rule, assigned by the rule CRUD layer
    RuleId,
    "Rule ID"
);

engine_id!(
    /// Dispatched device command
    CommandId
);
engine_id!(
    /// One rule evaluation attempt
    ExecutionId
);
engine_id!(NotificationId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_room_id() {
        let id = RoomId::new("room-a1").unwrap();
        assert_eq!(id.as_str(), "room-a1");
    }

    #[test]
    fn test_uuid_shaped_device_id() {
        let raw = "0b8f2a52-1c3d-4e5f-9a7b-6c5d4e3f2a1b";
        let id = DeviceId::new(raw).unwrap();
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn test_empty_id_rejected() {
        let result = RuleId::new("");
        assert_eq!(
            result.unwrap_err(),
            DomainError::InvalidId("Rule ID cannot be empty".to_string())
        );
    }

    #[test]
    fn test_topic_separator_rejected() {
        // Ids are embedded in MQTT topics, so wildcards and separators are forbidden
        assert!(DeviceId::new("dev/1").is_err());
        assert!(DeviceId::new("dev+").is_err());
        assert!(DeviceId::new("dev#").is_err());
    }

    #[test]
    fn test_too_long_id_rejected() {
        assert!(FarmId::new("f".repeat(65)).is_err());
    }

    #[test]
    fn test_external_id_deserialization_validates() {
        let ok: RoomId = serde_json::from_str("\"room-1\"").unwrap();
        assert_eq!(ok.as_str(), "room-1");
        assert!(serde_json::from_str::<RoomId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_engine_id_round_trips_through_str() {
        let id = CommandId::new();
        let parsed: CommandId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<CommandId>().is_err());
    }
}

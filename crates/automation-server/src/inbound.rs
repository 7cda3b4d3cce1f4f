//! Decoding of device publishes on `farm/+/room/+/device/+/{telemetry|status|ack}`

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use domain::{CommandId, DeviceId, RoomId, Timestamp};
use infrastructure::{DeviceTopic, TopicChannel};
use serde_json::Value;

/// Keys of a telemetry payload that are never sensor values
const TELEMETRY_METADATA: &[&str] = &["timestamp", "device_id", "status", "firmware_version"];

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Telemetry {
        room_id: RoomId,
        device_id: DeviceId,
        values: HashMap<String, f64>,
        recorded_at: Timestamp,
    },
    /// Progress report for a command the engine sent
    CommandStatus {
        device_id: DeviceId,
        command_id: CommandId,
        status: String,
        payload: Value,
    },
    /// Device-level status without a command reference
    DeviceStatus {
        room_id: RoomId,
        device_id: DeviceId,
        status: Option<String>,
        error: Option<String>,
    },
}

impl InboundMessage {
    /// Returns `Ok(None)` for topics the engine does not consume.
    /// `now` stands in for a missing or unreadable telemetry timestamp.
    pub fn parse(topic: &str, payload: &[u8], now: Timestamp) -> Result<Option<Self>> {
        let Some(topic) = DeviceTopic::parse(topic) else {
            return Ok(None);
        };
        if topic.channel == TopicChannel::Command {
            return Ok(None);
        }

        let body: Value = serde_json::from_slice(payload)
            .with_context(|| format!("Payload on {topic} is not JSON"))?;
        let object = body
            .as_object()
            .ok_or_else(|| anyhow!("Payload on {topic} is not a JSON object"))?;

        let message = match topic.channel {
            TopicChannel::Telemetry => {
                let values = object
                    .iter()
                    .filter(|(key, _)| !TELEMETRY_METADATA.contains(&key.as_str()))
                    .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
                    .collect();
                Self::Telemetry {
                    room_id: topic.room_id,
                    device_id: topic.device_id,
                    values,
                    recorded_at: object.get("timestamp").and_then(parse_timestamp).unwrap_or(now),
                }
            }
            TopicChannel::Status | TopicChannel::Ack => match object.get("command_id") {
                Some(id) => {
                    let id = id
                        .as_str()
                        .ok_or_else(|| anyhow!("command_id on {topic} is not a string"))?;
                    let command_id = id.parse::<CommandId>()?;
                    let status = match (object.get("status").and_then(Value::as_str), topic.channel) {
                        (Some(status), _) => status.to_string(),
                        // A bare ack carries no status of its own
                        (None, TopicChannel::Ack) => "acknowledged".to_string(),
                        (None, _) => return Err(anyhow!("Status for command {command_id} has no status field")),
                    };
                    Self::CommandStatus {
                        device_id: topic.device_id,
                        command_id,
                        status,
                        payload: body,
                    }
                }
                None => Self::DeviceStatus {
                    room_id: topic.room_id,
                    device_id: topic.device_id,
                    status: object.get("status").and_then(Value::as_str).map(str::to_string),
                    error: object.get("error").and_then(Value::as_str).map(str::to_string),
                },
            },
            TopicChannel::Command => return Ok(None),
        };
        Ok(Some(message))
    }
}

/// RFC 3339 text, or epoch milliseconds as a number or digit string
fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    let millis = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(at) = DateTime::parse_from_rfc3339(s) {
                return Some(at.with_timezone(&Utc));
            }
            s.parse::<i64>().ok()
        }
        _ => None,
    }?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
    }

    fn parse(topic: &str, body: Value) -> Option<InboundMessage> {
        InboundMessage::parse(topic, body.to_string().as_bytes(), now()).unwrap()
    }

    #[test]
    fn test_telemetry_keeps_numeric_fields() {
        let message = parse(
            "farm/f1/room/r1/device/s1/telemetry",
            json!({
                "device_id": "s1",
                "timestamp": "2024-03-04T09:59:30Z",
                "status": "active",
                "temperature": 24.5,
                "humidity": 88,
                "battery": 3.7
            }),
        );

        let Some(InboundMessage::Telemetry { room_id, values, recorded_at, .. }) = message else {
            panic!("expected telemetry");
        };
        assert_eq!(room_id.as_str(), "r1");
        assert_eq!(values.len(), 3);
        assert_eq!(values["humidity"], 88.0);
        assert_eq!(recorded_at, Utc.with_ymd_and_hms(2024, 3, 4, 9, 59, 30).unwrap());
    }

    #[test]
    fn test_telemetry_timestamp_fallbacks() {
        let epoch = parse(
            "farm/f1/room/r1/device/s1/telemetry",
            json!({"timestamp": 1_709_546_400_000i64, "co2": 900}),
        );
        let Some(InboundMessage::Telemetry { recorded_at, .. }) = epoch else {
            panic!("expected telemetry");
        };
        assert_eq!(recorded_at, Utc.timestamp_millis_opt(1_709_546_400_000).unwrap());

        let garbage = parse(
            "farm/f1/room/r1/device/s1/telemetry",
            json!({"timestamp": "yesterday", "co2": 900}),
        );
        let Some(InboundMessage::Telemetry { recorded_at, .. }) = garbage else {
            panic!("expected telemetry");
        };
        assert_eq!(recorded_at, now());
    }

    #[test]
    fn test_command_status_and_ack() {
        let id = CommandId::new();
        let status = parse(
            "farm/f1/room/r1/device/fan-1/status",
            json!({"command_id": id.to_string(), "status": "acked", "response": "ok"}),
        );
        assert!(matches!(
            status,
            Some(InboundMessage::CommandStatus { command_id, ref status, .. }) if command_id == id && status == "acked"
        ));

        let bare_ack = parse(
            "farm/f1/room/r1/device/fan-1/ack",
            json!({"command_id": id.to_string()}),
        );
        assert!(matches!(
            bare_ack,
            Some(InboundMessage::CommandStatus { ref status, .. }) if status == "acknowledged"
        ));
    }

    #[test]
    fn test_device_status_without_command() {
        let message = parse(
            "farm/f1/room/r1/device/fan-1/status",
            json!({"status": "error", "error": "motor stalled"}),
        );
        assert_eq!(
            message,
            Some(InboundMessage::DeviceStatus {
                room_id: RoomId::new("r1").unwrap(),
                device_id: DeviceId::new("fan-1").unwrap(),
                status: Some("error".into()),
                error: Some("motor stalled".into()),
            })
        );
    }

    #[test]
    fn test_foreign_topics_and_bad_payloads() {
        assert!(parse("growroom/events/RuleFired", json!({})).is_none());
        assert!(parse("farm/f1/room/r1/device/fan-1/command", json!({})).is_none());

        let not_json = InboundMessage::parse("farm/f1/room/r1/device/s1/telemetry", b"24.5", now());
        assert!(not_json.is_err());

        let bad_id = InboundMessage::parse(
            "farm/f1/room/r1/device/s1/status",
            json!({"command_id": "nope", "status": "done"}).to_string().as_bytes(),
            now(),
        );
        assert!(bad_id.is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{DeviceId, RoomId};
use crate::rule::SensorParameter;
use crate::time::Timestamp;

/// Latest values reported by one sensor device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub room_id: RoomId,
    pub device_id: DeviceId,
    pub values: BTreeMap<SensorParameter, f64>,
    pub recorded_at: Timestamp,
}

impl TelemetryReading {
    pub fn new(room_id: RoomId, device_id: DeviceId, recorded_at: Timestamp) -> Self {
        Self {
            room_id,
            device_id,
            values: BTreeMap::new(),
            recorded_at,
        }
    }

    pub fn with_value(mut self, parameter: SensorParameter, value: f64) -> Self {
        self.values.insert(parameter, value);
        self
    }

    /// Build from raw device keys. Unknown keys and non-finite values are
    /// returned separately instead of being evaluated.
    pub fn from_raw<'a>(
        room_id: RoomId,
        device_id: DeviceId,
        raw: impl IntoIterator<Item = (&'a str, f64)>,
        recorded_at: Timestamp,
    ) -> (Self, Vec<String>) {
        let mut reading = Self::new(room_id, device_id, recorded_at);
        let mut ignored = Vec::new();

        for (key, value) in raw {
            match SensorParameter::from_key(key) {
                Some(parameter) if value.is_finite() => {
                    reading.values.insert(parameter, value);
                }
                _ => ignored.push(key.to_string()),
            }
        }

        (reading, ignored)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

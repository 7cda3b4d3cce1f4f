use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Sensor parameters a rule can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorParameter {
    Temperature,
    Humidity,
    Co2,
    Light,
    Moisture,
    #[serde(rename = "ph")]
    Ph,
    Pressure,
    AirQuality,
}

impl SensorParameter {
    pub const ALL: [SensorParameter; 8] = [
        Self::Temperature,
        Self::Humidity,
        Self::Co2,
        Self::Light,
        Self::Moisture,
        Self::Ph,
        Self::Pressure,
        Self::AirQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Co2 => "co2",
            Self::Light => "light",
            Self::Moisture => "moisture",
            Self::Ph => "ph",
            Self::Pressure => "pressure",
            Self::AirQuality => "air_quality",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity | Self::Moisture => "%",
            Self::Co2 => "ppm",
            Self::Light => "lux",
            Self::Ph => "",
            Self::Pressure => "hPa",
            Self::AirQuality => "AQI",
        }
    }

    /// Physically plausible threshold range for rule definitions
    pub fn valid_range(&self) -> RangeInclusive<f64> {
        match self {
            Self::Temperature => -50.0..=100.0,
            Self::Humidity | Self::Moisture => 0.0..=100.0,
            Self::Co2 => 0.0..=10_000.0,
            Self::Light => 0.0..=100_000.0,
            Self::Ph => 0.0..=14.0,
            Self::Pressure => 0.0..=2_000.0,
            Self::AirQuality => 0.0..=500.0,
        }
    }

    /// Resolve a telemetry payload key.
    ///
    /// Field devices publish unit-suffixed keys (`temperature_c`,
    /// `humidity_pct`, `co2_ppm`, `light_lux`, `substrate_moisture`), so both
    /// those and the canonical names are accepted.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        let param = match key.as_str() {
            "temperature" | "temperature_c" | "temp" => Self::Temperature,
            "humidity" | "humidity_pct" => Self::Humidity,
            "co2" | "co2_ppm" => Self::Co2,
            "light" | "light_lux" => Self::Light,
            "moisture" | "substrate_moisture" | "moisture_pct" => Self::Moisture,
            "ph" => Self::Ph,
            "pressure" | "pressure_hpa" => Self::Pressure,
            "air_quality" | "aqi" => Self::AirQuality,
            _ => return None,
        };
        Some(param)
    }
}

impl std::fmt::Display for SensorParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

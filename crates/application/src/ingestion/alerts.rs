use std::collections::HashMap;

use chrono::Duration;
use domain::SensorParameter;
use serde::Deserialize;

/// Safe operating range for one parameter. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct AlertLimit {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AlertLimit {
    /// The bound `value` crosses, if any
    pub fn violated_by(&self, value: f64) -> Option<f64> {
        if let Some(max) = self.max {
            if value > max {
                return Some(max);
            }
        }
        if let Some(min) = self.min {
            if value < min {
                return Some(min);
            }
        }
        None
    }
}

/// Out-of-range alerting for incoming telemetry
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub limits: HashMap<SensorParameter, AlertLimit>,
    /// Minimum gap between two alerts for the same room and parameter
    pub suppression: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            limits: HashMap::new(),
            suppression: Duration::minutes(30),
        }
    }
}

impl AlertPolicy {
    pub fn with_limit(mut self, parameter: SensorParameter, limit: AlertLimit) -> Self {
        self.limits.insert(parameter, limit);
        self
    }

    pub fn check(&self, parameter: SensorParameter, value: f64) -> Option<f64> {
        self.limits.get(&parameter)?.violated_by(value)
    }
}

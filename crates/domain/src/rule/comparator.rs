use serde::{Deserialize, Serialize};

/// Comparison between a sensor value and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">", alias = "GREATER_THAN", alias = "gt")]
    GreaterThan,
    #[serde(rename = ">=", alias = "GREATER_THAN_OR_EQUAL", alias = "gte")]
    GreaterThanOrEqual,
    #[serde(rename = "<", alias = "LESS_THAN", alias = "lt")]
    LessThan,
    #[serde(rename = "<=", alias = "LESS_THAN_OR_EQUAL", alias = "lte")]
    LessThanOrEqual,
    #[serde(rename = "==", alias = "EQUAL", alias = "eq")]
    Equal,
    #[serde(rename = "!=", alias = "NOT_EQUAL", alias = "neq")]
    NotEqual,
}

impl Comparator {
    /// Evaluate `value <op> threshold`.
    ///
    /// Equality is exact. Sensor noise makes `==` and `!=` rarely useful on
    /// real readings, but rules relying on the exact behaviour exist.
    #[allow(clippy::float_cmp)]
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterThanOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessThanOrEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

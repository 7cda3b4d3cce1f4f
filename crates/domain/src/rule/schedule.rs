use chrono::{Datelike, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Hours of the UTC day during which a rule may fire: `[start, end)`.
///
/// A window with `start > end` wraps past midnight, so `22..6` covers
/// 22:00-23:59 and 00:00-05:59. `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start: u32,
    pub end: u32,
}

impl ActiveHours {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start == self.end {
            return true;
        }
        if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        self.contains_hour(at.hour())
    }

    pub fn is_valid(&self) -> bool {
        self.start <= 23 && self.end <= 23
    }
}

/// Weekday restriction; `None` or an empty list means every day
pub fn day_allowed(days: Option<&[Weekday]>, at: Timestamp) -> bool {
    match days {
        Some(days) if !days.is_empty() => days.contains(&at.weekday()),
        _ => true,
    }
}

mod comparator;
mod entity;
mod parameter;
mod schedule;
mod trigger_state;

pub use comparator::Comparator;
pub use entity::{AutomationRule, RuleAction, MAX_PRIORITY, MIN_PRIORITY};
pub use parameter::SensorParameter;
pub use schedule::{day_allowed, ActiveHours};
pub use trigger_state::TriggerState;

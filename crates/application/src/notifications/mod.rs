pub mod escalator;

pub use escalator::{EscalationPolicy, NotificationEscalator, NotificationStats, SweepReport};

//! Application layer - The automation engine
//!
//! Telemetry flows through the rule evaluator into the command dispatcher;
//! command outcomes flow back into the execution recorder and the
//! notification escalator.

pub mod dispatch;
pub mod engine;
pub mod executions;
pub mod ingestion;
pub mod notifications;
pub mod rules;
pub mod statistics;
pub mod sweeper;

pub use dispatch::{CommandDispatcher, DispatcherConfig};
pub use engine::{AutomationEngine, EnginePorts, EngineSettings, SweepSummary};
pub use executions::ExecutionRecorder;
pub use ingestion::{AlertLimit, AlertPolicy, IngestionAdapter};
pub use notifications::{EscalationPolicy, NotificationEscalator};
pub use rules::{RateLimiter, RuleEvaluator, RuleIndex};
pub use statistics::StatisticsService;

use std::sync::Arc;

use async_trait::async_trait;
use domain::error::Result;
use domain::ports::{CommandTransport, ExecutionRepository, NotificationSink};
use domain::{AutomationRule, Clock, Command, CommandRequest, DomainEvent, EventPublisher, Timestamp};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatch::{CommandDispatcher, DispatcherConfig};
use crate::executions::ExecutionRecorder;
use crate::ingestion::{AlertPolicy, IngestionAdapter};
use crate::notifications::{EscalationPolicy, NotificationEscalator, SweepReport};
use crate::rules::{RateLimiter, RuleEvaluator, RuleIndex};
use crate::statistics::StatisticsService;
use crate::sweeper::spawn_periodic;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub dispatcher: DispatcherConfig,
    pub escalation: EscalationPolicy,
    pub alerts: AlertPolicy,
    pub command_sweep_interval: std::time::Duration,
    pub notification_sweep_interval: std::time::Duration,
    /// Closed notifications older than this are dropped by the sweep
    pub notification_retention: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            escalation: EscalationPolicy::default(),
            alerts: AlertPolicy::default(),
            command_sweep_interval: std::time::Duration::from_secs(5),
            notification_sweep_interval: std::time::Duration::from_secs(60),
            notification_retention: chrono::Duration::days(7),
        }
    }
}

/// Adapters the engine runs against
pub struct EnginePorts {
    pub transport: Arc<dyn CommandTransport>,
    pub sink: Arc<dyn NotificationSink>,
    pub executions: Arc<dyn ExecutionRepository>,
    /// Receives every engine event after internal handling
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
}

/// Feeds command lifecycle events to the recorder and the escalator before
/// passing them on
struct CommandOutcomeRouter {
    recorder: Arc<ExecutionRecorder>,
    escalator: Arc<NotificationEscalator>,
    downstream: Arc<dyn EventPublisher>,
}

#[async_trait]
impl EventPublisher for CommandOutcomeRouter {
    async fn publish(
        &self,
        event: DomainEvent,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Err(e) = self.recorder.apply_command_event(&event).await {
            error!(event_type = event.event_type(), error = %e, "Failed to record command outcome");
        }
        self.escalator.on_command_event(&event).await;
        self.downstream.publish(event).await
    }
}

/// What one manual sweep pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub timed_out: usize,
    pub expired: usize,
    pub pruned_commands: usize,
    pub notifications: SweepReport,
}

/// The assembled automation engine
pub struct AutomationEngine {
    index: Arc<RuleIndex>,
    limiter: Arc<RateLimiter>,
    recorder: Arc<ExecutionRecorder>,
    dispatcher: CommandDispatcher,
    escalator: Arc<NotificationEscalator>,
    ingestion: Arc<IngestionAdapter>,
    statistics: Arc<StatisticsService>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl AutomationEngine {
    /// Wire every component and load the initial rule set
    pub fn new(
        settings: EngineSettings,
        ports: EnginePorts,
        rules: impl IntoIterator<Item = AutomationRule>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let clock = ports.clock;
        let index = Arc::new(RuleIndex::with_rules(rules)?);
        let limiter = Arc::new(RateLimiter::new());
        let recorder = Arc::new(ExecutionRecorder::new(ports.executions, clock.clone()));
        let escalator = Arc::new(NotificationEscalator::new(
            ports.sink,
            ports.publisher.clone(),
            clock.clone(),
            settings.escalation.clone(),
        ));

        let router = Arc::new(CommandOutcomeRouter {
            recorder: recorder.clone(),
            escalator: escalator.clone(),
            downstream: ports.publisher.clone(),
        });
        let dispatcher = CommandDispatcher::new(
            ports.transport,
            router,
            clock.clone(),
            settings.dispatcher.clone(),
            cancel.child_token(),
        );

        let evaluator = Arc::new(RuleEvaluator::new(
            index.clone(),
            limiter.clone(),
            recorder.clone(),
            ports.publisher,
            clock.clone(),
        ));
        let ingestion = Arc::new(IngestionAdapter::new(
            index.clone(),
            limiter.clone(),
            evaluator,
            dispatcher.clone(),
            recorder.clone(),
            escalator.clone(),
            clock.clone(),
            settings.alerts.clone(),
        ));
        let statistics = Arc::new(StatisticsService::new(
            index.clone(),
            limiter.clone(),
            recorder.clone(),
            dispatcher.clone(),
            escalator.clone(),
            clock.clone(),
        ));

        info!(rules = index.len(), "🚀 Automation engine ready");

        Ok(Self {
            index,
            limiter,
            recorder,
            dispatcher,
            escalator,
            ingestion,
            statistics,
            clock,
            settings,
            cancel,
        })
    }

    pub fn ingestion(&self) -> Arc<IngestionAdapter> {
        self.ingestion.clone()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn escalator(&self) -> Arc<NotificationEscalator> {
        self.escalator.clone()
    }

    pub fn recorder(&self) -> Arc<ExecutionRecorder> {
        self.recorder.clone()
    }

    pub fn statistics(&self) -> Arc<StatisticsService> {
        self.statistics.clone()
    }

    pub fn index(&self) -> Arc<RuleIndex> {
        self.index.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// Queue a user-issued command
    pub async fn submit_manual(&self, request: CommandRequest) -> Result<Command> {
        self.dispatcher.dispatch(request).await
    }

    /// One pass of every periodic sweep at `now`
    pub async fn sweep_once(&self, now: Timestamp) -> SweepSummary {
        let timed_out = self.dispatcher.sweep_timeouts(now).await;
        let expired = self.dispatcher.sweep_expired(now).await;
        let pruned = self.dispatcher.prune_history(now);
        self.escalator.forget_commands(&pruned);
        let notifications = self.escalator.sweep(now).await;
        self.escalator
            .prune_closed(now - self.settings.notification_retention);
        SweepSummary {
            timed_out,
            expired,
            pruned_commands: pruned.len(),
            notifications,
        }
    }

    /// Start the command and notification sweeps. They stop on shutdown.
    pub fn start_sweeps(&self) -> Vec<JoinHandle<()>> {
        let dispatcher = self.dispatcher.clone();
        let escalator = self.escalator.clone();
        let clock = self.clock.clone();
        let commands = spawn_periodic(
            "command-sweep",
            self.settings.command_sweep_interval,
            self.cancel.clone(),
            move || {
                let dispatcher = dispatcher.clone();
                let escalator = escalator.clone();
                let now = clock.now();
                async move {
                    dispatcher.sweep_timeouts(now).await;
                    dispatcher.sweep_expired(now).await;
                    let pruned = dispatcher.prune_history(now);
                    escalator.forget_commands(&pruned);
                }
            },
        );

        let escalator = self.escalator.clone();
        let clock = self.clock.clone();
        let retention = self.settings.notification_retention;
        let notifications = spawn_periodic(
            "notification-sweep",
            self.settings.notification_sweep_interval,
            self.cancel.clone(),
            move || {
                let escalator = escalator.clone();
                let now = clock.now();
                async move {
                    escalator.sweep(now).await;
                    escalator.prune_closed(now - retention);
                }
            },
        );

        vec![commands, notifications]
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.dispatcher.shutdown();
        info!("🛑 Automation engine stopped");
    }
}

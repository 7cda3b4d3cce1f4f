mod common;

use application::{AlertLimit, EngineSettings};
use chrono::Duration;
use common::{FakeTransport, engine, engine_with, hot_rule, room, rule_id, settle};
use domain::{
    CommandStatus, DeviceId, DomainError, ExecutionStatus, NotificationLevel, NotificationType,
    SensorParameter,
};

#[tokio::test(start_paused = true)]
async fn test_rule_created_at_runtime_fires() {
    let t = engine(vec![]);
    let ingestion = t.engine.ingestion();

    assert!(t.reading(&[("temperature", 30.0)]).await.is_empty());
    ingestion.on_rule_created(hot_rule("hot")).unwrap();
    assert_eq!(t.reading(&[("temperature", 30.0)]).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_rule_rejected_by_feed() {
    let t = engine(vec![]);
    let mut bad = hot_rule("bad");
    bad.priority = 42;

    let err = t.engine.ingestion().on_rule_created(bad).unwrap_err();
    assert!(matches!(err, DomainError::InvalidRuleDefinition(_)));
    assert!(t.engine.index().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_updated_threshold_applies_to_next_reading() {
    let t = engine(vec![hot_rule("hot")]);
    let mut stricter = hot_rule("hot");
    stricter.threshold = 32.0;
    t.engine.ingestion().on_rule_updated(stricter).unwrap();

    assert!(t.reading(&[("temperature", 30.0)]).await.is_empty());
    assert_eq!(t.reading(&[("temperature", 33.0)]).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disable_and_delete() {
    let t = engine(vec![hot_rule("hot")]);
    let ingestion = t.engine.ingestion();

    ingestion.on_rule_enabled_changed(&rule_id("hot"), false).unwrap();
    assert!(t.reading(&[("temperature", 30.0)]).await.is_empty());
    // Disabled rules leave no audit entries
    assert!(
        t.engine
            .recorder()
            .list_for_rule(&rule_id("hot"), 10)
            .await
            .unwrap()
            .is_empty()
    );

    ingestion.on_rule_enabled_changed(&rule_id("hot"), true).unwrap();
    assert_eq!(t.reading(&[("temperature", 30.0)]).await.len(), 1);

    assert!(ingestion.on_rule_deleted(&rule_id("hot")));
    assert!(!ingestion.on_rule_deleted(&rule_id("hot")));
    assert!(matches!(
        ingestion.on_rule_enabled_changed(&rule_id("hot"), true),
        Err(DomainError::RuleIndexStale(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_room_removal_cancels_waiting_commands() {
    let t = engine_with(
        EngineSettings::default(),
        FakeTransport::failing(usize::MAX),
        vec![hot_rule("hot")],
    );
    let command = t.reading(&[("temperature", 30.0)]).await.remove(0);
    // First attempt failed, retry waiting on its backoff
    settle(0).await;
    assert_eq!(
        t.engine.dispatcher().get(&command.id).unwrap().status,
        CommandStatus::Pending
    );

    let removed = t.engine.ingestion().on_room_removed(&room()).await;
    assert_eq!(removed, vec![rule_id("hot")]);
    assert_eq!(
        t.engine.dispatcher().get(&command.id).unwrap().status,
        CommandStatus::Cancelled
    );

    let execution = t
        .engine
        .recorder()
        .last_for_rule(&rule_id("hot"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);

    // The pending backoff never resends a cancelled command
    settle(5).await;
    assert_eq!(t.transport.attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(t.reading(&[("temperature", 30.0)]).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_device_removal_drops_targeting_rules() {
    let mut other = hot_rule("humid");
    other.parameter = SensorParameter::Humidity;
    other.comparator = domain::Comparator::LessThan;
    other.threshold = 80.0;
    other.action.device_id = DeviceId::new("mister-1").unwrap();
    let t = engine_with(
        EngineSettings::default(),
        FakeTransport::failing(usize::MAX),
        vec![hot_rule("hot"), other],
    );

    let fan_command = t.reading(&[("temperature", 30.0)]).await.remove(0);
    settle(0).await;

    let cleanup = t
        .engine
        .ingestion()
        .on_device_removed(&DeviceId::new("fan-1").unwrap())
        .await;
    assert_eq!(cleanup.cancelled_commands, vec![fan_command.id]);
    assert_eq!(cleanup.removed_rules, vec![rule_id("hot")]);
    assert!(t.engine.index().get(&rule_id("humid")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_threshold_alerts_are_suppressed() {
    let mut settings = EngineSettings::default();
    settings.alerts = settings.alerts.with_limit(
        SensorParameter::Humidity,
        AlertLimit {
            min: Some(75.0),
            max: None,
        },
    );
    let t = engine_with(settings, FakeTransport::default(), vec![]);

    t.reading(&[("humidity", 70.0)]).await;
    t.clock.advance(Duration::minutes(10));
    t.reading(&[("humidity", 68.0)]).await;

    let notifications = t.sink.all();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Warning);
    assert_eq!(notifications[0].kind, NotificationType::ThresholdExceeded);

    t.clock.advance(Duration::minutes(21));
    t.reading(&[("humidity", 69.0)]).await;
    assert_eq!(t.sink.all().len(), 2);

    // In range again
    t.clock.advance(Duration::minutes(31));
    t.reading(&[("humidity", 90.0)]).await;
    assert_eq!(t.sink.all().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_statistics_reflect_activity() {
    let t = engine(vec![hot_rule("hot").with_max_executions_per_day(1)]);
    let command = t.reading(&[("temperature", 30.0)]).await.remove(0);
    settle(0).await;
    t.engine
        .ingestion()
        .on_command_status(command.id, "completed", None)
        .await
        .unwrap();
    t.clock.advance(Duration::minutes(10));
    t.reading(&[("temperature", 30.0)]).await;

    let stats = t
        .engine
        .statistics()
        .rule_stats(&rule_id("hot"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.trigger_count, 1);
    assert_eq!(stats.executions_today, 1);
    assert_eq!(stats.last_execution_status, Some(ExecutionStatus::Skipped));

    let commands = t.engine.statistics().command_stats_for_room(&room());
    assert_eq!(commands.total, 1);
    assert_eq!(commands.completed, 1);
    assert_eq!(commands.success_rate, 100.0);

    assert_eq!(t.engine.statistics().notification_stats().total, 0);
    assert!(t.engine.ingestion().latest_reading(&room()).is_some());
}

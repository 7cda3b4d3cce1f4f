use application::{AlertLimit, AlertPolicy, DispatcherConfig, EngineSettings, EscalationPolicy};
use domain::command::CommandDefaults;
use infrastructure::EngineConfig;

/// Map the loaded configuration onto engine tunables
pub fn engine_settings(config: &EngineConfig) -> EngineSettings {
    let dispatcher = &config.dispatcher;
    let notifications = &config.notifications;

    let mut alerts = AlertPolicy {
        suppression: chrono::Duration::minutes(config.alerts.suppression_minutes as i64),
        ..AlertPolicy::default()
    };
    for (parameter, limit) in config.alerts.parameter_limits() {
        alerts = alerts.with_limit(
            parameter,
            AlertLimit {
                min: limit.min,
                max: limit.max,
            },
        );
    }

    EngineSettings {
        dispatcher: DispatcherConfig {
            defaults: CommandDefaults {
                max_retries: dispatcher.max_retries,
                timeout_secs: dispatcher.timeout_secs,
                ..CommandDefaults::default()
            },
            backoff_cap: chrono::Duration::seconds(dispatcher.backoff_cap_secs as i64),
            history_retention: chrono::Duration::hours(dispatcher.history_retention_hours as i64),
        },
        escalation: EscalationPolicy {
            escalate_after: chrono::Duration::minutes(notifications.escalate_after_minutes as i64),
            max_escalation_level: notifications.max_escalation_level,
            notify_on_success: notifications.notify_on_success,
        },
        alerts,
        command_sweep_interval: std::time::Duration::from_secs(dispatcher.sweep_interval_secs.max(1)),
        notification_sweep_interval: std::time::Duration::from_secs(
            notifications.sweep_interval_secs.max(1),
        ),
        notification_retention: chrono::Duration::days(notifications.retention_days as i64),
    }
}

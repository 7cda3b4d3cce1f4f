use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::{AutomationEngine, EnginePorts};
use automation_server::{DeviceMessageRouter, engine_settings, run_listener};
use domain::ports::{ExecutionRepository, NotificationSink};
use domain::{Clock, SystemClock};
use infrastructure::messaging::mqtt_client::MqttPublisherClient;
use infrastructure::{
    CompositeEventPublisher, EngineConfig, EventInterest, InMemoryExecutionRepository, LoggingEventPublisher,
    LoggingNotificationSink, MqttClient, MqttCommandTransport, MqttEventPublisher,
    MqttNotificationSink, SqliteExecutionRepository, StaticDeviceDirectory,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config directory
    #[arg(long)]
    config_dir: Option<String>,

    /// Override MQTT Host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// Override MQTT Port
    #[arg(long)]
    mqtt_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,automation_server=debug,application=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("🍄 Growroom Automation Server Starting...");

    // Run from the workspace root during development
    let config_dir = args.config_dir.unwrap_or_else(|| {
        let dev_dir = "crates/automation-server/config";
        if std::path::Path::new(dev_dir).exists() {
            dev_dir.to_string()
        } else {
            "config".to_string()
        }
    });
    info!("📂 Config directory: {}", config_dir);

    // 1. Configuration
    let mut config = EngineConfig::load(&config_dir)
        .with_context(|| format!("Failed to load configuration from {config_dir}"))?;
    if let Some(host) = args.mqtt_host {
        config.mqtt.host = host;
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt.port = port;
    }
    info!(
        rules = config.rules.len(),
        devices = config.devices.len(),
        "✅ Configuration loaded"
    );

    // 2. MQTT
    let mqtt_client = MqttClient::connect(&config.mqtt)
        .await
        .context("Failed to create MQTT client")?;
    let publisher_client: Arc<dyn MqttPublisherClient> = Arc::new(mqtt_client.clone());

    // 3. Adapters
    let directory = Arc::new(StaticDeviceDirectory::from_entries(&config.devices));
    let transport = Arc::new(MqttCommandTransport::new(publisher_client.clone(), directory));

    let executions: Arc<dyn ExecutionRepository> = match &config.storage.executions_url {
        Some(url) => {
            info!("💾 Execution history stored at {}", url);
            Arc::new(
                SqliteExecutionRepository::new(url)
                    .await
                    .context("Failed to open execution store")?,
            )
        }
        None => {
            info!("💾 Execution history kept in memory");
            Arc::new(InMemoryExecutionRepository::new())
        }
    };

    let mut publisher =
        CompositeEventPublisher::new().route("log", EventInterest::All, Arc::new(LoggingEventPublisher));
    if let Some(topic) = &config.mqtt.events_topic {
        info!(topic = %topic, "Publishing engine events");
        publisher = publisher.route(
            "mqtt",
            EventInterest::Lifecycle,
            Arc::new(MqttEventPublisher::new(publisher_client.clone(), topic.clone())),
        );
    }

    let sink: Arc<dyn NotificationSink> = match &config.mqtt.notifications_topic {
        Some(topic) => Arc::new(MqttNotificationSink::new(publisher_client.clone(), topic.clone())),
        None => Arc::new(LoggingNotificationSink),
    };

    // 4. Engine
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cancel = CancellationToken::new();
    let engine = AutomationEngine::new(
        engine_settings(&config),
        EnginePorts {
            transport,
            sink,
            executions,
            publisher: Arc::new(publisher),
            clock: clock.clone(),
        },
        config.rules.clone(),
        cancel.clone(),
    )
    .context("Failed to build automation engine")?;

    let mut tasks = engine.start_sweeps();

    // 5. Device listener
    let router = Arc::new(DeviceMessageRouter::new(
        engine.ingestion(),
        engine.escalator(),
        clock,
    ));
    let listener_client = mqtt_client.clone();
    let listener_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = run_listener(listener_client, router, listener_cancel).await {
            warn!(error = %e, "Device listener failed");
        }
    }));

    info!("✅ Server Initialized");

    // 6. Shutdown Signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 Shutting down..."),
        Err(err) => warn!(error = %err, "Unable to listen for shutdown signal"),
    }

    engine.shutdown();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    if let Err(e) = mqtt_client.disconnect().await {
        warn!(error = %e, "Failed to disconnect from MQTT broker");
    }

    info!("👋 Good bye!");
    Ok(())
}

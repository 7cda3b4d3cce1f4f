//! Infrastructure layer - Adapters for the automation engine

pub mod config;
pub mod messaging;
pub mod repositories;

pub use config::EngineConfig;
pub use messaging::{
    CompositeEventPublisher, DeviceTopic, EventInterest, LoggingEventPublisher, LoggingNotificationSink,
    MqttClient, MqttCommandTransport, MqttEventPublisher, MqttMessage, MqttNotificationSink,
    MqttPublisherClient, TopicChannel,
};
pub use repositories::{
    InMemoryExecutionRepository, SqliteExecutionRepository, StaticDeviceDirectory,
};

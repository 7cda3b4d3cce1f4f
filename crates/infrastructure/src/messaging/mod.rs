pub mod command_transport;
pub mod composite_publisher;
pub mod logging_publisher;
pub mod mqtt_client;
pub mod mqtt_publisher;
pub mod notification_sink;
pub mod topics;

pub use command_transport::MqttCommandTransport;
pub use composite_publisher::{CompositeEventPublisher, EventInterest};
pub use logging_publisher::LoggingEventPublisher;
pub use mqtt_client::{MqttClient, MqttMessage, MqttPublisherClient};
pub use mqtt_publisher::MqttEventPublisher;
pub use notification_sink::{LoggingNotificationSink, MqttNotificationSink};
pub use topics::{DeviceTopic, TopicChannel};

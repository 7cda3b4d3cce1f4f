//! Growing-room automation server: wires the MQTT adapters to the engine

pub mod inbound;
pub mod listener;
pub mod settings;

pub use inbound::InboundMessage;
pub use listener::{DeviceMessageRouter, MessageAck, RoomLanes, run_listener};
pub use settings::engine_settings;

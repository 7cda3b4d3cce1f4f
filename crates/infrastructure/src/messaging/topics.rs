//! Device topic layout: `farm/{farm}/room/{room}/device/{device}/{channel}`

use domain::{DeviceId, FarmId, RoomId};

/// What a device publishes on, or receives on for `Command`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicChannel {
    Telemetry,
    Status,
    Ack,
    Command,
}

impl TopicChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::Status => "status",
            Self::Ack => "ack",
            Self::Command => "command",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "telemetry" => Some(Self::Telemetry),
            "status" => Some(Self::Status),
            "ack" => Some(Self::Ack),
            "command" => Some(Self::Command),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopic {
    pub farm_id: FarmId,
    pub room_id: RoomId,
    pub device_id: DeviceId,
    pub channel: TopicChannel,
}

impl DeviceTopic {
    pub fn command(farm_id: FarmId, room_id: RoomId, device_id: DeviceId) -> Self {
        Self {
            farm_id,
            room_id,
            device_id,
            channel: TopicChannel::Command,
        }
    }

    pub fn parse(topic: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        let ["farm", farm, "room", room, "device", device, channel] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            farm_id: FarmId::new(*farm).ok()?,
            room_id: RoomId::new(*room).ok()?,
            device_id: DeviceId::new(*device).ok()?,
            channel: TopicChannel::parse(channel)?,
        })
    }

    /// Wildcard subscription for one inbound channel across all devices
    pub fn subscription(channel: TopicChannel) -> String {
        format!("farm/+/room/+/device/+/{}", channel.as_str())
    }
}

impl std::fmt::Display for DeviceTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "farm/{}/room/{}/device/{}/{}",
            self.farm_id,
            self.room_id,
            self.device_id,
            self.channel.as_str()
        )
    }
}

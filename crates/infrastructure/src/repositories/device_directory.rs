use async_trait::async_trait;
use dashmap::DashMap;
use domain::ports::{DeviceDirectory, DeviceLocation};
use domain::DeviceId;
use tracing::info;

use crate::config::DeviceEntry;

/// Device locations known to the engine, seeded from configuration and
/// updated as devices are announced or removed
#[derive(Debug, Default)]
pub struct StaticDeviceDirectory {
    devices: DashMap<DeviceId, DeviceLocation>,
}

impl StaticDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[DeviceEntry]) -> Self {
        let directory = Self::new();
        for entry in entries {
            directory.register(entry.device_id.clone(), entry.location());
        }
        info!(devices = directory.len(), "📇 Device directory loaded");
        directory
    }

    pub fn register(&self, device_id: DeviceId, location: DeviceLocation) {
        self.devices.insert(device_id, location);
    }

    pub fn unregister(&self, device_id: &DeviceId) -> Option<DeviceLocation> {
        self.devices.remove(device_id).map(|(_, location)| location)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for StaticDeviceDirectory {
    async fn locate(&self, device_id: &DeviceId) -> Option<DeviceLocation> {
        self.devices.get(device_id).map(|l| l.clone())
    }
}

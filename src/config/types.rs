use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::device::constants::{CONNECT_DEADLINE, MAX_RECONNECT_ATTEMPTS, POWER_POLL_DELAY, RECONNECT_INTERVAL, WRITE_DEADLINE};
use crate::device::types::DeviceIdentity;

/// Well-known key of the remembered peripheral in the preferences document.
pub const SAVED_DEVICE_KEY: &str = "ble.savedPeripheralId";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub max_reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    pub connect_deadline_ms: u64,
    pub write_deadline_ms: u64,
    pub power_poll_ms: u64,
}

impl SessionSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_deadline(&self) -> Duration {
        Duration::from_millis(self.connect_deadline_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn power_poll(&self) -> Duration {
        Duration::from_millis(self.power_poll_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_interval_ms: RECONNECT_INTERVAL,
            connect_deadline_ms: CONNECT_DEADLINE,
            write_deadline_ms: WRITE_DEADLINE,
            power_poll_ms: POWER_POLL_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(rename = "ble.savedPeripheralId", default, skip_serializing_if = "Option::is_none")]
    pub saved_device: Option<DeviceIdentity>,

    #[serde(default)]
    pub session: SessionSettings,
}

use std::fmt;
use serde::{Deserialize, Serialize};

/// Opaque identifier of a peripheral, as reported by the platform radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceIdentity(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(value: &str) -> Self {
        DeviceIdentity::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub identity: DeviceIdentity,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed device")
    }
}

/// Link state as seen by the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    PoweredOff,
    Idle,
    Scanning,
    Connecting,
    Bound,
    Disconnected,
}

/// The two notify characteristics of the coin box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    CoinCount,
    Status,
}

/// Everything the transport reports back to the session layer, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PowerChanged { powered_on: bool },
    Discovered(DiscoveredDevice),
    Disconnected(DeviceIdentity),
    Notification { channel: Channel, value: Vec<u8> },
}

use serde::{Deserialize, Serialize};

use crate::device::types::{ConnectionState, DeviceIdentity, DiscoveredDevice};
use crate::session::coin::WaitResolver;
use crate::session::payout::PayoutResolver;

/// Coins dispensed by one payout. The hardware has a single denomination, so only `ones` is
/// ever non-zero; the other fields keep the result shape stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispensedCoins {
    pub ones: u16,
    pub fives: u16,
    pub tens: u16,
}

impl DispensedCoins {
    pub fn single(ones: u16) -> Self {
        DispensedCoins { ones, fives: 0, tens: 0 }
    }

    pub fn as_tuple(&self) -> (u16, u16, u16) {
        (self.ones, self.fives, self.tens)
    }
}

/// Observable snapshot of the session, published after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub powered_on: bool,
    pub connected: bool,
    pub connected_device_name: Option<String>,
    pub discovered_devices: Vec<DiscoveredDevice>,
    pub scanning: bool,
    pub manual_selection_requested: bool,
    pub coin_total: u16,
}

impl SessionStatus {
    /// Short text for a status indicator.
    pub fn indicator(&self) -> &str {
        if self.connected {
            self.connected_device_name.as_deref().unwrap_or("Connected")
        }
        else if self.powered_on {
            "Not connected"
        }
        else {
            "Bluetooth off"
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus {
            connection_state: ConnectionState::Idle,
            powered_on: false,
            connected: false,
            connected_device_name: None,
            discovered_devices: Vec::new(),
            scanning: false,
            manual_selection_requested: false,
            coin_total: 0,
        }
    }
}

/// Requests sent from the facade to the session runner.
#[derive(Debug)]
pub enum SessionCommand {
    WaitForCoins { required: u32, resolver: WaitResolver },
    RequestPayout { amount: u32, resolver: PayoutResolver },
    ResetDisplayedCoinCount,
    Bootstrap,
    StartScan,
    StopScan,
    SelectDevice(DeviceIdentity),
    Disconnect,
    ForgetDevice,
    AppForeground,
    AppBackground,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_text() {
        let mut status = SessionStatus::default();
        assert_eq!(status.indicator(), "Bluetooth off");

        status.powered_on = true;
        assert_eq!(status.indicator(), "Not connected");

        status.connected = true;
        assert_eq!(status.indicator(), "Connected");

        status.connected_device_name = Some("KLine CoinBox".to_string());
        assert_eq!(status.indicator(), "KLine CoinBox");
    }

    #[test]
    fn dispensed_coins_tuple() {
        assert_eq!(DispensedCoins::single(300).as_tuple(), (300, 0, 0));
    }
}

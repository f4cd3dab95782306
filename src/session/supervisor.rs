use std::sync::Arc;
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use crate::config::io::PreferenceStore;
use crate::config::types::SessionSettings;
use crate::device::transport::Transport;
use crate::device::types::{ConnectionState, DeviceIdentity, DiscoveredDevice};
use crate::error::DeviceError;
use crate::session::types::SessionStatus;

/// Owns the transport binding and the connection state: scanning, connecting, bounded fixed-delay
/// reconnects and the escalation to manual device selection.
///
/// Pending coin/payout requests are not known here. Whoever drives the supervisor must release
/// them before calling [`Supervisor::on_disconnected`] or [`Supervisor::on_power`] with a lost
/// link, so that the reconnect scheduled there can never resolve a stale request.
pub struct Supervisor<T: Transport> {
    transport: Arc<T>,
    store: PreferenceStore,
    settings: SessionSettings,
    status: Arc<watch::Sender<SessionStatus>>,

    state: ConnectionState,
    powered_on: bool,
    scanning: bool,
    in_background: bool,
    manual_selection_requested: bool,

    attempts: u32,
    retry_at: Option<Instant>,

    remembered: Option<DeviceIdentity>,
    // the peripheral we were last bound to or are connecting to
    target: Option<DeviceIdentity>,
    bound: Option<DiscoveredDevice>,
    discovered: IndexMap<DeviceIdentity, DiscoveredDevice>,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(
        transport: Arc<T>,
        store: PreferenceStore,
        settings: SessionSettings,
        status: Arc<watch::Sender<SessionStatus>>,
    ) -> Self {
        Supervisor {
            transport,
            store,
            settings,
            status,
            state: ConnectionState::Idle,
            powered_on: false,
            scanning: false,
            in_background: false,
            manual_selection_requested: false,
            attempts: 0,
            retry_at: None,
            remembered: None,
            target: None,
            bound: None,
            discovered: IndexMap::new(),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is_bound_to(&self, identity: &DeviceIdentity) -> bool {
        self.bound.as_ref().map_or(false, |device| &device.identity == identity)
    }

    /// Deadline of the single scheduled reconnect attempt, if any.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Read the remembered identity from the preference store.
    pub async fn load_remembered(&mut self) {
        self.remembered = match self.store.saved_device().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!("Failed to read remembered device: {}", err);
                None
            },
        };

        if let Some(identity) = &self.remembered {
            info!("Remembered device: {}", identity);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn publish(&self) {
        let connection_state = self.state;
        let powered_on = self.powered_on;
        let bound = self.bound.as_ref();
        let scanning = self.scanning;
        let manual_selection_requested = self.manual_selection_requested;

        self.status.send_if_modified(|status| {
            let before = status.clone();
            status.connection_state = connection_state;
            status.powered_on = powered_on;
            status.connected = bound.is_some();
            status.connected_device_name = bound.and_then(|device| device.name.clone());
            status.discovered_devices = self.discovered.values().cloned().collect();
            status.scanning = scanning;
            status.manual_selection_requested = manual_selection_requested;
            *status != before
        });
    }

    /// Radio power events supersede every other state. Returns true if an established or
    /// in-progress link was lost because of it.
    pub async fn on_power(&mut self, powered_on: bool) -> bool {
        if powered_on == self.powered_on {
            return false;
        }

        self.powered_on = powered_on;

        if !powered_on {
            info!("Bluetooth powered off");
            let lost = self.bound.take().is_some();
            self.scanning = false;
            self.retry_at = None;
            self.set_state(ConnectionState::PoweredOff);
            self.publish();
            return lost;
        }

        info!("Bluetooth powered on");
        self.set_state(ConnectionState::Idle);
        self.publish();
        self.reconnect_by_identity().await;
        false
    }

    /// Early auto connect: reconnect to the remembered device, or scan.
    pub async fn bootstrap(&mut self) {
        if !self.powered_on {
            debug!("Bootstrap deferred until bluetooth is powered on");
            return;
        }

        if !self.is_bound() && self.state != ConnectionState::Connecting {
            self.reconnect_by_identity().await;
        }
    }

    /// Connect to the remembered device if it is live, otherwise fall back to scanning.
    /// Returns true if bound afterwards.
    async fn reconnect_by_identity(&mut self) -> bool {
        if !self.powered_on {
            return false;
        }

        let identity = match self.remembered.clone().or_else(|| self.target.clone()) {
            Some(identity) => identity,
            None => {
                debug!("No remembered device, scanning");
                self.start_scan().await;
                return false;
            },
        };

        match self.transport.retrieve(&identity).await {
            Ok(Some(device)) => self.connect_to(device.identity).await,
            Ok(None) => {
                info!("Remembered device {} is not available, scanning", identity);
                self.start_scan().await;
                false
            },
            Err(err) => {
                warn!("Failed to look up remembered device {}: {}", identity, err);
                self.start_scan().await;
                false
            },
        }
    }

    /// Issue a connect and bind on success. A failed connect counts as a reconnect attempt.
    async fn connect_to(&mut self, identity: DeviceIdentity) -> bool {
        if self.is_bound_to(&identity) {
            return true;
        }

        if self.scanning {
            self.stop_scan().await;
        }

        info!("Connecting to {}...", identity);
        self.target = Some(identity.clone());
        self.set_state(ConnectionState::Connecting);
        self.publish();

        let result = match timeout(self.settings.connect_deadline(), self.transport.connect(&identity)).await {
            Ok(result) => result,
            Err(_) => {
                // the abandoned connect may still have reached the peripheral
                if let Err(err) = self.transport.disconnect().await {
                    debug!("Nothing to tear down after connect deadline: {}", err);
                }
                Err(DeviceError::DeadlineExceeded("connect"))
            },
        };

        match result {
            Ok(device) => {
                self.on_bound(device).await;
                true
            },
            Err(err) => {
                warn!("Connecting to {} failed: {}", identity, err);
                self.set_state(ConnectionState::Disconnected);
                self.publish();
                self.schedule_reconnect().await;
                false
            },
        }
    }

    async fn on_bound(&mut self, device: DiscoveredDevice) {
        info!("Peripheral {} ({}) ready", device.identity, device.display_name());

        self.attempts = 0;
        self.retry_at = None;
        self.manual_selection_requested = false;

        if self.remembered.as_ref() != Some(&device.identity) {
            match self.store.remember_device(&device.identity).await {
                Ok(()) => self.remembered = Some(device.identity.clone()),
                Err(err) => warn!("Failed to persist device identity: {}", err),
            }
        }

        self.target = Some(device.identity.clone());
        self.bound = Some(device);
        self.set_state(ConnectionState::Bound);
        self.publish();
    }

    /// The link dropped (or the user disconnected). Cancels scanning and schedules a reconnect.
    pub async fn on_disconnected(&mut self) {
        if let Some(device) = self.bound.take() {
            warn!("Connection to {} lost", device.identity);
        }

        if self.scanning {
            self.stop_scan().await;
        }

        self.set_state(ConnectionState::Disconnected);
        self.publish();

        if self.powered_on {
            self.schedule_reconnect().await;
        }
    }

    /// Tear down the link without scheduling a reconnect.
    pub async fn drop_link(&mut self) {
        if self.bound.take().is_some() {
            if let Err(err) = self.transport.disconnect().await {
                warn!("Failed to disconnect: {}", err);
            }
            self.set_state(ConnectionState::Disconnected);
            self.publish();
        }
    }

    /// User initiated disconnect. Handled like a lost link afterwards.
    pub async fn disconnect(&mut self) {
        if let Err(err) = self.transport.disconnect().await {
            warn!("Failed to disconnect: {}", err);
        }
        self.on_disconnected().await;
    }

    /// Replace any scheduled reconnect with a new one, or ask for manual selection once the
    /// attempt budget is spent.
    async fn schedule_reconnect(&mut self) {
        self.retry_at = None;

        if self.attempts >= self.settings.max_reconnect_attempts {
            if !self.manual_selection_requested {
                warn!("Giving up after {} reconnect attempts; manual device selection required", self.attempts);
                self.manual_selection_requested = true;
                self.publish();
            }

            if !self.scanning && !self.in_background {
                self.start_scan().await;
            }
            return;
        }

        self.attempts += 1;
        info!(
            "Reconnect attempt {}/{} in {:?}",
            self.attempts,
            self.settings.max_reconnect_attempts,
            self.settings.reconnect_interval(),
        );
        self.retry_at = Some(Instant::now() + self.settings.reconnect_interval());
    }

    /// The reconnect timer fired.
    pub async fn on_retry_timer(&mut self) {
        self.retry_at = None;

        if !self.powered_on || self.is_bound() {
            return;
        }

        let bound = self.reconnect_by_identity().await;

        // a failed connect already scheduled the next attempt
        if !bound && self.retry_at.is_none() && !self.manual_selection_requested {
            self.schedule_reconnect().await;
        }
    }

    pub async fn on_discovered(&mut self, device: DiscoveredDevice) {
        match self.discovered.get_mut(&device.identity) {
            Some(existing) => {
                if existing.name.is_none() && device.name.is_some() {
                    existing.name = device.name.clone();
                    self.publish();
                }
                return;
            },
            None => {
                debug!("Discovered {} ({})", device.identity, device.display_name());
                self.discovered.insert(device.identity.clone(), device.clone());
                self.publish();
            },
        }

        // with nothing remembered the first coin box found is used
        let wanted = match (&self.remembered, &self.target) {
            (None, None) => true,
            (remembered, target) => {
                remembered.as_ref() == Some(&device.identity) || target.as_ref() == Some(&device.identity)
            },
        };

        if wanted && self.state == ConnectionState::Scanning && !self.manual_selection_requested {
            info!("Using discovered device {}", device.identity);
            self.connect_to(device.identity).await;
        }
    }

    pub async fn start_scan(&mut self) {
        if !self.powered_on {
            debug!("Not scanning, bluetooth is powered off");
            return;
        }

        self.discovered.clear();

        match self.transport.start_scan().await {
            Ok(()) => {
                info!("Scanning...");
                self.scanning = true;
                if !self.is_bound() && self.state != ConnectionState::Connecting {
                    self.set_state(ConnectionState::Scanning);
                }
            },
            Err(err) => {
                warn!("Scanning failed: {}", err);
                self.scanning = false;
            },
        }

        self.publish();
    }

    pub async fn stop_scan(&mut self) {
        if let Err(err) = self.transport.stop_scan().await {
            warn!("Failed to stop scanning: {}", err);
        }

        self.scanning = false;

        if self.state == ConnectionState::Scanning {
            let state = if self.attempts > 0 || self.manual_selection_requested {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Idle
            };
            self.set_state(state);
        }

        self.publish();
    }

    /// Manual pick from the device list. Restarts the connect path with a fresh attempt budget.
    pub async fn select_device(&mut self, identity: DeviceIdentity) -> bool {
        info!("Device {} selected manually", identity);

        if self.scanning {
            self.stop_scan().await;
        }

        self.attempts = 0;
        self.retry_at = None;
        self.manual_selection_requested = false;
        self.publish();

        if !self.powered_on {
            warn!("Can not connect to {}, bluetooth is powered off", identity);
            return false;
        }

        self.connect_to(identity).await
    }

    pub async fn forget_device(&mut self) {
        if let Err(err) = self.store.forget_device().await {
            warn!("Failed to forget remembered device: {}", err);
            return;
        }
        self.remembered = None;
    }

    /// Returning to the foreground re-arms the reconnect loop.
    pub async fn app_foreground(&mut self) {
        self.in_background = false;

        if self.powered_on && !self.is_bound() && self.state != ConnectionState::Connecting {
            self.schedule_reconnect().await;
        }
    }

    /// Backgrounding stops scanning but keeps an established binding.
    pub async fn app_background(&mut self) {
        self.in_background = true;

        if self.scanning {
            self.stop_scan().await;
        }
    }

    /// Stop scanning and tear down the link, used when the session shuts down.
    pub async fn shutdown(&mut self) {
        if self.scanning {
            self.stop_scan().await;
        }
        self.retry_at = None;
        self.drop_link().await;
    }
}

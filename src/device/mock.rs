//! In-process transport for tests and for running without a radio.
//!
//! [`MockTransport`] is handed to the session; the matching [`MockTransportHandle`] plays the
//! radio and the coin box firmware: power events, peripherals coming into range, link loss,
//! notifications. With firmware simulation on, commands are answered the way the coin box does:
//! starting a session resets and reports the coin counter, a payout reports completion.

use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use indexmap::IndexMap;
use log::debug;

use crate::device::constants::{EVENT_PAYOUT_COMPLETED, OPCODE_PAYOUT, OPCODE_START_COIN_SESSION};
use crate::device::transport::Transport;
use crate::device::types::{Channel, DeviceIdentity, DiscoveredDevice, TransportEvent};
use crate::error::DeviceError;

#[derive(Debug, Default)]
struct MockState {
    in_range: IndexMap<DeviceIdentity, DiscoveredDevice>,
    bound: Option<DeviceIdentity>,
    scanning: bool,
    scan_starts: usize,
    connect_attempts: Vec<DeviceIdentity>,
    failing_connects: u32,
    stalling_connects: u32,
    disconnects: usize,
    failing_writes: bool,
    writes: Vec<Vec<u8>>,
    simulate_firmware: bool,
    coin_total: u16,
}

pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events_tx: UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
}

#[derive(Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<MockState>>,
    events_tx: UnboundedSender<TransportEvent>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let (events_tx, events_rx) = unbounded();
        let state = Arc::new(Mutex::new(MockState::default()));

        let transport = MockTransport {
            state: state.clone(),
            events_tx: events_tx.clone(),
            events_rx: Mutex::new(Some(events_rx)),
        };

        (transport, MockTransportHandle { state, events_tx })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("Failed to lock MockTransport state")
    }

    fn emit(&self, event: TransportEvent) {
        if self.events_tx.unbounded_send(event).is_err() {
            debug!("Mock transport event dropped, nobody is listening");
        }
    }

    fn respond_as_firmware(&self, frame: &[u8]) {
        match frame {
            [OPCODE_START_COIN_SESSION, ..] => {
                self.lock().coin_total = 0;
                self.emit(TransportEvent::Notification { channel: Channel::CoinCount, value: vec![0, 0] });
            },
            [OPCODE_PAYOUT, lo, hi, ..] => {
                let mut value = vec![EVENT_PAYOUT_COMPLETED];
                value.extend_from_slice(&[*lo, *hi]);
                self.emit(TransportEvent::Notification { channel: Channel::Status, value });
            },
            _ => debug!("Mock firmware ignores command {:02x?}", frame),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, DeviceError> {
        let receiver = self.events_rx.lock().expect("Failed to lock MockTransport events").take();
        receiver.map(|receiver| receiver.boxed()).ok_or(DeviceError::EventStreamTaken)
    }

    async fn start_scan(&self) -> Result<(), DeviceError> {
        let advertising: Vec<DiscoveredDevice> = {
            let mut state = self.lock();
            state.scanning = true;
            state.scan_starts += 1;
            state.in_range.values().cloned().collect()
        };

        for device in advertising {
            self.emit(TransportEvent::Discovered(device));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.lock().scanning = false;
        Ok(())
    }

    async fn retrieve(&self, identity: &DeviceIdentity) -> Result<Option<DiscoveredDevice>, DeviceError> {
        Ok(self.lock().in_range.get(identity).cloned())
    }

    async fn connect(&self, identity: &DeviceIdentity) -> Result<DiscoveredDevice, DeviceError> {
        let stall = {
            let mut state = self.lock();
            state.connect_attempts.push(identity.clone());
            let stall = state.stalling_connects > 0;
            if stall {
                state.stalling_connects -= 1;
            }
            stall
        };

        // the peripheral never answers, only the caller's deadline ends this
        if stall {
            futures::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(DeviceError::DeadlineExceeded("connect"));
        }

        let device = state.in_range.get(identity).cloned()
            .ok_or_else(|| DeviceError::UnknownPeripheral(identity.to_string()))?;
        state.bound = Some(identity.clone());
        Ok(device)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.disconnects += 1;
        state.bound = None;
        Ok(())
    }

    async fn write_command(&self, frame: &[u8]) -> Result<(), DeviceError> {
        let simulate_firmware = {
            let mut state = self.lock();
            if state.bound.is_none() {
                return Err(DeviceError::NotConnected);
            }
            if state.failing_writes {
                return Err(DeviceError::DeadlineExceeded("write"));
            }
            state.writes.push(frame.to_vec());
            state.simulate_firmware
        };

        if simulate_firmware {
            self.respond_as_firmware(frame);
        }
        Ok(())
    }
}

impl MockTransportHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("Failed to lock MockTransport state")
    }

    pub fn emit(&self, event: TransportEvent) {
        if self.events_tx.unbounded_send(event).is_err() {
            debug!("Mock transport event dropped, nobody is listening");
        }
    }

    pub fn power(&self, powered_on: bool) {
        if !powered_on {
            self.lock().bound = None;
        }
        self.emit(TransportEvent::PowerChanged { powered_on });
    }

    /// Put a peripheral in range: retrievable, connectable and advertised to scans.
    pub fn add_peripheral(&self, identity: &str, name: Option<&str>) -> DiscoveredDevice {
        let device = DiscoveredDevice {
            identity: DeviceIdentity::new(identity),
            name: name.map(str::to_string),
        };

        let scanning = {
            let mut state = self.lock();
            state.in_range.insert(device.identity.clone(), device.clone());
            state.scanning
        };

        if scanning {
            self.emit(TransportEvent::Discovered(device.clone()));
        }
        device
    }

    pub fn remove_peripheral(&self, identity: &str) {
        self.lock().in_range.shift_remove(&DeviceIdentity::new(identity));
    }

    /// Drop the established link as if the peripheral went out of range.
    pub fn drop_link(&self) {
        let bound = self.lock().bound.take();
        if let Some(identity) = bound {
            self.emit(TransportEvent::Disconnected(identity));
        }
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// The next `count` connects hang until the caller gives up on them.
    pub fn stall_next_connects(&self, count: u32) {
        self.lock().stalling_connects = count;
    }

    pub fn fail_writes(&self, failing: bool) {
        self.lock().failing_writes = failing;
    }

    pub fn simulate_firmware(&self, enabled: bool) {
        self.lock().simulate_firmware = enabled;
    }

    pub fn notify(&self, channel: Channel, value: &[u8]) {
        self.emit(TransportEvent::Notification { channel, value: value.to_vec() });
    }

    pub fn notify_coin_total(&self, total: u16) {
        self.notify(Channel::CoinCount, &total.to_le_bytes());
    }

    pub fn notify_payout_completed(&self, dispensed: u16) {
        let [lo, hi] = dispensed.to_le_bytes();
        self.notify(Channel::Status, &[EVENT_PAYOUT_COMPLETED, lo, hi]);
    }

    /// The coin acceptor saw `count` more coins.
    pub fn insert_coins(&self, count: u16) {
        let total = {
            let mut state = self.lock();
            state.coin_total = state.coin_total.saturating_add(count);
            state.coin_total
        };
        self.notify_coin_total(total);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn connect_attempts(&self) -> Vec<DeviceIdentity> {
        self.lock().connect_attempts.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn scan_starts(&self) -> usize {
        self.lock().scan_starts
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn bound(&self) -> Option<DeviceIdentity> {
        self.lock().bound.clone()
    }
}

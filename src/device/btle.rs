use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::types::SessionSettings;
use crate::device::constants::{make_coin_box_service_uuid, make_coin_count_uuid, make_command_uuid, make_status_uuid, COIN_BOX_ADVERTISED_NAME};
use crate::device::transport::Transport;
use crate::device::types::{Channel, DeviceIdentity, DiscoveredDevice, TransportEvent};
use crate::error::{readable_thread_panic_error, DeviceError};

struct BoundPeripheral {
    identity: DeviceIdentity,
    peripheral: Peripheral,
    command_char: Characteristic,
    notifications_cancel: CancellationToken,
    notifications_handle: JoinHandle<Result<(), DeviceError>>,
}

struct Shared {
    bound: Option<BoundPeripheral>,
    // set while a connect is in flight so that an abandoned connect can be torn down
    connecting: Option<Peripheral>,
    events_rx: Option<Receiver<TransportEvent>>,
}

/// Transport backed by the platform bluetooth stack (btleplug).
pub struct BtleTransport {
    manager: Arc<Manager>,
    settings: SessionSettings,
    cancel: CancellationToken,
    events_tx: Sender<TransportEvent>,
    shared: Arc<Mutex<Shared>>,
}

// Some environments ignore the scan filter, so make sure to check the service uuid again
fn is_coin_box(properties: &PeripheralProperties) -> bool {
    properties.services.contains(&make_coin_box_service_uuid())
        || properties.local_name.as_deref() == Some(COIN_BOX_ADVERTISED_NAME)
}

fn describe(peripheral: &Peripheral, properties: &PeripheralProperties) -> DiscoveredDevice {
    DiscoveredDevice {
        identity: DeviceIdentity::new(peripheral.id().to_string()),
        name: properties.local_name.clone(),
    }
}

fn take_bound(shared: &Mutex<Shared>, identity: Option<&DeviceIdentity>) -> Option<BoundPeripheral> {
    let mut shared = shared.lock().expect("Failed to lock BtleTransport shared state");
    match (&shared.bound, identity) {
        (Some(bound), Some(identity)) if &bound.identity != identity => None,
        _ => shared.bound.take(),
    }
}

async fn release(bound: BoundPeripheral) {
    bound.notifications_cancel.cancel();

    info!("Waiting for read notifications task to stop");
    match bound.notifications_handle.await {
        Ok(Ok(())) => info!("Read notifications task stopped"),
        Ok(Err(err)) => warn!("Error during read notifications task: {}", err),
        Err(err) if err.is_panic() => warn!("{}", readable_thread_panic_error(&err.into_panic())),
        Err(err) => warn!("Failed to join read notifications task: {}", err),
    }
}

async fn connect_peripheral(peripheral: &Peripheral) -> Result<Characteristic, DeviceError> {
    let service_uuid = make_coin_box_service_uuid();
    let coin_count_uuid = make_coin_count_uuid();
    let command_uuid = make_command_uuid();
    let status_uuid = make_status_uuid();

    info!("Connecting to peripheral...");
    if !peripheral.is_connected().await? {
        peripheral.connect().await?;
    }

    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    let service = peripheral.services()
        .into_iter()
        .find(|service| service.uuid == service_uuid)
        .ok_or(DeviceError::MissingCharacteristic)?;

    let find = |uuid: Uuid| service.characteristics.iter().find(|characteristic| characteristic.uuid == uuid).cloned();
    let coin_char = find(coin_count_uuid).ok_or(DeviceError::MissingCharacteristic)?;
    let command_char = find(command_uuid).ok_or(DeviceError::MissingCharacteristic)?;
    let status_char = find(status_uuid).ok_or(DeviceError::MissingCharacteristic)?;

    for characteristic in [&coin_char, &status_char] {
        info!("Subscribing to characteristic {:?} {:?}", service.uuid, characteristic.uuid);
        peripheral.subscribe(characteristic).await?;
    }

    Ok(command_char)
}

fn read_notifications_task(cancel: CancellationToken, peripheral: &Peripheral, mut sender: Sender<TransportEvent>) -> JoinHandle<Result<(), DeviceError>> {
    let peripheral_clone = peripheral.clone();
    let coin_count_uuid = make_coin_count_uuid();
    let status_uuid = make_status_uuid();

    spawn(async move {
        let mut notification_stream = peripheral_clone.notifications().await?;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => {
                    let Some(data) = data else {
                        debug!("Notification stream ended");
                        break 'mainloop;
                    };

                    let channel = if data.uuid == coin_count_uuid {
                        Channel::CoinCount
                    }
                    else if data.uuid == status_uuid {
                        Channel::Status
                    }
                    else {
                        debug!("Ignoring notification from characteristic {:?}", data.uuid);
                        continue 'mainloop;
                    };

                    if sender.send(TransportEvent::Notification { channel, value: data.value }).await.is_err() {
                        break 'mainloop;
                    }
                }
            }
        }

        Ok(())
    })
}

async fn forward_central_events(cancel: CancellationToken, adapter: Adapter, shared: Arc<Mutex<Shared>>, mut sender: Sender<TransportEvent>) {
    let mut central_events = match adapter.events().await {
        Ok(events) => events,
        Err(err) => {
            warn!("Failed to listen for adapter events: {}", err);
            return;
        },
    };

    'mainloop: loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break 'mainloop,
            event = central_events.next() => match event {
                Some(event) => event,
                None => break 'mainloop,
            },
        };

        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = adapter.peripheral(&id).await else { continue };

                match peripheral.properties().await {
                    Ok(Some(properties)) if is_coin_box(&properties) => {
                        TransportEvent::Discovered(describe(&peripheral, &properties))
                    },
                    Ok(_) => continue,
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        continue;
                    },
                }
            },
            CentralEvent::DeviceDisconnected(id) => {
                let identity = DeviceIdentity::new(id.to_string());
                match take_bound(&shared, Some(&identity)) {
                    Some(bound) => {
                        release(bound).await;
                        TransportEvent::Disconnected(identity)
                    },
                    None => continue,
                }
            },
            _ => continue,
        };

        if sender.send(forwarded).await.is_err() {
            break 'mainloop;
        }
    }
}

// Adapter availability stands in for the radio power state. A bound peripheral is also polled,
// because not every platform reports disconnects reliably (macOS).
async fn poll_power_task(cancel: CancellationToken, manager: Arc<Manager>, shared: Arc<Mutex<Shared>>, mut sender: Sender<TransportEvent>, delay: Duration) {
    let mut previous_powered_on: Option<bool> = None;

    'mainloop: loop {
        let powered_on = match manager.adapters().await {
            Ok(adapters) => !adapters.is_empty(),
            Err(err) => {
                debug!("Failed to query adapters: {}", err);
                false
            },
        };

        if previous_powered_on != Some(powered_on) {
            previous_powered_on = Some(powered_on);
            if sender.send(TransportEvent::PowerChanged { powered_on }).await.is_err() {
                break 'mainloop;
            }
        }

        let bound_peripheral = {
            let shared = shared.lock().expect("Failed to lock BtleTransport shared state");
            shared.bound.as_ref().map(|bound| (bound.identity.clone(), bound.peripheral.clone()))
        };

        if let Some((identity, peripheral)) = bound_peripheral {
            let connected = tokio::select! {
                _ = sleep(delay * 2) => {
                    warn!("Checking for connection status took too long");
                    false
                }
                result = peripheral.is_connected() => match result {
                    Err(err) => {
                        warn!("Error checking for connection state: {:?}", err);
                        false
                    },
                    Ok(connected) => connected,
                }
            };

            if !connected {
                if let Some(bound) = take_bound(&shared, Some(&identity)) {
                    warn!("Connection lost");
                    release(bound).await;
                    if sender.send(TransportEvent::Disconnected(identity)).await.is_err() {
                        break 'mainloop;
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break 'mainloop,
            _ = sleep(delay) => {},
        }
    }
}

impl BtleTransport {
    pub async fn new(settings: SessionSettings) -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let (events_tx, events_rx) = channel::<TransportEvent>(64);

        Ok(BtleTransport {
            manager: Arc::new(manager),
            settings,
            cancel: CancellationToken::new(),
            events_tx,
            shared: Arc::new(Mutex::new(Shared { bound: None, connecting: None, events_rx: Some(events_rx) })),
        })
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("Failed to lock BtleTransport shared state")
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, DeviceError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(DeviceError::NoAdapter);
        }
        Ok(adapters)
    }

    async fn find_peripheral(&self, identity: &DeviceIdentity) -> Result<Option<(Peripheral, DiscoveredDevice)>, DeviceError> {
        for adapter in self.adapters().await? {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            for peripheral in peripherals {
                if peripheral.id().to_string() != identity.as_str() {
                    continue;
                }

                let name = match peripheral.properties().await {
                    Ok(Some(properties)) => properties.local_name,
                    Ok(None) => None,
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        None
                    },
                };

                let device = DiscoveredDevice { identity: identity.clone(), name };
                return Ok(Some((peripheral, device)));
            }
        }

        Ok(None)
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, DeviceError> {
        let events_rx = self.lock_shared().events_rx.take();
        let events_rx = events_rx.ok_or(DeviceError::EventStreamTaken)?;

        match self.manager.adapters().await {
            Ok(adapters) => {
                for adapter in adapters {
                    spawn(forward_central_events(self.cancel.child_token(), adapter, self.shared.clone(), self.events_tx.clone()));
                }
            },
            Err(err) => warn!("Failed to query adapters: {}", err),
        }

        spawn(poll_power_task(
            self.cancel.child_token(),
            self.manager.clone(),
            self.shared.clone(),
            self.events_tx.clone(),
            self.settings.power_poll(),
        ));

        Ok(events_rx.boxed())
    }

    async fn start_scan(&self) -> Result<(), DeviceError> {
        let filter = ScanFilter {
            services: vec![make_coin_box_service_uuid()],
        };

        for adapter in self.adapters().await? {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(filter.clone()).await?;
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        for adapter in self.adapters().await? {
            if let Err(err) = adapter.stop_scan().await {
                debug!("Failed to stop adapter scan cleanly: {}", err);
            }
        }
        Ok(())
    }

    async fn retrieve(&self, identity: &DeviceIdentity) -> Result<Option<DiscoveredDevice>, DeviceError> {
        Ok(self.find_peripheral(identity).await?.map(|(_, device)| device))
    }

    async fn connect(&self, identity: &DeviceIdentity) -> Result<DiscoveredDevice, DeviceError> {
        let (peripheral, device) = self.find_peripheral(identity).await?
            .ok_or_else(|| DeviceError::UnknownPeripheral(identity.to_string()))?;

        if let Some(previous) = take_bound(&self.shared, None) {
            release(previous).await;
        }

        self.lock_shared().connecting = Some(peripheral.clone());
        let connected = connect_peripheral(&peripheral).await;
        self.lock_shared().connecting = None;

        let command_char = match connected {
            Ok(v) => v,
            Err(err) => {
                // leave nothing half connected behind, the next attempt starts from scratch
                let _ = peripheral.disconnect().await;
                return Err(err);
            },
        };

        let notifications_cancel = self.cancel.child_token();
        let notifications_handle = read_notifications_task(notifications_cancel.clone(), &peripheral, self.events_tx.clone());

        self.lock_shared().bound = Some(BoundPeripheral {
            identity: identity.clone(),
            peripheral,
            command_char,
            notifications_cancel,
            notifications_handle,
        });

        Ok(device)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let peripheral = match take_bound(&self.shared, None) {
            Some(bound) => {
                let peripheral = bound.peripheral.clone();
                release(bound).await;
                peripheral
            },
            None => {
                let connecting = self.lock_shared().connecting.take();
                connecting.ok_or(DeviceError::NotConnected)?
            },
        };

        info!("Disconnecting from peripheral");
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn write_command(&self, frame: &[u8]) -> Result<(), DeviceError> {
        let (peripheral, command_char) = {
            let shared = self.lock_shared();
            let bound = shared.bound.as_ref().ok_or(DeviceError::NotConnected)?;
            (bound.peripheral.clone(), bound.command_char.clone())
        };

        peripheral.write(&command_char, frame, WriteType::WithResponse).await?;
        Ok(())
    }
}

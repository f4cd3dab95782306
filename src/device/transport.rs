//! The radio capability consumed by the session layer.
//!
//! Implementations do the actual scanning, connecting and characteristic I/O. Only the
//! connection supervisor calls `start_scan`, `stop_scan`, `connect` and `disconnect`; the coin
//! session and payout coordinator only ever reach `write_command`.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::{DeviceIdentity, DiscoveredDevice, TransportEvent};
use crate::error::DeviceError;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Stream of power, discovery, disconnect and notification events. Called once, before any
    /// other method. The stream should start with a `PowerChanged` event describing the
    /// current radio state.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, DeviceError>;

    async fn start_scan(&self) -> Result<(), DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;

    /// Look up a live peripheral by a previously remembered identity, without scanning.
    async fn retrieve(&self, identity: &DeviceIdentity) -> Result<Option<DiscoveredDevice>, DeviceError>;

    /// Connect, discover the coin box service with its three characteristics and subscribe to
    /// the coin-count and status channels.
    async fn connect(&self, identity: &DeviceIdentity) -> Result<DiscoveredDevice, DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Write a frame to the command characteristic (with response).
    async fn write_command(&self, frame: &[u8]) -> Result<(), DeviceError>;
}

//! The seam between the connection state machine and an actual radio

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::BleError;

/// Advertisements seen while scanning, in arrival order
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Result<Advertisement, BleError>> + Send>>;

/// Resolves once the peripheral drops the link
pub type DisconnectSignal = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Talks to a physical radio
    Real,
    /// Mock mode: every operation succeeds without hardware
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

/// One advertisement packet worth of identity
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn matches(&self, marker: &str) -> bool {
        pillnow_proto::ble::is_dispenser_name(self.name.as_deref(), self.local_name.as_deref(), marker)
    }

    pub fn into_handle(self) -> DeviceHandle {
        let name = self
            .name
            .or(self.local_name)
            .unwrap_or_else(|| "Unknown".to_string());
        DeviceHandle {
            id: self.id,
            name,
            rssi: self.rssi,
            state: DeviceState::Discovered,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

/// A discovered peripheral
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHandle {
    /// Opaque identifier, the BLE address on real radios
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub state: DeviceState,
}

impl DeviceHandle {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rssi: None,
            state: DeviceState::Discovered,
        }
    }
}

/// Radio operations. Implementations do not track connection state; that is
/// the job of [`crate::Transport`].
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Ask the platform for location + BLE scan/connect/advertise grants in
    /// one batch. Platforms without runtime grants return `Ok(true)`.
    async fn request_permissions(&self) -> Result<bool, BleError>;

    async fn adapter_state(&self) -> Result<AdapterState, BleError>;

    /// Start an unfiltered scan
    async fn start_scan(&self) -> Result<AdvertisementStream, BleError>;

    async fn stop_scan(&self) -> Result<(), BleError>;

    /// Connect and discover all services and characteristics
    async fn connect(&self, device: &DeviceHandle) -> Result<DisconnectSignal, BleError>;

    async fn write(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError>;

    async fn disconnect(&self, device: &DeviceHandle) -> Result<(), BleError>;
}

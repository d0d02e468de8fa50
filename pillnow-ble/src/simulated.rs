//! Mock mode radio: deterministic success, no hardware

use std::sync::Mutex;

use async_trait::async_trait;
use futures::{future, stream};
use log::info;
use uuid::Uuid;

use crate::{
    AdapterState, Advertisement, AdvertisementStream, BleError, DeviceHandle, DisconnectSignal,
    TransportKind, TransportStrategy, lock,
};

pub const SIMULATED_DEVICE_ID: &str = "00:00:00:00:00:00";

#[derive(Debug)]
pub struct SimulatedTransport {
    device_name: String,
    written: Mutex<Vec<String>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::named(pillnow_proto::ble::DEVICE_NAME_MARKER)
    }

    /// The simulated dispenser advertises under `marker`
    pub fn named(marker: &str) -> Self {
        Self {
            device_name: format!("{marker} (simulated)"),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn device(&self) -> DeviceHandle {
        DeviceHandle::new(SIMULATED_DEVICE_ID, &self.device_name)
    }

    /// Every command "sent" so far
    pub fn written(&self) -> Vec<String> {
        lock(&self.written).clone()
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportStrategy for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    async fn request_permissions(&self) -> Result<bool, BleError> {
        Ok(true)
    }

    async fn adapter_state(&self) -> Result<AdapterState, BleError> {
        Ok(AdapterState::PoweredOn)
    }

    async fn start_scan(&self) -> Result<AdvertisementStream, BleError> {
        info!("Mock mode: scanning for devices");
        let advert = Advertisement {
            id: SIMULATED_DEVICE_ID.to_string(),
            name: Some(self.device_name.clone()),
            local_name: None,
            rssi: None,
        };
        Ok(Box::pin(stream::iter([Ok(advert)])))
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<DisconnectSignal, BleError> {
        info!("Mock mode: connected to {}", device.name);
        Ok(Box::pin(future::pending()))
    }

    async fn write(
        &self,
        _device: &DeviceHandle,
        _service: Uuid,
        _characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let command = String::from_utf8_lossy(payload).into_owned();
        info!("Mock mode: sending command: {command}");
        lock(&self.written).push(command);
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<(), BleError> {
        info!("Mock mode: disconnected from {}", device.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn advertises_a_matching_dispenser() {
        let sim = SimulatedTransport::named("PillNow");
        let mut adverts = sim.start_scan().await.unwrap();
        let advert = adverts.next().await.unwrap().unwrap();
        assert!(advert.matches("PillNow"));
        assert_eq!(advert.id, SIMULATED_DEVICE_ID);
        assert!(adverts.next().await.is_none());
    }

    #[tokio::test]
    async fn records_writes() {
        let sim = SimulatedTransport::new();
        let device = sim.device();
        let service = pillnow_proto::ble::SERVICE_UUID;
        let command = pillnow_proto::ble::COMMAND_UUID;
        sim.write(&device, service, command, b"ALARM_ON").await.unwrap();
        sim.write(&device, service, command, b"ALARM_OFF").await.unwrap();
        assert_eq!(sim.written(), vec!["ALARM_ON", "ALARM_OFF"]);
    }
}

//! btleplug-backed radio

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info};
use uuid::Uuid;

use crate::{
    AdapterState, Advertisement, AdvertisementStream, BleError, DeviceHandle, DisconnectSignal,
    TransportKind, TransportStrategy, lock,
};

/// Peripherals seen while scanning, keyed by address
type PeripheralCache = Arc<Mutex<HashMap<String, Peripheral>>>;

pub struct RealTransport {
    adapter: Adapter,
    peripherals: PeripheralCache,
    /// Address of the peripheral we are linked to, kept across scans
    connected: Mutex<Option<String>>,
}

impl RealTransport {
    /// Open the first Bluetooth adapter. Failing here means the radio
    /// stack itself is unavailable; callers should fall back to mock mode.
    pub async fn new() -> Result<Self, BleError> {
        let manager = Manager::new()
            .await
            .map_err(|e| BleError::AdapterUnavailable(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BleError::AdapterUnavailable(e.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| BleError::AdapterUnavailable("no Bluetooth adapter found".into()))?;

        info!("Bluetooth adapter ready");
        Ok(Self {
            adapter,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            connected: Mutex::new(None),
        })
    }

    fn peripheral(&self, device: &DeviceHandle) -> Result<Peripheral, BleError> {
        lock(&self.peripherals)
            .get(&device.id)
            .cloned()
            .ok_or_else(|| BleError::UnknownDevice(device.id.clone()))
    }
}

/// Forget everything seen by earlier scans except the linked peripheral
fn prune<P>(cache: &mut HashMap<String, P>, keep: Option<&str>) {
    cache.retain(|address, _| Some(address.as_str()) == keep);
}

async fn advertisement(
    adapter: &Adapter,
    cache: &PeripheralCache,
    id: &PeripheralId,
) -> Result<Option<Advertisement>, BleError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };

    let address = peripheral.address().to_string();
    lock(cache).insert(address.clone(), peripheral);

    Ok(Some(Advertisement {
        id: address,
        name: None,
        local_name: props.local_name,
        rssi: props.rssi,
    }))
}

#[async_trait]
impl TransportStrategy for RealTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Real
    }

    async fn request_permissions(&self) -> Result<bool, BleError> {
        // Desktop Bluetooth stacks have no runtime grants
        debug!("No runtime permissions needed on this platform");
        Ok(true)
    }

    async fn adapter_state(&self) -> Result<AdapterState, BleError> {
        let state = match self.adapter.adapter_state().await? {
            CentralState::PoweredOn => AdapterState::PoweredOn,
            CentralState::PoweredOff => AdapterState::PoweredOff,
            _ => AdapterState::Unknown,
        };
        Ok(state)
    }

    async fn start_scan(&self) -> Result<AdvertisementStream, BleError> {
        {
            let connected = lock(&self.connected);
            prune(&mut lock(&self.peripherals), connected.as_deref());
        }

        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleError::ScanFailed(e.to_string()))?;

        let adapter = self.adapter.clone();
        let cache = Arc::clone(&self.peripherals);
        let adverts = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let cache = Arc::clone(&cache);
            async move {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => return None,
                };
                match advertisement(&adapter, &cache, &id).await {
                    Ok(Some(advert)) => Some(Ok(advert)),
                    Ok(None) => None,
                    Err(e) => {
                        // one misbehaving peripheral should not end the scan
                        debug!("Skipping peripheral {id:?}: {e}");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(adverts))
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<DisconnectSignal, BleError> {
        let peripheral = self.peripheral(device)?;

        // Subscribe before connecting so an immediate drop is not missed
        let mut events = self.adapter.events().await?;

        peripheral
            .connect()
            .await
            .map_err(|e| BleError::ConnectionFailed(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| BleError::ConnectionFailed(e.to_string()))?;
        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            device.id
        );

        *lock(&self.connected) = Some(device.id.clone());

        let id = peripheral.id();
        Ok(Box::pin(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        break;
                    }
                }
            }
        }))
    }

    async fn write(
        &self,
        device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let peripheral = self.peripheral(device)?;

        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or(BleError::CharacteristicNotFound(characteristic))?;

        peripheral
            .write(&target, payload, WriteType::WithResponse)
            .await
            .map_err(|e| BleError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<(), BleError> {
        {
            let mut connected = lock(&self.connected);
            if connected.as_deref() == Some(device.id.as_str()) {
                connected.take();
            }
        }
        let peripheral = self.peripheral(device)?;
        peripheral.disconnect().await?;
        Ok(())
    }
}

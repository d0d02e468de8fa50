//! Scriptable radio for exercising the transport without hardware

use std::sync::Mutex;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    AdapterState, Advertisement, AdvertisementStream, BleError, DeviceHandle, DisconnectSignal,
    TransportKind, TransportStrategy, lock,
};

pub(crate) struct FakeRadio {
    pub permissions: bool,
    pub adapter: AdapterState,
    /// Delivered in order, then the scan stays open until it times out
    pub adverts: Vec<Advertisement>,
    pub fail_scan: bool,
    pub fail_connect: bool,
    pub fail_write: bool,
    pub events: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<(Uuid, Uuid, String)>>,
    pub link: Mutex<Option<oneshot::Sender<()>>>,
}

impl FakeRadio {
    pub fn empty() -> Self {
        Self {
            permissions: true,
            adapter: AdapterState::PoweredOn,
            adverts: Vec::new(),
            fail_scan: false,
            fail_connect: false,
            fail_write: false,
            events: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            link: Mutex::new(None),
        }
    }

    /// A pair of headphones, then a dispenser
    pub fn with_dispenser() -> Self {
        Self {
            adverts: vec![
                Advertisement {
                    id: "11:22:33:44:55:66".into(),
                    name: None,
                    local_name: Some("Headphones".into()),
                    rssi: Some(-70),
                },
                Advertisement {
                    id: "AA:BB:CC:DD:EE:01".into(),
                    name: None,
                    local_name: Some("PillNow-01".into()),
                    rssi: Some(-55),
                },
            ],
            ..Self::empty()
        }
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn writes(&self) -> Vec<(Uuid, Uuid, String)> {
        lock(&self.writes).clone()
    }

    /// The peripheral drops the link on its own
    pub fn drop_link(&self) {
        if let Some(tx) = lock(&self.link).take() {
            let _ = tx.send(());
        }
    }

    fn log(&self, event: String) {
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl TransportStrategy for FakeRadio {
    fn kind(&self) -> TransportKind {
        TransportKind::Real
    }

    async fn request_permissions(&self) -> Result<bool, BleError> {
        Ok(self.permissions)
    }

    async fn adapter_state(&self) -> Result<AdapterState, BleError> {
        Ok(self.adapter)
    }

    async fn start_scan(&self) -> Result<AdvertisementStream, BleError> {
        self.log("scan".into());
        if self.fail_scan {
            return Err(BleError::ScanFailed("radio busy".into()));
        }
        let adverts = stream::iter(self.adverts.clone().into_iter().map(Ok)).chain(stream::pending());
        Ok(Box::pin(adverts))
    }

    async fn stop_scan(&self) -> Result<(), BleError> {
        self.log("stop_scan".into());
        Ok(())
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<DisconnectSignal, BleError> {
        self.log(format!("connect:{}", device.id));
        if self.fail_connect {
            return Err(BleError::ConnectionFailed("peripheral refused".into()));
        }
        let (tx, rx) = oneshot::channel();
        *lock(&self.link) = Some(tx);
        Ok(Box::pin(async move {
            let _ = rx.await;
        }))
    }

    async fn write(
        &self,
        _device: &DeviceHandle,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let command = String::from_utf8_lossy(payload).into_owned();
        self.log(format!("write:{command}"));
        if self.fail_write {
            return Err(BleError::WriteFailed("GATT error".into()));
        }
        lock(&self.writes).push((service, characteristic, command));
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> Result<(), BleError> {
        self.log(format!("disconnect:{}", device.id));
        lock(&self.link).take();
        Ok(())
    }
}

//! Connection state machine over a swappable [`TransportStrategy`]
//!
//! Owns at most one physical link. The first unexpected radio failure swaps
//! the strategy for a [`SimulatedTransport`] for the rest of the process
//! lifetime (mock mode); callers keep working, only the logs differ.

use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};
use pillnow_proto::Command;
use pillnow_proto::ble::{COMMAND_UUID, DEVICE_NAME_MARKER, SCAN_TIMEOUT_SECS, SERVICE_UUID};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::simulated::SIMULATED_DEVICE_ID;
use crate::{
    AdapterState, BleError, DeviceHandle, DeviceState, DisconnectSignal, Notifier,
    SimulatedTransport, TransportKind, TransportStrategy, lock,
};

/// Receives `true` on connect and `false` on every disconnect
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Substring a dispenser's advertised name must contain
    pub device_marker: String,
    pub scan_timeout: Duration,
    pub service_uuid: Uuid,
    pub command_uuid: Uuid,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device_marker: DEVICE_NAME_MARKER.to_string(),
            scan_timeout: Duration::from_secs(SCAN_TIMEOUT_SECS),
            service_uuid: SERVICE_UUID,
            command_uuid: COMMAND_UUID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    MockMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Found(DeviceHandle),
    /// Another scan owns the radio; nothing was done
    AlreadyScanning,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Default)]
struct Link {
    phase: Phase,
    device: Option<DeviceHandle>,
    scanning: bool,
    /// Bumped on every connect/disconnect so stale observers stay quiet
    generation: u64,
    watcher: Option<AbortHandle>,
}

impl Link {
    fn reset(&mut self) -> Option<DeviceHandle> {
        self.generation += 1;
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.phase = Phase::Disconnected;
        self.device.take()
    }

    fn reset_for_connect(&mut self, device: &mut DeviceHandle) -> u64 {
        self.reset();
        self.phase = Phase::Connecting;
        device.state = DeviceState::Connecting;
        self.generation
    }
}

struct Inner {
    strategy: RwLock<Arc<dyn TransportStrategy>>,
    link: Mutex<Link>,
    callback: Mutex<Option<ConnectionCallback>>,
    notifier: Arc<dyn Notifier>,
    config: TransportConfig,
}

/// Cheap to clone; all clones share one link
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Clears the scanning flag however the scan ends
struct ScanGuard<'a>(&'a Mutex<Link>);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).scanning = false;
    }
}

impl Transport {
    pub fn new(
        strategy: Arc<dyn TransportStrategy>,
        notifier: Arc<dyn Notifier>,
        config: TransportConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                strategy: RwLock::new(strategy),
                link: Mutex::new(Link::default()),
                callback: Mutex::new(None),
                notifier,
                config,
            }),
        }
    }

    /// A transport that starts out in mock mode
    pub fn simulated(notifier: Arc<dyn Notifier>, config: TransportConfig) -> Self {
        let strategy = Arc::new(SimulatedTransport::named(&config.device_marker));
        Self::new(strategy, notifier, config)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn strategy(&self) -> Arc<dyn TransportStrategy> {
        self.inner
            .strategy
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the radio explicitly. The current link is forgotten.
    pub fn use_strategy(&self, strategy: Arc<dyn TransportStrategy>) {
        lock(&self.inner.link).reset();
        *self
            .inner
            .strategy
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = strategy;
    }

    pub fn is_mock(&self) -> bool {
        self.strategy().kind() == TransportKind::Simulated
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.link).phase == Phase::Connected
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.inner.link).scanning
    }

    pub fn connected_device(&self) -> Option<DeviceHandle> {
        let link = lock(&self.inner.link);
        match link.phase {
            Phase::Connected => link.device.clone(),
            _ => None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.is_mock() {
            return ConnectionState::MockMode;
        }
        let link = lock(&self.inner.link);
        match link.phase {
            Phase::Connected => ConnectionState::Connected,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Disconnected if link.scanning => ConnectionState::Scanning,
            Phase::Disconnected => ConnectionState::Disconnected,
        }
    }

    /// Exactly one subscriber is kept; registering replaces the previous one
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *lock(&self.inner.callback) = Some(Arc::new(callback));
    }

    pub async fn request_permissions(&self) -> bool {
        match ensure_permissions(self.strategy().as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                self.alert_for(&e);
                false
            }
        }
    }

    pub async fn check_adapter_state(&self) -> bool {
        match ensure_adapter(self.strategy().as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                self.alert_for(&e);
                false
            }
        }
    }

    /// Scan until an advertisement carries the dispenser marker, or until the
    /// scan timeout. A scan already in progress makes this a no-op.
    pub async fn scan_for_device(&self) -> Result<ScanOutcome, BleError> {
        let strategy = self.strategy();

        {
            let mut link = lock(&self.inner.link);
            if link.scanning {
                debug!("Already scanning for devices");
                return Ok(ScanOutcome::AlreadyScanning);
            }
            link.scanning = true;
        }
        let _guard = ScanGuard(&self.inner.link);

        match self.run_scan(strategy.as_ref()).await {
            Ok(Some(device)) => {
                info!("Found {} device: {} ({})", self.inner.config.device_marker, device.name, device.id);
                Ok(ScanOutcome::Found(device))
            }
            Ok(None) => {
                info!("Scan timeout reached");
                self.alert(
                    "Scan Timeout",
                    &format!("No {} device found", self.inner.config.device_marker),
                );
                Ok(ScanOutcome::TimedOut)
            }
            Err(e) => {
                error!("Scan error: {e}");
                if !e.needs_user_action() {
                    self.fall_back(&e);
                }
                self.alert_for(&e);
                Err(e)
            }
        }
    }

    /// Scan, then connect straight to whatever was found
    pub async fn scan_and_connect(&self) -> Result<ScanOutcome, BleError> {
        let outcome = self.scan_for_device().await?;
        if let ScanOutcome::Found(device) = &outcome {
            self.connect_to_device(device.clone()).await?;
        }
        Ok(outcome)
    }

    async fn run_scan(
        &self,
        strategy: &dyn TransportStrategy,
    ) -> Result<Option<DeviceHandle>, BleError> {
        ensure_permissions(strategy).await?;
        ensure_adapter(strategy).await?;

        let marker = self.inner.config.device_marker.as_str();
        let mut adverts = strategy.start_scan().await?;
        info!("Starting device scan...");

        let found = tokio::time::timeout(self.inner.config.scan_timeout, async {
            while let Some(advert) = adverts.next().await {
                let advert = advert?;
                debug!("Device found: {:?} / {:?}", advert.name, advert.local_name);
                if advert.matches(marker) {
                    return Ok(Some(advert.into_handle()));
                }
            }
            Ok(None)
        })
        .await
        .unwrap_or(Ok(None));

        if let Err(e) = strategy.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }
        found
    }

    /// Connecting is only allowed from Disconnected (or in mock mode).
    /// Asking for the device that is already connected is a no-op.
    pub async fn connect_to_device(&self, mut device: DeviceHandle) -> Result<(), BleError> {
        let strategy = self.strategy();
        let kind = strategy.kind();

        let generation = {
            let mut link = lock(&self.inner.link);
            let current = link.device.as_ref().map(|d| d.id.clone());
            match link.phase {
                Phase::Connected if current.as_deref() == Some(device.id.as_str()) => {
                    debug!("Already connected to {}", device.id);
                    return Ok(());
                }
                Phase::Connected | Phase::Connecting if kind == TransportKind::Real => {
                    return Err(BleError::ConnectionBusy(current.unwrap_or_default()));
                }
                _ => {}
            }
            let generation = link.reset_for_connect(&mut device);
            link.device = Some(device.clone());
            generation
        };

        info!("Connecting to device: {}", device.name);
        match strategy.connect(&device).await {
            Ok(disconnected) => {
                {
                    let mut link = lock(&self.inner.link);
                    if link.generation != generation {
                        // disconnected or swapped while we were connecting
                        return Err(BleError::ConnectionFailed("connection attempt superseded".into()));
                    }
                    link.phase = Phase::Connected;
                    if let Some(d) = link.device.as_mut() {
                        d.state = DeviceState::Connected;
                    }
                }
                self.watch_disconnect(generation, disconnected);
                info!("Connected to device: {}", device.name);
                self.notify(true);
                if kind == TransportKind::Real {
                    self.alert("Connected", "Successfully connected to device");
                }
                Ok(())
            }
            Err(e) => {
                error!("Connection error: {e}");
                {
                    let mut link = lock(&self.inner.link);
                    if link.generation == generation {
                        link.reset();
                    }
                }
                self.fall_back(&e);
                self.notify(false);
                self.alert_for(&e);
                Err(match e {
                    BleError::ConnectionFailed(_) => e,
                    other => BleError::ConnectionFailed(other.to_string()),
                })
            }
        }
    }

    fn watch_disconnect(&self, generation: u64, disconnected: DisconnectSignal) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            disconnected.await;
            if let Some(inner) = weak.upgrade() {
                Transport { inner }.link_lost(generation);
            }
        });

        let mut link = lock(&self.inner.link);
        if link.generation == generation {
            link.watcher = Some(task.abort_handle());
        } else {
            task.abort();
        }
    }

    fn link_lost(&self, generation: u64) {
        let device = {
            let mut link = lock(&self.inner.link);
            if link.generation != generation || link.phase != Phase::Connected {
                return;
            }
            link.watcher = None;
            link.reset()
        };
        info!(
            "Device disconnected: {}",
            device.map(|d| d.name).unwrap_or_default()
        );
        self.notify(false);
        self.alert("Disconnected", "Device disconnected");
    }

    /// Write a command to the dispenser. Never fails loudly: a missing link
    /// or failed write returns `false` and switches to mock mode.
    pub async fn send_command(&self, command: &Command) -> bool {
        let strategy = self.strategy();
        let payload = command.to_bytes();
        let device = self.connected_device();

        let result = match (strategy.kind(), device) {
            (_, Some(device)) => {
                strategy
                    .write(&device, self.inner.config.service_uuid, self.inner.config.command_uuid, &payload)
                    .await
            }
            (TransportKind::Simulated, None) => {
                let device = DeviceHandle::new(SIMULATED_DEVICE_ID, &self.inner.config.device_marker);
                strategy
                    .write(&device, self.inner.config.service_uuid, self.inner.config.command_uuid, &payload)
                    .await
            }
            (TransportKind::Real, None) => Err(BleError::NotConnected),
        };

        match result {
            Ok(()) => {
                debug!("Sent command: {command}");
                true
            }
            Err(e) => {
                error!("Command sending error: {e}");
                self.fall_back(&e);
                false
            }
        }
    }

    /// Safe to call with nothing connected
    pub async fn disconnect(&self) {
        let strategy = self.strategy();
        let device = lock(&self.inner.link).reset();

        match (strategy.kind(), device) {
            (TransportKind::Simulated, device) => {
                let device = device.unwrap_or_else(|| {
                    DeviceHandle::new(SIMULATED_DEVICE_ID, &self.inner.config.device_marker)
                });
                let _ = strategy.disconnect(&device).await;
                self.notify(false);
            }
            (TransportKind::Real, Some(device)) => {
                if let Err(e) = strategy.disconnect(&device).await {
                    error!("Disconnection error: {e}");
                }
                info!("Disconnected from {}", device.name);
                self.notify(false);
            }
            (TransportKind::Real, None) => debug!("Nothing to disconnect"),
        }
    }

    fn fall_back(&self, reason: &BleError) {
        let mut strategy = self
            .inner
            .strategy
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if strategy.kind() == TransportKind::Simulated {
            return;
        }
        warn!("Bluetooth failure ({reason}), switching to mock mode");
        *strategy = Arc::new(SimulatedTransport::named(&self.inner.config.device_marker));
    }

    fn notify(&self, connected: bool) {
        let callback = lock(&self.inner.callback).clone();
        if let Some(callback) = callback {
            callback(connected);
        }
    }

    fn alert(&self, title: &str, message: &str) {
        self.inner.notifier.alert(title, message);
    }

    fn alert_for(&self, err: &BleError) {
        match err {
            BleError::PermissionDenied => self.alert(
                "Permissions Required",
                "Please grant all required permissions to use Bluetooth features",
            ),
            BleError::AdapterOff(_) => {
                self.alert("Bluetooth Required", "Please enable Bluetooth to scan for devices")
            }
            BleError::ConnectionFailed(_) => self.alert("Connection Error", &err.to_string()),
            other => self.alert("Error", &other.to_string()),
        }
    }
}

async fn ensure_permissions(strategy: &dyn TransportStrategy) -> Result<(), BleError> {
    if strategy.request_permissions().await? {
        Ok(())
    } else {
        Err(BleError::PermissionDenied)
    }
}

async fn ensure_adapter(strategy: &dyn TransportStrategy) -> Result<(), BleError> {
    match strategy.adapter_state().await? {
        AdapterState::PoweredOn => Ok(()),
        other => Err(BleError::AdapterOff(other)),
    }
}

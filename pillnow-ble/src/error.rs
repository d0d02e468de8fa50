use pillnow_proto::CommandError;
use uuid::Uuid;

use crate::AdapterState;

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),
    #[error("Bluetooth is not enabled (adapter state: {0:?})")]
    AdapterOff(AdapterState),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("a connection to {0} is already active or in progress")]
    ConnectionBusy(String),
    #[error("no device connected")]
    NotConnected,
    #[error("device {0} was not seen during the last scan")]
    UnknownDevice(String),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}

impl BleError {
    /// Failures the user has to fix themselves; these never switch to mock mode
    pub fn needs_user_action(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::AdapterOff(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no PillNow device found")]
    DeviceNotFound,
    #[error("a device scan is already in progress")]
    ScanInProgress,
    #[error(transparent)]
    Ble(#[from] BleError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

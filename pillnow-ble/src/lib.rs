//! PillNow BLE transport
//!
//! Talks to the dispenser over BLE: scanning, a guarded connection state
//! machine, and command writes. When the radio misbehaves the transport
//! switches to a simulated radio (mock mode) and keeps going.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pillnow_ble::{DeviceSession, LogNotifier, RealTransport, Transport, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = Arc::new(RealTransport::new().await?);
//!     let transport = Transport::new(radio, Arc::new(LogNotifier), TransportConfig::default());
//!     let session = DeviceSession::new(transport);
//!
//!     session.trigger_alarm().await?;
//!     session.stop_alarm().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod error;
mod feedback;
mod real;
mod session;
mod simulated;
mod strategy;
mod transport;

#[cfg(test)]
mod testing;

pub use error::{BleError, SessionError};
pub use feedback::{LogNotifier, MemoryNotifier, Notification, Notifier, NotifyError, Sound};
pub use real::RealTransport;
pub use session::DeviceSession;
pub use simulated::{SIMULATED_DEVICE_ID, SimulatedTransport};
pub use strategy::{
    AdapterState, Advertisement, AdvertisementStream, DeviceHandle, DeviceState, DisconnectSignal,
    TransportKind, TransportStrategy,
};
pub use transport::{ConnectionCallback, ConnectionState, ScanOutcome, Transport, TransportConfig};

/// A poisoned lock only means another thread panicked mid-update; the data
/// is still the best we have.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

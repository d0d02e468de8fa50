//! Dispenser operations on top of raw command writes

use log::{debug, error, info, warn};
use pillnow_proto::Command;

use crate::{BleError, DeviceHandle, ScanOutcome, SessionError, Transport};

/// Each operation brings up its own link and, except for
/// [`DeviceSession::trigger_alarm`], tears it down again.
#[derive(Clone)]
pub struct DeviceSession {
    transport: Transport,
}

impl DeviceSession {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Scan for the dispenser and connect to it. The dispenser sleeps
    /// between events, so an existing link is dropped and found again.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        if let Some(device) = self.transport.connected_device() {
            debug!("Dropping link to {} before rescanning", device.name);
            self.transport.disconnect().await;
        }

        let device = self.find_device().await?;
        match self.transport.connect_to_device(device).await {
            Ok(()) => Ok(()),
            Err(e) if self.transport.is_mock() && !matches!(e, BleError::ConnectionBusy(_)) => {
                warn!("Connection failed ({e}), continuing in mock mode");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_device(&self) -> Result<DeviceHandle, SessionError> {
        let outcome = match self.transport.scan_for_device().await {
            Err(e) if self.transport.is_mock() => {
                warn!("Scan failed ({e}), continuing in mock mode");
                self.transport.scan_for_device().await?
            }
            other => other?,
        };

        match outcome {
            ScanOutcome::Found(device) => Ok(device),
            ScanOutcome::AlreadyScanning => Err(SessionError::ScanInProgress),
            ScanOutcome::TimedOut => Err(SessionError::DeviceNotFound),
        }
    }

    /// Write a raw command over whatever link exists
    pub async fn send(&self, command: &Command) -> bool {
        self.transport.send_command(command).await
    }

    /// Start the dispenser's buzzer. The link stays up so the alarm can be
    /// stopped without another scan.
    pub async fn trigger_alarm(&self) -> Result<bool, SessionError> {
        self.initialize().await?;
        let sent = self.send(&Command::AlarmOn).await;
        if sent {
            info!("Alarm triggered successfully");
        } else {
            error!("Failed to trigger alarm");
        }
        Ok(sent)
    }

    pub async fn stop_alarm(&self) -> bool {
        let sent = self.send(&Command::AlarmOff).await;
        if sent {
            info!("Alarm stopped successfully");
        } else {
            error!("Failed to stop alarm");
        }
        self.transport.disconnect().await;
        sent
    }

    /// Ask the dispenser to text `phone`. The phone number is checked before
    /// any radio work.
    pub async fn send_sms(&self, phone: &str, message: &str) -> Result<bool, SessionError> {
        let command = Command::sms(phone, message)?;
        self.one_shot(&command).await
    }

    pub async fn get_status(&self) -> Result<bool, SessionError> {
        self.one_shot(&Command::Status).await
    }

    pub async fn test_connection(&self) -> Result<bool, SessionError> {
        self.one_shot(&Command::Test).await
    }

    async fn one_shot(&self, command: &Command) -> Result<bool, SessionError> {
        self.initialize().await?;
        let sent = self.send(command).await;
        if sent {
            info!("{command} sent successfully");
        } else {
            error!("Failed to send {command}");
        }
        self.transport.disconnect().await;
        Ok(sent)
    }
}

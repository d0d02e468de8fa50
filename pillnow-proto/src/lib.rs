//! PillNow protocol - dispenser commands, GATT constants and container documents

pub mod ble;
mod container;

pub use container::{
    AlarmEntry, ContainerDocument, ContainerId, ContainerSchedule, DocumentError, document_key,
    parse_document_key,
};

use std::fmt;
use std::str::FromStr;

// Command keywords understood by the dispenser firmware
pub const CMD_ALARM_ON: &str = "ALARM_ON";
pub const CMD_ALARM_OFF: &str = "ALARM_OFF";
pub const CMD_STATUS: &str = "STATUS";
pub const CMD_TEST: &str = "TEST";
pub const CMD_SMS_PREFIX: &str = "SMS";

/// A command written to the dispenser's command characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the buzzer and LED
    AlarmOn,
    /// Silence the buzzer and LED
    AlarmOff,
    /// Ask the dispenser to report its status
    Status,
    /// Connectivity check
    Test,
    /// Relay a text message through the dispenser's GSM module
    Sms { phone: String, message: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid phone number: {0:?}")]
    InvalidPhone(String),
    #[error("SMS message is empty")]
    EmptyMessage,
    #[error("unknown command: {0:?}")]
    Unknown(String),
}

impl Command {
    /// Build an SMS command, rejecting phone numbers that would corrupt the framing
    pub fn sms(phone: &str, message: &str) -> Result<Self, CommandError> {
        let phone = phone.trim();
        if !is_valid_phone(phone) {
            return Err(CommandError::InvalidPhone(phone.to_string()));
        }
        if message.trim().is_empty() {
            return Err(CommandError::EmptyMessage);
        }
        Ok(Self::Sms {
            phone: phone.to_string(),
            message: message.to_string(),
        })
    }

    /// ASCII payload as written to the characteristic
    pub fn encode(&self) -> String {
        match self {
            Self::AlarmOn => CMD_ALARM_ON.to_string(),
            Self::AlarmOff => CMD_ALARM_OFF.to_string(),
            Self::Status => CMD_STATUS.to_string(),
            Self::Test => CMD_TEST.to_string(),
            Self::Sms { phone, message } => format!("{CMD_SMS_PREFIX}:{phone}:{message}"),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CMD_ALARM_ON => Ok(Self::AlarmOn),
            CMD_ALARM_OFF => Ok(Self::AlarmOff),
            CMD_STATUS => Ok(Self::Status),
            CMD_TEST => Ok(Self::Test),
            _ => {
                // SMS:<phone>:<message>, message may itself contain ':'
                let mut parts = s.splitn(3, ':');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(CMD_SMS_PREFIX), Some(phone), Some(message)) => {
                        Self::sms(phone, message)
                    }
                    _ => Err(CommandError::Unknown(s.to_string())),
                }
            }
        }
    }
}

fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
        && digits.chars().any(|c| c.is_ascii_digit())
}

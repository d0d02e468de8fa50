//! User-facing feedback: alert dialogs and local push notifications
//!
//! The core never renders anything itself. Whatever hosts it (the CLI, a
//! mobile shell) provides a [`Notifier`].

use std::sync::Mutex;

use log::{info, warn};

use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sound {
    #[default]
    Default,
    Silent,
}

/// A local push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub sound: Sound,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            sound: Sound::Default,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification setup failed: {0}")]
    SetupFailed(String),
    #[error("failed to deliver notification: {0}")]
    DeliveryFailed(String),
}

pub trait Notifier: Send + Sync {
    /// Show an alert with a remediation hint
    fn alert(&self, title: &str, message: &str);

    /// Post a local notification
    fn push(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes alerts and notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, title: &str, message: &str) {
        warn!("[{title}] {message}");
    }

    fn push(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            "notification: {} - {} (sound: {:?})",
            notification.title, notification.message, notification.sound
        );
        Ok(())
    }
}

/// Keeps everything in memory, for hosts that render feedback later
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    alerts: Mutex<Vec<(String, String)>>,
    pushed: Mutex<Vec<Notification>>,
    unavailable: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose notification channel could not be set up
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn alerts(&self) -> Vec<(String, String)> {
        lock(&self.alerts).clone()
    }

    pub fn alert_titles(&self) -> Vec<String> {
        lock(&self.alerts).iter().map(|(title, _)| title.clone()).collect()
    }

    pub fn pushed(&self) -> Vec<Notification> {
        lock(&self.pushed).clone()
    }
}

impl Notifier for MemoryNotifier {
    fn alert(&self, title: &str, message: &str) {
        lock(&self.alerts).push((title.to_string(), message.to_string()));
    }

    fn push(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.unavailable {
            return Err(NotifyError::SetupFailed("push notifications are not configured".into()));
        }
        lock(&self.pushed).push(notification.clone());
        Ok(())
    }
}

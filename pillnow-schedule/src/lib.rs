//! PillNow scheduling
//!
//! Container schedules on disk, the daily alarm loop that drives the
//! dispenser, and the dose history it leaves behind.

mod adherence;
mod clock;
mod config;
mod scheduler;
mod store;

pub use adherence::{ADHERENCE_FILE, AdherenceLog, AdherenceSummary, DoseRecord, DoseStatus};
pub use clock::{Clock, SystemClock, add_days_in, days_between_in};
pub use config::{AppConfig, ConfigError, HOME_ENV, pillnow_home};
pub use scheduler::{
    AlarmScheduler, ArmedAlarm, REMINDER_TITLE, TimerKey, next_fire_time, reminder_message,
};
pub use store::{CONTAINERS_FILE, JsonStore, ScheduleStore, StoreError};

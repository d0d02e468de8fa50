//! Wall clock seam for the scheduler
//!
//! Alarms are stored as instants but recur at the same wall-clock time, so
//! whole-day steps happen on the user's local calendar.

use chrono::{DateTime, Days, Local, Offset, TimeDelta, TimeZone, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// `at` moved `days` calendar days on, same wall-clock time
    fn add_days(&self, at: DateTime<Utc>, days: u64) -> DateTime<Utc> {
        add_days_in(&Local, at, days)
    }

    /// Calendar days from the date of `from` to the date of `to`
    fn days_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
        days_between_in(&Local, from, to)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn add_days_in<Tz: TimeZone>(tz: &Tz, at: DateTime<Utc>, days: u64) -> DateTime<Utc> {
    let local = at.with_timezone(tz);
    let offset = TimeDelta::seconds(i64::from(local.offset().fix().local_minus_utc()));
    let naive = local.naive_local() + Days::new(days);
    match tz.from_local_datetime(&naive).earliest() {
        Some(moved) => moved.with_timezone(&Utc),
        // the wall-clock time was skipped by a DST change: keep the old offset
        None => (naive - offset).and_utc(),
    }
}

pub fn days_between_in<Tz: TimeZone>(tz: &Tz, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let from = from.with_timezone(tz).date_naive();
    let to = to.with_timezone(tz).date_naive();
    to.signed_duration_since(from).num_days()
}

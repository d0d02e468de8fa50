//! Daily-recurring medication alarms
//!
//! Every alarm of every scheduled container becomes a timer keyed by
//! (container, alarm time). One long-lived loop sleeps until the earliest
//! timer, moves each due timer to its next day, re-reads the container from
//! the store and only then fires it: buzz the dispenser, post a reminder,
//! text the caregiver if a phone number is on file, and log the dose.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info, warn};
use pillnow_ble::{DeviceSession, Notification, Notifier};
use pillnow_proto::{ContainerId, ContainerSchedule};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::adherence::AdherenceLog;
use crate::clock::Clock;
use crate::store::{ScheduleStore, StoreError};

pub const REMINDER_TITLE: &str = "Medicine Reminder";

/// First occurrence of a daily alarm at or after `now`, at the same
/// wall-clock time as `at`
pub fn next_fire_time(clock: &dyn Clock, at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if at >= now {
        return at;
    }
    roll_forward(clock, at, now, |next| next >= now)
}

/// First occurrence of a daily alarm strictly after `now`
fn advance(clock: &dyn Clock, at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    roll_forward(clock, at, now, |next| next > now)
}

/// The occurrence on `now`'s date if it qualifies, else the one after
fn roll_forward(
    clock: &dyn Clock,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
    qualifies: impl Fn(DateTime<Utc>) -> bool,
) -> DateTime<Utc> {
    let days = u64::try_from(clock.days_between(at, now)).unwrap_or(0);
    let next = clock.add_days(at, days);
    if qualifies(next) {
        next
    } else {
        clock.add_days(at, days + 1)
    }
}

pub fn reminder_message(label: &str) -> String {
    format!("Time to take your medicine from {label}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub container: ContainerId,
    /// The alarm as stored, not its next occurrence
    pub alarm: DateTime<Utc>,
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.container,
            self.alarm.to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArmedAlarm {
    pub key: TimerKey,
    pub medicine: Option<String>,
    /// Reminder text name: the medicine, or "Container N"
    pub label: String,
    pub phone_number: Option<String>,
    pub next_fire: DateTime<Utc>,
}

struct Inner {
    store: Arc<dyn ScheduleStore>,
    session: DeviceSession,
    notifier: Arc<dyn Notifier>,
    adherence: Arc<AdherenceLog>,
    clock: Arc<dyn Clock>,
    timers: Mutex<BTreeMap<TimerKey, ArmedAlarm>>,
    changed: Notify,
    /// Held for the whole of a firing
    firing: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct AlarmScheduler {
    inner: Arc<Inner>,
}

impl AlarmScheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        session: DeviceSession,
        notifier: Arc<dyn Notifier>,
        adherence: Arc<AdherenceLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                session,
                notifier,
                adherence,
                clock,
                timers: Mutex::new(BTreeMap::new()),
                changed: Notify::new(),
                firing: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn timers(&self) -> MutexGuard<'_, BTreeMap<TimerKey, ArmedAlarm>> {
        self.inner.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the armed timers of one container with its current alarms
    pub async fn schedule_alarms(&self, id: ContainerId) -> Result<Vec<ArmedAlarm>, StoreError> {
        let schedule = self.inner.store.container(id).await?;
        Ok(self.arm(&schedule, false))
    }

    /// Arm every container in the store; returns how many timers are armed
    pub async fn schedule_all(&self) -> Result<usize, StoreError> {
        let schedules = self.inner.store.containers().await?;
        for schedule in &schedules {
            self.arm(schedule, false);
        }
        Ok(self.timers().len())
    }

    /// A `refiring` container has just come due, so nothing of it is armed
    /// for the current instant again.
    fn arm(&self, schedule: &ContainerSchedule, refiring: bool) -> Vec<ArmedAlarm> {
        let clock = self.inner.clock.as_ref();
        let now = clock.now();
        let label = schedule.label();
        {
            let mut timers = self.timers();
            timers.retain(|key, _| key.container != schedule.id);
            for entry in schedule.entries() {
                let key = TimerKey {
                    container: entry.container,
                    alarm: entry.at,
                };
                let next_fire = if refiring {
                    advance(clock, entry.at, now)
                } else {
                    next_fire_time(clock, entry.at, now)
                };
                debug!("Armed {key} for {next_fire}");
                timers.insert(
                    key,
                    ArmedAlarm {
                        key,
                        medicine: entry.medicine,
                        label: label.clone(),
                        phone_number: schedule.phone_number.clone(),
                        next_fire,
                    },
                );
            }
        }
        self.inner.changed.notify_one();

        let armed = self.armed_for(schedule.id);
        if refiring {
            debug!("Rescheduled {} alarm(s) for {label}", armed.len());
        } else {
            info!("Scheduled {} alarm(s) for {label}", armed.len());
        }
        armed
    }

    /// Cancel every timer of `id` and nothing else
    pub fn clear_alarms(&self, id: ContainerId) -> usize {
        let removed = {
            let mut timers = self.timers();
            let before = timers.len();
            timers.retain(|key, _| key.container != id);
            before - timers.len()
        };
        if removed > 0 {
            info!("Cleared {removed} alarm(s) for container {id}");
            self.inner.changed.notify_one();
        }
        removed
    }

    pub async fn stop_alarm(&self) -> bool {
        self.inner.session.stop_alarm().await
    }

    /// All armed timers, soonest first
    pub fn armed(&self) -> Vec<ArmedAlarm> {
        let mut armed: Vec<_> = self.timers().values().cloned().collect();
        armed.sort_by_key(|a| (a.next_fire, a.key));
        armed
    }

    pub fn armed_for(&self, id: ContainerId) -> Vec<ArmedAlarm> {
        let mut armed: Vec<_> = self
            .timers()
            .values()
            .filter(|a| a.key.container == id)
            .cloned()
            .collect();
        armed.sort_by_key(|a| (a.next_fire, a.key));
        armed
    }

    /// Run the firing loop on its own task
    pub fn spawn(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Never returns. Wakes for the earliest timer or whenever the timer set
    /// changes.
    pub async fn run(&self) {
        info!("Alarm scheduler started");
        loop {
            let now = self.inner.clock.now();
            let due = self.take_due(now);
            if !due.is_empty() {
                self.refresh(&due).await;
                for (alarm, fired_at) in due {
                    // the store may have dropped or edited it since it was armed
                    let current = self.timers().get(&alarm.key).cloned();
                    match current {
                        Some(alarm) => self.fire(&alarm, fired_at).await,
                        None => info!("Alarm {} is no longer scheduled", alarm.key),
                    }
                }
                continue;
            }

            let next = self.timers().values().map(|a| a.next_fire).min();
            match next {
                Some(at) => {
                    let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
                    debug!("Next alarm at {at}, sleeping {}s", wait.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.inner.changed.notified() => {}
                    }
                }
                None => self.inner.changed.notified().await,
            }
        }
    }

    /// Moves every due timer to its next occurrence and hands back what fired
    fn take_due(&self, now: DateTime<Utc>) -> Vec<(ArmedAlarm, DateTime<Utc>)> {
        let mut timers = self.timers();
        let mut due = Vec::new();
        for alarm in timers.values_mut() {
            if alarm.next_fire <= now {
                let fired_at = alarm.next_fire;
                alarm.next_fire = advance(self.inner.clock.as_ref(), alarm.key.alarm, now);
                debug!("Rearmed {} for {}", alarm.key, alarm.next_fire);
                due.push((alarm.clone(), fired_at));
            }
        }
        due.sort_by_key(|(a, fired_at)| (*fired_at, a.key));
        due
    }

    /// Re-arm every container with a due alarm from what the store holds now
    async fn refresh(&self, due: &[(ArmedAlarm, DateTime<Utc>)]) {
        let containers: BTreeSet<ContainerId> = due.iter().map(|(a, _)| a.key.container).collect();
        for id in containers {
            match self.inner.store.container(id).await {
                Ok(schedule) => {
                    self.arm(&schedule, true);
                }
                Err(StoreError::ContainerNotFound(_)) => {
                    warn!("Container {id} not found, dropping its alarms");
                    self.clear_alarms(id);
                }
                Err(e) => error!("Failed to reload container {id}, keeping its alarms: {e}"),
            }
        }
    }

    async fn fire(&self, alarm: &ArmedAlarm, fired_at: DateTime<Utc>) {
        let _serial = self.inner.firing.lock().await;
        let container = alarm.key.container;
        info!("Alarm fired: container {container} ({})", alarm.label);

        match self.inner.session.trigger_alarm().await {
            Ok(true) => {}
            Ok(false) => warn!("Dispenser did not accept ALARM_ON for container {container}"),
            Err(e) => error!("Failed to trigger alarm for container {container}: {e}"),
        }

        let message = reminder_message(&alarm.label);
        if let Err(e) = self.inner.notifier.push(&Notification::new(REMINDER_TITLE, message.as_str())) {
            error!("Failed to post reminder for container {container}: {e}");
        }

        if let Some(phone) = &alarm.phone_number {
            match self.inner.session.send_sms(phone, &message).await {
                Ok(true) => info!("Reminder SMS sent for container {container}"),
                Ok(false) => warn!("Reminder SMS for container {container} was not sent"),
                Err(e) => error!("Failed to send reminder SMS for container {container}: {e}"),
            }
        }

        if let Err(e) = self
            .inner
            .adherence
            .record(container, alarm.medicine.as_deref(), fired_at)
        {
            error!("Failed to record dose for container {container}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use pillnow_ble::{
        AdapterState, AdvertisementStream, BleError, DeviceHandle, DisconnectSignal,
        MemoryNotifier, SimulatedTransport, Transport, TransportConfig, TransportKind,
        TransportStrategy,
    };
    use uuid::Uuid;

    use super::*;
    use crate::adherence::DoseStatus;
    use crate::clock::testing::Eastern;
    use crate::clock::{add_days_in, days_between_in};
    use crate::store::JsonStore;

    /// Wall clock that follows tokio's (paused) clock from a fixed origin
    struct TestClock<Tz = Utc> {
        origin: DateTime<Utc>,
        start: tokio::time::Instant,
        zone: Tz,
    }

    impl TestClock {
        fn at(origin: DateTime<Utc>) -> Self {
            Self::in_zone(origin, Utc)
        }
    }

    impl<Tz: TimeZone> TestClock<Tz> {
        fn in_zone(origin: DateTime<Utc>, zone: Tz) -> Self {
            Self {
                origin,
                start: tokio::time::Instant::now(),
                zone,
            }
        }
    }

    impl<Tz: TimeZone + Send + Sync> Clock for TestClock<Tz> {
        fn now(&self) -> DateTime<Utc> {
            self.origin + TimeDelta::from_std(self.start.elapsed()).unwrap()
        }

        fn add_days(&self, at: DateTime<Utc>, days: u64) -> DateTime<Utc> {
            add_days_in(&self.zone, at, days)
        }

        fn days_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
            days_between_in(&self.zone, from, to)
        }
    }

    /// Radio on which the user never grants Bluetooth permissions
    struct DeniedRadio;

    #[async_trait]
    impl TransportStrategy for DeniedRadio {
        fn kind(&self) -> TransportKind {
            TransportKind::Real
        }
        async fn request_permissions(&self) -> Result<bool, BleError> {
            Ok(false)
        }
        async fn adapter_state(&self) -> Result<AdapterState, BleError> {
            Ok(AdapterState::PoweredOn)
        }
        async fn start_scan(&self) -> Result<AdvertisementStream, BleError> {
            unreachable!("scan without permissions")
        }
        async fn stop_scan(&self) -> Result<(), BleError> {
            Ok(())
        }
        async fn connect(&self, _: &DeviceHandle) -> Result<DisconnectSignal, BleError> {
            Err(BleError::NotConnected)
        }
        async fn write(&self, _: &DeviceHandle, _: Uuid, _: Uuid, _: &[u8]) -> Result<(), BleError> {
            Err(BleError::NotConnected)
        }
        async fn disconnect(&self, _: &DeviceHandle) -> Result<(), BleError> {
            Ok(())
        }
    }

    struct Harness {
        scheduler: AlarmScheduler,
        store: Arc<JsonStore>,
        radio: Arc<SimulatedTransport>,
        notifier: Arc<MemoryNotifier>,
        adherence: Arc<AdherenceLog>,
        _dir: tempfile::TempDir,
    }

    fn harness(now: DateTime<Utc>) -> Harness {
        harness_with(now, None)
    }

    fn harness_with(now: DateTime<Utc>, strategy: Option<Arc<dyn TransportStrategy>>) -> Harness {
        harness_in(Arc::new(TestClock::at(now)), strategy)
    }

    fn harness_in(clock: Arc<dyn Clock>, strategy: Option<Arc<dyn TransportStrategy>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::in_home(dir.path(), "u1"));
        let radio = Arc::new(SimulatedTransport::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let strategy: Arc<dyn TransportStrategy> = match strategy {
            Some(strategy) => strategy,
            None => radio.clone(),
        };
        let transport = Transport::new(strategy, notifier.clone(), TransportConfig::default());
        let adherence = Arc::new(open_log(dir.path()));
        let scheduler = AlarmScheduler::new(
            store.clone(),
            DeviceSession::new(transport),
            notifier.clone(),
            adherence.clone(),
            clock,
        );
        Harness {
            scheduler,
            store,
            radio,
            notifier,
            adherence,
            _dir: dir,
        }
    }

    fn open_log(home: &Path) -> AdherenceLog {
        AdherenceLog::open_in_home(home).unwrap()
    }

    fn id(slot: u32) -> ContainerId {
        ContainerId::new(slot).unwrap()
    }

    fn march(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    async fn hours(n: u64) {
        tokio::time::sleep(Duration::from_secs(n * 3600)).await;
    }

    fn utc_clock() -> TestClock {
        TestClock::at(march(1, 0))
    }

    #[test]
    fn future_alarm_fires_as_is() {
        let clock = utc_clock();
        assert_eq!(next_fire_time(&clock, march(2, 10), march(2, 9)), march(2, 10));
        assert_eq!(next_fire_time(&clock, march(2, 9), march(2, 9)), march(2, 9));
    }

    #[test]
    fn alarm_earlier_today_moves_to_tomorrow() {
        assert_eq!(next_fire_time(&utc_clock(), march(2, 8), march(2, 9)), march(3, 8));
    }

    #[test]
    fn stale_alarm_rolls_forward_whole_days() {
        let clock = utc_clock();
        let next = next_fire_time(&clock, march(1, 10), march(5, 9));
        assert_eq!(next, march(5, 10));

        let next = next_fire_time(&clock, march(1, 8), march(5, 9));
        assert_eq!(next, march(6, 8));
        assert!(next > march(5, 9));
    }

    #[test]
    fn alarm_due_exactly_now_is_not_skipped() {
        let clock = utc_clock();
        assert_eq!(next_fire_time(&clock, march(1, 9), march(3, 9)), march(3, 9));
        assert_eq!(advance(&clock, march(1, 9), march(3, 9)), march(4, 9));
        assert_eq!(advance(&clock, march(1, 9), march(3, 8)), march(3, 9));
    }

    #[test]
    fn daily_alarm_keeps_its_local_time_across_dst() {
        let clock = TestClock::in_zone(march(1, 0), Eastern);
        // 08:00 EST on 2 March is 08:00 EDT a week later
        assert_eq!(next_fire_time(&clock, march(2, 13), march(9, 12)), march(9, 12));
        assert_eq!(next_fire_time(&clock, march(2, 13), march(9, 11)), march(9, 12));
        assert_eq!(advance(&clock, march(2, 13), march(9, 12)), march(10, 12));
    }

    #[test]
    fn timer_key_display() {
        let key = TimerKey {
            container: id(1),
            alarm: march(2, 8),
        };
        assert_eq!(key.to_string(), "1-2026-03-02T08:00:00.000Z");
    }

    #[tokio::test(start_paused = true)]
    async fn passed_alarm_is_armed_for_tomorrow() {
        let h = harness(march(2, 9));
        h.store.add_alarm(id(1), march(2, 8)).unwrap();

        let armed = h.scheduler.schedule_alarms(id(1)).await.unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].next_fire, march(3, 8));
        assert_eq!(armed[0].key.alarm, march(2, 8));
        assert_eq!(armed[0].label, "Container 1");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_container_is_an_error() {
        let h = harness(march(2, 9));
        let err = h.scheduler.schedule_alarms(id(7)).await.unwrap_err();
        assert!(matches!(err, StoreError::ContainerNotFound(c) if c == id(7)));
        assert!(h.scheduler.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timers() {
        let h = harness(march(2, 9));
        h.store.add_alarm(id(1), march(2, 12)).unwrap();
        h.scheduler.schedule_alarms(id(1)).await.unwrap();

        h.store.set_alarms(id(1), vec![march(2, 18), march(2, 20)]).unwrap();
        let armed = h.scheduler.schedule_alarms(id(1)).await.unwrap();

        let fires: Vec<_> = armed.iter().map(|a| a.next_fire).collect();
        assert_eq!(fires, vec![march(2, 18), march(2, 20)]);
        assert_eq!(h.scheduler.armed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_and_rearms_for_the_next_day() {
        let h = harness(march(2, 9));
        h.store.select_pill(id(1), "Aspirin").unwrap();
        h.store.add_alarm(id(1), march(2, 8)).unwrap();
        h.scheduler.schedule_alarms(id(1)).await.unwrap();
        let _loop = h.scheduler.spawn();

        hours(22).await;
        assert!(h.radio.written().is_empty());

        hours(2).await;
        assert_eq!(h.radio.written(), vec!["ALARM_ON"]);
        let pushed = h.notifier.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].title, "Medicine Reminder");
        assert_eq!(pushed[0].message, "Time to take your medicine from Aspirin");

        let doses = h.adherence.records();
        assert_eq!(doses.len(), 1);
        assert_eq!(doses[0].scheduled_at, march(3, 8));
        assert_eq!(doses[0].status, DoseStatus::Pending);
        assert_eq!(h.scheduler.armed()[0].next_fire, march(4, 8));

        hours(24).await;
        assert_eq!(h.radio.written(), vec!["ALARM_ON", "ALARM_ON"]);
        assert_eq!(h.adherence.records().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn caregiver_is_texted_when_a_phone_is_on_file() {
        let h = harness(march(2, 7));
        h.store.select_pill(id(2), "Metformin").unwrap();
        h.store.add_alarm(id(2), march(2, 8)).unwrap();
        h.store.set_phone_number(id(2), Some("+15551234567")).unwrap();
        h.scheduler.schedule_alarms(id(2)).await.unwrap();
        let _loop = h.scheduler.spawn();

        hours(2).await;
        assert_eq!(
            h.radio.written(),
            vec![
                "ALARM_ON",
                "SMS:+15551234567:Time to take your medicine from Metformin"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_one_container_leaves_the_others_firing() {
        let h = harness(march(2, 7));
        h.store.add_alarm(id(1), march(2, 8)).unwrap();
        h.store.add_alarm(id(10), march(2, 8)).unwrap();
        h.store.add_alarm(id(10), march(2, 9)).unwrap();
        assert_eq!(h.scheduler.schedule_all().await.unwrap(), 3);
        let _loop = h.scheduler.spawn();

        assert_eq!(h.scheduler.clear_alarms(id(1)), 1);
        assert!(h.scheduler.armed_for(id(1)).is_empty());
        assert_eq!(h.scheduler.armed_for(id(10)).len(), 2);

        hours(3).await;
        let fired: Vec<_> = h.adherence.records().iter().map(|r| r.container).collect();
        assert_eq!(fired, vec![id(10), id(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trigger_still_rearms_and_reminds() {
        let h = harness_with(march(2, 7), Some(Arc::new(DeniedRadio)));
        h.store.add_alarm(id(1), march(2, 8)).unwrap();
        h.scheduler.schedule_alarms(id(1)).await.unwrap();
        let _loop = h.scheduler.spawn();

        hours(2).await;
        assert_eq!(h.notifier.alert_titles(), vec!["Permissions Required"]);
        assert_eq!(h.notifier.pushed().len(), 1);
        assert_eq!(h.adherence.records().len(), 1);
        assert_eq!(h.scheduler.armed()[0].next_fire, march(3, 8));

        hours(24).await;
        assert_eq!(h.notifier.pushed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_notifications_do_not_stop_the_dose_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::in_home(dir.path(), "u1"));
        store.add_alarm(id(1), march(2, 8)).unwrap();
        let notifier = Arc::new(MemoryNotifier::unavailable());
        let transport = Transport::simulated(notifier.clone(), TransportConfig::default());
        let adherence = Arc::new(open_log(dir.path()));
        let scheduler = AlarmScheduler::new(
            store,
            DeviceSession::new(transport),
            notifier,
            adherence.clone(),
            Arc::new(TestClock::at(march(2, 7))),
        );
        scheduler.schedule_alarms(id(1)).await.unwrap();
        let _loop = scheduler.spawn();

        hours(2).await;
        assert_eq!(adherence.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn alarms_added_while_running_wake_the_loop() {
        let h = harness(march(2, 7));
        let _loop = h.scheduler.spawn();
        tokio::task::yield_now().await;

        h.store.add_alarm(id(3), march(2, 8)).unwrap();
        h.scheduler.schedule_alarms(id(3)).await.unwrap();

        hours(2).await;
        assert_eq!(h.radio.written(), vec!["ALARM_ON"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_the_same_local_time_after_clocks_go_forward() {
        // 09:00 EST on the 7th, the alarm is 08:00 local
        let h = harness_in(Arc::new(TestClock::in_zone(march(7, 14), Eastern)), None);
        h.store.add_alarm(id(1), march(7, 13)).unwrap();
        let armed = h.scheduler.schedule_alarms(id(1)).await.unwrap();
        assert_eq!(armed[0].next_fire, march(8, 12));
        let _loop = h.scheduler.spawn();

        hours(21).await;
        assert!(h.radio.written().is_empty());

        hours(2).await;
        assert_eq!(h.radio.written(), vec!["ALARM_ON"]);
        assert_eq!(h.adherence.records()[0].scheduled_at, march(8, 12));
        assert_eq!(h.scheduler.armed()[0].next_fire, march(9, 12));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_container_stops_firing() {
        let h = harness(march(2, 7));
        h.store.add_alarm(id(1), march(2, 8)).unwrap();
        h.store.add_alarm(id(2), march(2, 8)).unwrap();
        h.scheduler.schedule_all().await.unwrap();
        let _loop = h.scheduler.spawn();

        hours(2).await;
        assert_eq!(h.radio.written(), vec!["ALARM_ON", "ALARM_ON"]);

        assert!(h.store.remove_container(id(1)).unwrap());
        h.store.set_alarms(id(2), Vec::new()).unwrap();

        hours(48).await;
        assert_eq!(h.radio.written(), vec!["ALARM_ON", "ALARM_ON"]);
        assert_eq!(h.adherence.records().len(), 2);
        assert!(h.scheduler.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn edits_are_picked_up_when_the_alarm_comes_round() {
        let h = harness(march(2, 7));
        h.store.select_pill(id(1), "Aspirin").unwrap();
        h.store.add_alarm(id(1), march(2, 8)).unwrap();
        h.scheduler.schedule_alarms(id(1)).await.unwrap();
        let _loop = h.scheduler.spawn();

        hours(2).await;
        h.store.select_pill(id(1), "Ibuprofen").unwrap();
        h.store.set_phone_number(id(1), Some("+15550001111")).unwrap();

        hours(24).await;
        let pushed = h.notifier.pushed();
        assert_eq!(pushed[0].message, "Time to take your medicine from Aspirin");
        assert_eq!(pushed[1].message, "Time to take your medicine from Ibuprofen");
        assert_eq!(
            h.radio.written().last().map(String::as_str),
            Some("SMS:+15550001111:Time to take your medicine from Ibuprofen")
        );
        assert_eq!(h.adherence.records()[1].medicine.as_deref(), Some("Ibuprofen"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_alarm_goes_to_the_dispenser() {
        let h = harness(march(2, 7));
        assert!(h.scheduler.stop_alarm().await);
        assert_eq!(h.radio.written(), vec!["ALARM_OFF"]);
    }
}

//! Command line companion for the PillNow dispenser
//!
//! Configures container schedules, talks to the dispenser over BLE and runs
//! the daily alarm loop.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use pillnow_ble::{
    DeviceSession, LogNotifier, Notifier, RealTransport, ScanOutcome, Transport,
};
use pillnow_proto::ContainerId;
use pillnow_schedule::{
    AdherenceLog, AlarmScheduler, AppConfig, JsonStore, ScheduleStore, SystemClock, pillnow_home,
};

#[derive(Parser)]
#[command(name = "pillnow")]
#[command(about = "Companion for the PillNow pill dispenser")]
struct Cli {
    /// Use the simulated dispenser instead of Bluetooth
    #[arg(long, global = true)]
    simulate: bool,

    /// Data directory (default: $PILLNOW_HOME or ~/.pillnow)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look for a dispenser nearby
    Scan,
    /// Sound the dispenser alarm
    Trigger,
    /// Silence the dispenser alarm
    Stop,
    /// Ask the dispenser for its status
    Status,
    /// Send a test command
    Test,
    /// Have the dispenser send a text message
    Sms {
        /// Phone number, digits with optional leading +
        phone: String,
        message: String,
    },
    /// Edit container schedules
    Container {
        #[command(subcommand)]
        action: ContainerAction,
    },
    /// Arm every alarm and run until interrupted
    Run,
    /// Dose history
    Adherence {
        #[command(subcommand)]
        action: AdherenceAction,
    },
}

#[derive(Subcommand)]
enum ContainerAction {
    /// Show one container, or all of them
    Show { id: Option<ContainerId> },
    /// Set the medicine in a container
    Pill { id: ContainerId, name: String },
    /// Add an alarm: RFC 3339 timestamp or HH:MM today (local time)
    AddAlarm { id: ContainerId, time: String },
    /// Remove all alarms of a container
    ClearAlarms { id: ContainerId },
    /// Set the caregiver phone number; omit to remove it
    Phone { id: ContainerId, number: Option<String> },
    /// Delete a container
    Remove { id: ContainerId },
}

#[derive(Subcommand)]
enum AdherenceAction {
    /// List recorded doses
    List,
    /// Mark the latest pending dose of a container as taken
    Take { id: ContainerId },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let home = match cli.home {
        Some(home) => {
            std::fs::create_dir_all(&home)?;
            home
        }
        None => pillnow_home()?,
    };
    let config = AppConfig::load_or_create(&home)?;
    let store = Arc::new(JsonStore::in_home(&home, &config.user_id));

    match cli.command {
        Commands::Container { action } => return container(&store, action).await,
        Commands::Adherence { action } => {
            let log = AdherenceLog::open_in_home(&home)?;
            return adherence(&log, action);
        }
        _ => {}
    }

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let transport = build_transport(&config, cli.simulate, notifier.clone()).await;
    transport.set_connection_callback(|connected| {
        info!("Dispenser {}", if connected { "connected" } else { "disconnected" });
    });
    let session = DeviceSession::new(transport.clone());

    match cli.command {
        Commands::Scan => match transport.scan_for_device().await? {
            ScanOutcome::Found(device) => {
                let rssi = device
                    .rssi
                    .map(|r| format!("{r} dBm"))
                    .unwrap_or_else(|| "N/A".to_string());
                println!("Found {} ({}) RSSI: {rssi}", device.name, device.id);
            }
            ScanOutcome::AlreadyScanning => println!("A scan is already running"),
            ScanOutcome::TimedOut => println!("No {} device found", config.device_marker),
        },
        Commands::Trigger => report("ALARM_ON", session.trigger_alarm().await?),
        Commands::Stop => {
            // a fresh process has no link yet
            if let Err(e) = session.initialize().await {
                warn!("Could not reach the dispenser: {e}");
            }
            report("ALARM_OFF", session.stop_alarm().await)
        }
        Commands::Status => report("STATUS", session.get_status().await?),
        Commands::Test => report("TEST", session.test_connection().await?),
        Commands::Sms { phone, message } => report("SMS", session.send_sms(&phone, &message).await?),
        Commands::Run => {
            let adherence = Arc::new(AdherenceLog::open_in_home(&home)?);
            let scheduler = AlarmScheduler::new(
                store,
                session,
                notifier,
                adherence,
                Arc::new(SystemClock),
            );
            let armed = scheduler.schedule_all().await?;
            println!("{armed} alarm(s) armed, press Ctrl-C to stop");
            for alarm in scheduler.armed() {
                println!("  {} next at {}", alarm.label, local(alarm.next_fire));
            }

            let alarms = scheduler.spawn();
            tokio::signal::ctrl_c().await?;
            alarms.abort();
            scheduler.stop_alarm().await;
            info!("Alarm scheduler stopped");
        }
        Commands::Container { .. } | Commands::Adherence { .. } => {}
    }

    if transport.is_mock() {
        println!("(mock mode: no dispenser was contacted)");
    }
    Ok(())
}

/// Real radio unless asked otherwise; a machine without Bluetooth gets the
/// simulated dispenser.
async fn build_transport(config: &AppConfig, simulate: bool, notifier: Arc<dyn Notifier>) -> Transport {
    if simulate || config.simulate {
        return Transport::simulated(notifier, config.transport_config());
    }
    match RealTransport::new().await {
        Ok(radio) => Transport::new(Arc::new(radio), notifier, config.transport_config()),
        Err(e) => {
            warn!("{e}, switching to mock mode");
            notifier.alert("Bluetooth Unavailable", "Bluetooth is not available on this device");
            Transport::simulated(notifier, config.transport_config())
        }
    }
}

fn report(command: &str, sent: bool) {
    if sent {
        println!("{command} sent");
    } else {
        println!("{command} failed");
    }
}

async fn container(
    store: &JsonStore,
    action: ContainerAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ContainerAction::Show { id: Some(id) } => {
            let schedule = store.container(id).await?;
            print_schedule(&schedule);
        }
        ContainerAction::Show { id: None } => {
            let schedules = store.containers().await?;
            if schedules.is_empty() {
                println!("No containers configured");
            }
            for schedule in &schedules {
                print_schedule(schedule);
            }
        }
        ContainerAction::Pill { id, name } => {
            store.select_pill(id, &name)?;
            println!("Container {id}: {name}");
        }
        ContainerAction::AddAlarm { id, time } => {
            let at = parse_alarm_time(&time)?;
            let schedule = store.add_alarm(id, at)?;
            println!("Container {id}: {} alarm(s)", schedule.alarms.len());
        }
        ContainerAction::ClearAlarms { id } => {
            store.set_alarms(id, Vec::new())?;
            println!("Container {id}: alarms cleared");
        }
        ContainerAction::Phone { id, number } => {
            store.set_phone_number(id, number.as_deref())?;
            match number {
                Some(number) => println!("Container {id}: reminders also texted to {number}"),
                None => println!("Container {id}: phone number removed"),
            }
        }
        ContainerAction::Remove { id } => {
            if store.remove_container(id)? {
                println!("Container {id} removed");
            } else {
                println!("Container {id} not found");
            }
        }
    }
    Ok(())
}

fn print_schedule(schedule: &pillnow_proto::ContainerSchedule) {
    println!("Container {}: {}", schedule.id, schedule.label());
    for at in &schedule.alarms {
        println!("  alarm {}", local(*at));
    }
    if let Some(phone) = &schedule.phone_number {
        println!("  sms {phone}");
    }
}

fn adherence(log: &AdherenceLog, action: AdherenceAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        AdherenceAction::List => {
            for record in log.records() {
                let medicine = record.medicine.as_deref().unwrap_or("-");
                let taken = record
                    .taken_at
                    .map(|at| format!(" (taken {})", local(at)))
                    .unwrap_or_default();
                println!(
                    "{}  container {}  {medicine}  {:?}{taken}",
                    local(record.scheduled_at),
                    record.container,
                    record.status
                );
            }
            let summary = log.summary();
            println!(
                "Adherence: {}/{} ({:.0}%)",
                summary.taken,
                summary.total,
                summary.percentage()
            );
        }
        AdherenceAction::Take { id } => match log.mark_taken(id, Utc::now())? {
            Some(record) => println!("Marked dose of {} as taken", local(record.scheduled_at)),
            None => println!("No pending dose for container {id}"),
        },
    }
    Ok(())
}

/// RFC 3339, or `HH:MM` meaning today in local time
fn parse_alarm_time(input: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    let time = NaiveTime::parse_from_str(input, "%H:%M")
        .map_err(|_| format!("invalid alarm time {input:?}, expected HH:MM or RFC 3339"))?;
    let at = Local::now()
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| format!("{input} does not exist today in the local timezone"))?;
    Ok(at.with_timezone(&Utc))
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

mod alerts;
mod config;
mod models;
mod providers;
mod updates;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alerts::notify::{Notification, NotificationPreferences, NotificationSink};
use alerts::store::AlertStore;
use alerts::{AlertManager, AlertSettings, EmptyCatalog};
use config::{Config, ConfigError};
use models::{JourneyTimes, LiveTimes};
use providers::bustracker::BusTrackerClient;
use providers::news;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn,reqwest=warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut opts = getopts::Options::new();
    opts.optopt("c", "config", "Path to the configuration file", "FILE");
    opts.optopt("s", "services", "Comma-separated services to watch", "LIST");
    opts.optopt("m", "minutes", "Fire when a watched bus is this close", "N");
    opts.optflag("h", "help", "Print this help");

    let matches = opts.parse(&args[1..]).expect("Failed to parse command line");
    if matches.opt_present("help") || matches.free.is_empty() {
        print_usage(&opts);
        return;
    }

    let config = load_config(&matches);
    let client = BusTrackerClient::new(&config.tracker).expect("Failed to build API client");

    let command = matches.free[0].as_str();
    let arguments = &matches.free[1..];
    match command {
        "times" => run_times(&client, &config, arguments).await,
        "journey" => run_journey(&client, arguments).await,
        "watch" => run_watch(client, &config, &matches, arguments).await,
        "news" => run_news(&client, &config).await,
        "update-db" => run_update_db(&client, &config).await,
        other => {
            tracing::error!(command = other, "Unknown command");
            print_usage(&opts);
            std::process::exit(2);
        }
    }
}

fn print_usage(opts: &getopts::Options) {
    let brief = "Usage: bustracker [options] <command> [args]\n\n\
Commands:\n\
    times <stop[,stop...]>                   Show live departures\n\
    journey <stop> <journey-id>              Show a journey's calling points\n\
    watch <stop> -s <services> -m <minutes>  Arm a time alert and wait for it\n\
    news                                     Show service updates\n\
    update-db                                Install a pending stop-database update";
    print!("{}", opts.usage(brief));
}

/// Load configuration; a missing file at the default path falls back to
/// built-in defaults, an explicitly named file must exist.
fn load_config(matches: &getopts::Matches) -> Config {
    let explicit = matches.opt_str("config");
    let path = explicit
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    match Config::load(&path) {
        Ok(config) => config,
        Err(ConfigError::ReadError(e)) if explicit.is_none() => {
            tracing::warn!(path = %path, error = %e, "No config file, using defaults");
            Config::default()
        }
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Failed to load config");
            std::process::exit(1);
        }
    }
}

/// Open the alert database, creating it and running migrations as needed.
async fn open_store(config: &Config) -> AlertStore {
    if let Some(parent) = Path::new(&config.storage.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).expect("Failed to create database directory");
        }
    }

    let pool = SqlitePool::connect(&format!(
        "sqlite:{}?mode=rwc",
        config.storage.database_path
    ))
    .await
    .expect("Failed to connect to SQLite database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    AlertStore::new(pool)
}

async fn run_times(client: &BusTrackerClient, config: &Config, arguments: &[String]) {
    let Some(stops_arg) = arguments.first() else {
        tracing::error!("times needs a stop code argument");
        std::process::exit(2);
    };
    let stop_codes = parse_list(stops_arg);

    match client
        .get_live_times(&stop_codes, config.tracker.departures_per_stop)
        .await
    {
        Ok(times) => print_live_times(&times),
        Err(e) if e.is_transport() => {
            tracing::error!(error = %e, "Could not reach the tracker service");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Live times query failed");
            std::process::exit(1);
        }
    }
}

async fn run_journey(client: &BusTrackerClient, arguments: &[String]) {
    let (Some(stop_code), Some(journey_id)) = (arguments.first(), arguments.get(1)) else {
        tracing::error!("journey needs a stop code and a journey id");
        std::process::exit(2);
    };

    match client.get_journey_times(stop_code, journey_id).await {
        Ok(journey) => print_journey(&journey),
        Err(e) => {
            tracing::error!(error = %e, "Journey query failed");
            std::process::exit(1);
        }
    }
}

async fn run_watch(
    client: BusTrackerClient,
    config: &Config,
    matches: &getopts::Matches,
    arguments: &[String],
) {
    let Some(stop_code) = arguments.first() else {
        tracing::error!("watch needs a stop code argument");
        std::process::exit(2);
    };
    let services = matches
        .opt_str("services")
        .map(|s| parse_list(&s))
        .unwrap_or_default();
    let trigger_minutes: u32 = match matches.opt_str("minutes").map(|m| m.parse()) {
        Some(Ok(minutes)) => minutes,
        _ => {
            tracing::error!("watch needs -m <minutes>");
            std::process::exit(2);
        }
    };

    let store = open_store(config).await;
    let settings = AlertSettings {
        poll_interval: Duration::from_secs(config.alerts.poll_interval_secs),
        max_age: Duration::from_secs(config.alerts.max_age_secs),
        preferences: config.alerts.notifications.clone(),
    };

    let (forward, mut delivered) = tokio::sync::mpsc::unbounded_channel();
    let manager = AlertManager::new(
        store,
        client,
        Arc::new(CliNotifier { forward }),
        Arc::new(EmptyCatalog),
        settings,
    );

    if let Err(e) = manager
        .arm_time_alert(stop_code, services, trigger_minutes)
        .await
    {
        tracing::error!(error = %e, "Could not arm the alert");
        std::process::exit(1);
    }
    println!(
        "Watching stop {} (trigger: {} min). Ctrl-C cancels.",
        stop_code, trigger_minutes
    );

    let mut probe = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            notification = delivered.recv() => {
                if let Some(notification) = notification {
                    println!("{}: {}", notification.title(), notification.body());
                }
                break;
            }
            _ = probe.tick() => {
                let active = manager
                    .active_time_alert()
                    .await
                    .expect("Failed to read alert state");
                if active.is_none() {
                    // The row can vanish an instant before the notification
                    // lands; give delivery a moment before declaring expiry.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    match delivered.try_recv() {
                        Ok(notification) => {
                            println!("{}: {}", notification.title(), notification.body());
                        }
                        Err(_) => println!("Alert ended without firing (expired or cancelled)"),
                    }
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                manager
                    .cancel_time_alert()
                    .await
                    .expect("Failed to cancel the alert");
                println!("Cancelled");
                break;
            }
        }
    }
}

async fn run_news(client: &BusTrackerClient, config: &Config) {
    match news::fetch_service_updates(client.http_client(), &config.news.feed_url).await {
        Ok(items) => {
            if items.is_empty() {
                println!("No service updates.");
            }
            for item in items {
                println!(
                    "{}  {}\n  {}\n",
                    item.posted_at.format("%Y-%m-%d %H:%M"),
                    item.sender,
                    item.body
                );
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "News query failed");
            std::process::exit(1);
        }
    }
}

async fn run_update_db(client: &BusTrackerClient, config: &Config) {
    let store = open_store(config).await;

    match updates::check_for_update(client, &store, &config.updates).await {
        Ok(None) => println!("Stop database is up to date."),
        Ok(Some(info)) => {
            println!("Downloading stop database {}...", info.topo_id);
            match updates::download_database(
                client.http_client(),
                &store,
                &info,
                &config.updates.target_path,
            )
            .await
            {
                Ok(()) => println!("Installed {}.", config.updates.target_path.display()),
                Err(e) => {
                    tracing::error!(error = %e, "Database download failed");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Update check failed");
            std::process::exit(1);
        }
    }
}

/// Sink used by the watch command: logs the alert and hands it to the
/// waiting command loop.
struct CliNotifier {
    forward: tokio::sync::mpsc::UnboundedSender<Notification>,
}

impl NotificationSink for CliNotifier {
    fn deliver(&self, notification: Notification, preferences: &NotificationPreferences) {
        tracing::info!(
            stop = %notification.stop_code(),
            title = %notification.title(),
            body = %notification.body(),
            sound = preferences.sound,
            vibration = preferences.vibration,
            led = preferences.led,
            "Notification"
        );
        let _ = self.forward.send(notification);
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn print_live_times(times: &LiveTimes) {
    if times.has_global_disruption {
        println!("! Network-wide disruption in effect");
    }

    let mut stops: Vec<_> = times.stops.values().collect();
    stops.sort_by(|a, b| a.stop_code.cmp(&b.stop_code));

    for stop in stops {
        let name = if stop.stop_name.is_empty() {
            stop.stop_code.clone()
        } else {
            stop.stop_name.clone()
        };
        let marker = if stop.has_disruption { " !" } else { "" };
        println!("Stop {}  {}{}", stop.stop_code, name, marker);

        for service in &stop.services {
            let destination = service
                .next_bus()
                .map(|bus| bus.destination.as_str())
                .unwrap_or("-");
            let departures: Vec<String> = service
                .buses
                .iter()
                .map(|bus| {
                    // An asterisk marks timetable estimates, as on the
                    // street displays.
                    let estimate = if bus.is_estimated { "*" } else { "" };
                    format!("{}{}", bus.display_departure(), estimate)
                })
                .collect();
            println!(
                "  {:<5} {:<24} {}",
                service.service_name,
                destination,
                departures.join(", ")
            );
        }
    }
}

fn print_journey(journey: &JourneyTimes) {
    println!(
        "Service {} to {} (journey {})",
        journey.service_name,
        journey.destination.as_deref().unwrap_or("unknown"),
        journey.journey_id
    );
    if journey.has_journey_disruption || journey.has_service_disruption {
        println!("! This journey is disrupted");
    }

    let mut stops: Vec<_> = journey.stops.iter().collect();
    stops.sort_by_key(|stop| stop.order);
    for stop in stops {
        let time = stop
            .arrival_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        println!(
            "  {}  {}",
            time,
            stop.stop_name.as_deref().unwrap_or(&stop.stop_code)
        );
    }
}

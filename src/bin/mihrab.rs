//! Mihrab CLI - Command-line front end for the prayer and qibla engines
//!
//! Commands:
//! - qibla: Bearing, distance and rotation towards the Kaaba
//! - next: Next prayer for a schedule at an instant
//! - times: Fetch one day's schedule through the cache and provider
//! - watch: Live countdown until Ctrl-C
//! - config: Print the effective configuration

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mihrab::bearing;
use mihrab::cache::ScheduleCache;
use mihrab::countdown::format_countdown;
use mihrab::provider::{FetchRequest, DEFAULT_ALADHAN_URL};
use mihrab::resolver;
use mihrab::{
    AladhanProvider, CalculationMethod, Coordinate, FixedLocation, JsonFileStore, KeyValueStore,
    MemoryStore, MihrabConfig, MihrabError, PrayerEngine, PrayerSchedule, PrayerTimeProvider,
    School, SystemClock, MIHRAB_VERSION,
};

/// Mihrab - Prayer times and qibla direction
#[derive(Parser)]
#[command(name = "mihrab")]
#[command(version = MIHRAB_VERSION)]
#[command(about = "Prayer times, countdown and qibla direction", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Provider options shared by the fetching commands
#[derive(clap::Args)]
struct FetchArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    /// Calculation method (name or AlAdhan id)
    #[arg(long)]
    method: Option<CalculationMethod>,

    /// Asr school (shafi or hanafi)
    #[arg(long)]
    school: Option<School>,

    /// IANA timezone forwarded to the provider (e.g. "Europe/London")
    #[arg(long)]
    timezone: Option<String>,

    /// Persist the schedule cache in this JSON file
    #[arg(long)]
    cache: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bearing and distance to the Kaaba, plus rotation for a heading
    Qibla {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Current device heading in degrees
        #[arg(long)]
        heading: Option<f64>,
    },

    /// Resolve the next prayer for a schedule
    Next {
        /// Schedule as inline JSON, a file path, or - for stdin
        #[arg(short, long)]
        schedule: String,

        /// Reference instant (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<String>,
    },

    /// Fetch today's schedule through the cache and provider
    Times {
        #[command(flatten)]
        fetch: FetchArgs,

        /// Local date to fetch (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Live countdown to the next prayer until Ctrl-C
    Watch {
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Print the effective configuration
    Config,
}

#[derive(serde::Serialize)]
struct QiblaOutput {
    latitude: f64,
    longitude: f64,
    bearing_degrees: f64,
    distance_km: f64,
    heading_degrees: Option<f64>,
    rotation_degrees: Option<f64>,
}

#[derive(serde::Serialize)]
struct NextOutput {
    prayer: String,
    at: DateTime<FixedOffset>,
    rolled_over: bool,
    countdown: String,
}

#[derive(serde::Serialize)]
struct TimesOutput {
    date: NaiveDate,
    source: &'static str,
    method: CalculationMethod,
    school: School,
    schedule: PrayerSchedule,
}

fn init_logging() {
    // stdout carries command output, so logs go to stderr
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), MihrabCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Qibla { lat, lon, heading } => cmd_qibla(&config, lat, lon, heading),
        Commands::Next { schedule, now } => cmd_next(&schedule, now.as_deref()),
        Commands::Times { fetch, date } => cmd_times(config, &fetch, date).await,
        Commands::Watch { fetch } => cmd_watch(config, &fetch).await,
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<MihrabConfig, MihrabCliError> {
    match path {
        Some(path) => {
            let config = MihrabConfig::from_file(path)?;
            info!(path = %path.display(), "Configuration loaded");
            Ok(config)
        }
        None => Ok(MihrabConfig::default()),
    }
}

/// Fold command-line overrides into the file/default configuration
fn apply_overrides(mut config: MihrabConfig, fetch: &FetchArgs) -> Result<MihrabConfig, MihrabCliError> {
    if let Some(method) = fetch.method {
        config.method = method;
    }
    if let Some(school) = fetch.school {
        config.school = school;
    }
    if let Some(tz) = &fetch.timezone {
        config.timezone = Some(tz.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_store(cache: Option<&Path>) -> Arc<dyn KeyValueStore> {
    match cache {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    }
}

fn provider_for(config: &MihrabConfig) -> Result<AladhanProvider, MihrabCliError> {
    let url = if config.provider_url.is_empty() {
        DEFAULT_ALADHAN_URL
    } else {
        config.provider_url.as_str()
    };
    Ok(AladhanProvider::new(url)?)
}

fn cmd_qibla(
    config: &MihrabConfig,
    lat: f64,
    lon: f64,
    heading: Option<f64>,
) -> Result<(), MihrabCliError> {
    let from = Coordinate::new(lat, lon)?;
    let mut reading = bearing::reading_between(from, config.destination);
    reading.heading_degrees = heading.map(bearing::normalize_degrees);

    let output = QiblaOutput {
        latitude: from.latitude,
        longitude: from.longitude,
        bearing_degrees: reading.bearing_degrees,
        distance_km: reading.distance_km,
        heading_degrees: reading.heading_degrees,
        rotation_degrees: reading.rotation_degrees(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Inline JSON, a file path, or stdin for `-`
fn read_schedule(source: &str) -> Result<PrayerSchedule, MihrabCliError> {
    let raw = if source == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(MihrabCliError::Input(
                "Expected a schedule on stdin but stdin is a terminal".to_string(),
            ));
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else if source.trim_start().starts_with('{') {
        source.to_string()
    } else {
        fs::read_to_string(source)?
    };
    Ok(PrayerSchedule::from_json(&raw)?)
}

fn cmd_next(schedule: &str, now: Option<&str>) -> Result<(), MihrabCliError> {
    let schedule = read_schedule(schedule)?;
    let now = match now {
        Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .map_err(|e| MihrabError::InvalidTime(format!("{raw}: {e}")))?,
        None => {
            let local = Local::now();
            local.with_timezone(local.offset())
        }
    };

    let next = resolver::resolve(&schedule, &now);
    let output = NextOutput {
        prayer: next.prayer.to_string(),
        at: next.at.with_timezone(now.offset()),
        rolled_over: next.rolled_over,
        countdown: format_countdown(next.at - now.with_timezone(&Utc)),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_times(
    config: MihrabConfig,
    fetch: &FetchArgs,
    date: Option<NaiveDate>,
) -> Result<(), MihrabCliError> {
    let config = apply_overrides(config, fetch)?;
    let coordinate = Coordinate::new(fetch.lat, fetch.lon)?;
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let cache = ScheduleCache::new(open_store(fetch.cache.as_deref()), config.cache_ttl());

    let (source, schedule) = match cache.lookup(coordinate, date, Utc::now()) {
        Some(schedule) => ("cache", schedule),
        None => {
            let provider = provider_for(&config)?;
            let request = FetchRequest {
                coordinate,
                date,
                method: config.method,
                school: config.school,
                timezone: config.timezone.clone(),
                timeout: config.request_timeout(),
            };
            let schedule = provider.fetch(&request).await?;
            cache.store(coordinate, date, schedule, Utc::now());
            ("provider", schedule)
        }
    };

    let output = TimesOutput {
        date,
        source,
        method: config.method,
        school: config.school,
        schedule,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_watch(config: MihrabConfig, fetch: &FetchArgs) -> Result<(), MihrabCliError> {
    let config = apply_overrides(config, fetch)?;
    let coordinate = Coordinate::new(fetch.lat, fetch.lon)?;
    let provider = provider_for(&config)?;

    let mut engine = PrayerEngine::new(
        Arc::new(FixedLocation(coordinate)),
        Arc::new(provider),
        open_store(fetch.cache.as_deref()),
        Arc::new(SystemClock),
        config,
    );
    let mut updates = engine.subscribe();
    engine.activate();

    let mut last_line = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        if let Some(error) = snapshot.error {
            engine.deactivate();
            return Err(MihrabCliError::Engine {
                message: error,
                hint: snapshot.hint,
            });
        }
        let Some(next) = snapshot.next_prayer else {
            continue;
        };

        let line = format!(
            "{} at {} in {}",
            next.prayer,
            next.at.with_timezone(&Local).format("%H:%M"),
            snapshot.countdown
        );
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
    }

    engine.deactivate();
    Ok(())
}

// Error handling

#[derive(Debug)]
enum MihrabCliError {
    Io(io::Error),
    Mihrab(MihrabError),
    Json(serde_json::Error),
    Input(String),
    Engine {
        message: String,
        hint: Option<String>,
    },
}

impl From<io::Error> for MihrabCliError {
    fn from(e: io::Error) -> Self {
        MihrabCliError::Io(e)
    }
}

impl From<MihrabError> for MihrabCliError {
    fn from(e: MihrabError) -> Self {
        MihrabCliError::Mihrab(e)
    }
}

impl From<serde_json::Error> for MihrabCliError {
    fn from(e: serde_json::Error) -> Self {
        MihrabCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MihrabCliError> for CliError {
    fn from(e: MihrabCliError) -> Self {
        match e {
            MihrabCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MihrabCliError::Mihrab(e) => {
                let code = match &e {
                    MihrabError::RequestTimedOut => "TIMEOUT",
                    MihrabError::Provider(_) => "PROVIDER_ERROR",
                    MihrabError::Config(_) => "CONFIG_ERROR",
                    MihrabError::InvalidCoordinate { .. } => "INVALID_COORDINATE",
                    MihrabError::InvalidTime(_) | MihrabError::InvalidSchedule(_) => {
                        "INVALID_INPUT"
                    }
                    _ => "ERROR",
                };
                let hint = match &e {
                    MihrabError::Config(_) => Some("Run 'mihrab config' to see valid fields"),
                    MihrabError::InvalidSchedule(_) => {
                        Some("Schedule times must be HH:MM and increase from Fajr to Isha")
                    }
                    other => other.hint(),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            MihrabCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            MihrabCliError::Input(message) => CliError {
                code: "INPUT_ERROR".to_string(),
                message,
                hint: Some("Pass --schedule as JSON, a file path, or pipe it in".to_string()),
            },
            MihrabCliError::Engine { message, hint } => CliError {
                code: "ENGINE_ERROR".to_string(),
                message,
                hint,
            },
        }
    }
}

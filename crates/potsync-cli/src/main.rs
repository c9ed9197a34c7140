//! Potsync CLI
//!
//! Thin wrapper around potsync-core for command-line usage. Records live in
//! a local JSON log file that stands in for the relay; every command runs
//! the same validate/reconcile/sign/publish path the engine uses against a
//! network relay.
//!
//! ## Usage
//!
//! ```bash
//! # Show identity and log info
//! potsync info
//!
//! # Create a plant pot (generates and escrows a device keypair)
//! potsync pot create tomato-1 --name "Balcony Tomato"
//!
//! # List current pots
//! potsync pot list
//!
//! # Show one pot with its queue
//! potsync pot show tomato-1
//!
//! # Queue a 30-second watering
//! potsync task add tomato-1 30
//!
//! # Complete the front task (as the device would)
//! potsync task complete tomato-1
//!
//! # Show completion logs
//! potsync log list tomato-1
//!
//! # Export the device secret
//! potsync pot secret tomato-1
//!
//! # Delete a pot (publishes a tombstone)
//! potsync pot delete tomato-1
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use potsync_core::{
    format_duration, LocalSigner, MemoryRelay, PlantPot, PotEngine, PublicId, Record, Signer,
    WaterTask,
};

/// Potsync - Plant Pot Watering Queues
#[derive(Parser)]
#[command(name = "potsync")]
#[command(version = "0.1.0")]
#[command(about = "Potsync - Plant Pot Watering Queues")]
#[command(
    long_about = "Manage plant-pot watering queues stored as signed records in a local log file, \
                  using the same reconciliation engine that syncs against a relay."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.potsync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show identity and record log information
    Info,

    /// Plant pot management
    Pot {
        #[command(subcommand)]
        action: PotAction,
    },

    /// Task queue management
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Watering log inspection
    Log {
        #[command(subcommand)]
        action: LogAction,
    },

    /// Weather station lookups
    Weather {
        #[command(subcommand)]
        action: WeatherAction,
    },
}

#[derive(Subcommand)]
enum PotAction {
    /// Create a new plant pot with a fresh device keypair
    Create {
        /// Unique identifier, e.g. tomato-1
        identifier: String,
        /// Optional display name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List all current pots
    List,
    /// Show one pot with its task queue
    Show {
        /// Pot identifier
        identifier: String,
    },
    /// Rename a pot
    Rename {
        /// Pot identifier
        identifier: String,
        /// New display name
        name: String,
    },
    /// Assign a weather station to a pot
    Station {
        /// Pot identifier
        identifier: String,
        /// Station identity (hex), or omit to clear
        station: Option<String>,
    },
    /// Decrypt and print the device secret
    Secret {
        /// Pot identifier
        identifier: String,
    },
    /// Delete a pot (publishes a tombstone)
    Delete {
        /// Pot identifier
        identifier: String,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Queue a watering task
    Add {
        /// Pot identifier
        identifier: String,
        /// Watering duration in seconds
        seconds: u64,
    },
    /// List the queued tasks of a pot
    List {
        /// Pot identifier
        identifier: String,
    },
    /// Remove a queued task by position (0 = front)
    Remove {
        /// Pot identifier
        identifier: String,
        /// Task position
        index: usize,
    },
    /// Complete the front task, as the device would
    Complete {
        /// Pot identifier
        identifier: String,
    },
}

#[derive(Subcommand)]
enum LogAction {
    /// List completion logs of a pot, newest first
    List {
        /// Pot identifier
        identifier: String,
    },
}

#[derive(Subcommand)]
enum WeatherAction {
    /// List known weather stations
    Stations,
    /// Show the latest reading of a station
    Reading {
        /// Station identity (hex)
        station: String,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.potsync)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".potsync")
}

/// Load the owner signer from the key file, generating one on first use.
fn load_identity(data_dir: &PathBuf) -> Result<LocalSigner> {
    let key_path = data_dir.join("identity.key");
    if key_path.exists() {
        let hex_secret = fs::read_to_string(&key_path)
            .with_context(|| format!("reading {}", key_path.display()))?;
        LocalSigner::from_secret_hex(hex_secret.trim())
            .with_context(|| format!("parsing {}", key_path.display()))
    } else {
        let signer = LocalSigner::generate();
        fs::write(&key_path, signer.secret_hex())
            .with_context(|| format!("writing {}", key_path.display()))?;
        println!("Generated new identity: {}", signer.public_id());
        Ok(signer)
    }
}

/// Load the record log file into an in-memory relay.
fn load_relay(data_dir: &PathBuf) -> Result<MemoryRelay> {
    let log_path = data_dir.join("records.json");
    let relay = MemoryRelay::new();
    if log_path.exists() {
        let data = fs::read_to_string(&log_path)
            .with_context(|| format!("reading {}", log_path.display()))?;
        let records: Vec<Record> = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", log_path.display()))?;
        let total = records.len();
        let accepted = relay.seed(records);
        if accepted < total {
            eprintln!(
                "Warning: dropped {} record(s) with invalid signatures",
                total - accepted
            );
        }
    }
    Ok(relay)
}

/// Persist the relay contents back to the record log file.
fn save_relay(data_dir: &PathBuf, relay: &MemoryRelay) -> Result<()> {
    let log_path = data_dir.join("records.json");
    let data = serde_json::to_string_pretty(&relay.snapshot())?;
    fs::write(&log_path, data).with_context(|| format!("writing {}", log_path.display()))?;
    Ok(())
}

fn parse_station_id(s: &str) -> Result<PublicId> {
    PublicId::parse(s).map_err(|e| anyhow::anyhow!("Invalid station identity '{}': {}", s, e))
}

fn print_pot(pot: &PlantPot) {
    match &pot.name {
        Some(name) => println!("{} ({})", pot.identifier, name),
        None => println!("{}", pot.identifier),
    }
    println!("  device: {}", pot.device());
    if let Some(station) = &pot.weather_station {
        println!("  weather station: {}", station);
    }
    if pot.tasks.is_empty() {
        println!("  no queued tasks");
    } else {
        println!("  queued tasks:");
        for (i, task) in pot.tasks.iter().enumerate() {
            let duration = task
                .duration_seconds()
                .map(format_duration)
                .unwrap_or_else(|| format!("{}?", task.duration));
            println!("    [{}] {} for {}", i, task.task_type, duration);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let signer = Arc::new(load_identity(&data_dir)?);
    let relay = Arc::new(load_relay(&data_dir)?);
    let engine = PotEngine::new(relay.clone(), signer);
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Info => {
            println!("Potsync v0.1.0");
            println!();
            println!("Identity: {}", engine.owner());
            println!("Data directory: {}", data_dir.display());
            println!("Record log: {} record(s)", relay.len());
            let pots = engine.list_pots(&cancel).await?;
            println!("Current pots: {}", pots.len());
        }

        Commands::Pot { action } => match action {
            PotAction::Create { identifier, name } => {
                let pot = engine
                    .create_pot(&identifier, name.as_deref(), &cancel)
                    .await?;
                save_relay(&data_dir, &relay)?;
                println!("Created plant pot:");
                print_pot(&pot);
            }

            PotAction::List => {
                let pots = engine.list_pots(&cancel).await?;
                if pots.is_empty() {
                    println!("No plant pots. Create one with: potsync pot create <identifier>");
                } else {
                    for pot in &pots {
                        print_pot(pot);
                    }
                }
            }

            PotAction::Show { identifier } => match engine.get_pot(&identifier, &cancel).await? {
                Some(pot) => {
                    print_pot(&pot);
                    println!("  address: {}", pot.owner_coordinate());
                }
                None => anyhow::bail!("Plant pot '{}' not found", identifier),
            },

            PotAction::Rename { identifier, name } => {
                let pot = engine.set_name(&identifier, Some(&name), &cancel).await?;
                save_relay(&data_dir, &relay)?;
                println!("Renamed:");
                print_pot(&pot);
            }

            PotAction::Station {
                identifier,
                station,
            } => {
                let station_id = station.as_deref().map(parse_station_id).transpose()?;
                let pot = engine
                    .set_weather_station(&identifier, station_id.as_ref(), &cancel)
                    .await?;
                save_relay(&data_dir, &relay)?;
                print_pot(&pot);
            }

            PotAction::Secret { identifier } => {
                let export = engine.device_secret(&identifier, &cancel).await?;
                println!("Device secret for '{}':", identifier);
                println!("  hex:  {}", export.hex);
                println!("  nsec: {}", export.bech32);
            }

            PotAction::Delete { identifier } => {
                engine.delete_pot(&identifier, &cancel).await?;
                save_relay(&data_dir, &relay)?;
                println!("Deleted plant pot '{}'", identifier);
            }
        },

        Commands::Task { action } => match action {
            TaskAction::Add {
                identifier,
                seconds,
            } => {
                if seconds == 0 {
                    anyhow::bail!("Watering duration must be at least 1 second");
                }
                let pot = engine
                    .add_task(&identifier, WaterTask::water(seconds), &cancel)
                    .await?;
                save_relay(&data_dir, &relay)?;
                println!("Queued watering for {}:", format_duration(seconds));
                print_pot(&pot);
            }

            TaskAction::List { identifier } => {
                match engine.get_pot(&identifier, &cancel).await? {
                    Some(pot) => print_pot(&pot),
                    None => anyhow::bail!("Plant pot '{}' not found", identifier),
                }
            }

            TaskAction::Remove { identifier, index } => {
                let pot = engine.remove_task(&identifier, index, &cancel).await?;
                save_relay(&data_dir, &relay)?;
                println!("Removed task {}:", index);
                print_pot(&pot);
            }

            TaskAction::Complete { identifier } => {
                let (log, pot) = engine.complete_task(&identifier, &cancel).await?;
                save_relay(&data_dir, &relay)?;
                for task in &log.tasks {
                    let duration = task
                        .duration_seconds()
                        .map(format_duration)
                        .unwrap_or_else(|| format!("{}?", task.duration));
                    println!("Completed: {} for {}", task.task_type, duration);
                }
                print_pot(&pot);
            }
        },

        Commands::Log { action } => match action {
            LogAction::List { identifier } => {
                let logs = engine.list_logs(&identifier, &cancel).await?;
                if logs.is_empty() {
                    println!("No completion logs for '{}'", identifier);
                } else {
                    for log in &logs {
                        for task in &log.tasks {
                            let duration = task
                                .duration_seconds()
                                .map(format_duration)
                                .unwrap_or_else(|| format!("{}?", task.duration));
                            println!(
                                "{}  {} for {}",
                                log.record.created_at, task.task_type, duration
                            );
                        }
                    }
                }
            }
        },

        Commands::Weather { action } => match action {
            WeatherAction::Stations => {
                let stations = engine.weather_stations(&cancel).await?;
                if stations.is_empty() {
                    println!("No weather stations in the record log");
                } else {
                    for station in &stations {
                        println!("{}  {}", station.station_id(), station.name);
                        if let Some(description) = &station.description {
                            println!("  {}", description);
                        }
                        if let Some(geohash) = &station.geohash {
                            println!("  geohash: {}", geohash);
                        }
                    }
                }
            }

            WeatherAction::Reading { station } => {
                let station_id = parse_station_id(&station)?;
                match engine.latest_reading(&station_id, &cancel).await? {
                    Some(reading) => {
                        if let Some(temp) = reading.temperature() {
                            println!("Temperature: {}°C", temp);
                        }
                        if let Some(humidity) = reading.humidity() {
                            println!("Humidity: {}%", humidity);
                        }
                        println!("As of: {}", reading.record.created_at);
                    }
                    None => println!("No readings from station {}", station_id),
                }
            }
        },
    }

    Ok(())
}

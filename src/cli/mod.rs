//! Command-line surface for fleetshare.

mod devices;
mod score;
mod weather;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use fleetshare::Config;

#[derive(Parser, Debug)]
#[command(name = "fleetshare", version, about = "Car-sharing fleet backend tools")]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.fleetshare/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Allocate simulated vehicle devices
    Allocate {
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,
    },
    /// Return a reserved device to the free pool
    Release { device_id: String },
    /// Remove a device from every pool and unregister it
    Delete {
        device_id: String,
        /// Delete even if the device is reserved
        #[arg(long)]
        force: bool,
    },
    /// List the device roster
    Devices,
    /// Fetch a weather payload (cached until it expires)
    Weather {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long, default_value = fleetshare::weather::OBSERVATIONS_API)]
        api: String,
    },
    /// Recommend today's hourly rate from the forecast
    Rate {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
    },
    /// Score trips from a JSON file holding one trip or an array of trips
    Score { file: PathBuf },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from_path(path)?,
        None => return Ok(Config::load()?),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Dispatch a parsed command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Allocate { count } => devices::cmd_allocate(&config, count).await,
        Command::Release { device_id } => devices::cmd_release(&config, &device_id).await,
        Command::Delete { device_id, force } => {
            devices::cmd_delete(&config, &device_id, force).await
        }
        Command::Devices => devices::cmd_devices(&config).await,
        Command::Weather { lat, lng, api } => weather::cmd_weather(&config, &api, lat, lng).await,
        Command::Rate { lat, lng } => weather::cmd_rate(&config, lat, lng).await,
        Command::Score { file } => score::cmd_score(&file),
    }
}

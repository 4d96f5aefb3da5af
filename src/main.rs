//! caravanes CLI - builds the itinerary map artifacts.

use anyhow::{Context, Result};
use caravanes::logging;
use caravanes::{CaravaneConfig, Pipeline, Resolution};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// Geocode travelling-show itineraries and merge them into a map topology.
#[derive(Parser)]
#[command(name = "caravanes", version, long_about = None)]
struct Cli {
    /// Configuration file (defaults to caravanes.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format, overriding logging.format.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Build every out-of-date artifact.
    Build {
        /// Ignore cached lookups and up-to-date records.
        #[arg(long)]
        force: bool,
    },

    /// List the unique towns referenced by the itineraries.
    Towns,

    /// Geocode a single town and print its feature.
    Geocode {
        town: String,

        /// Query the service even when the town is cached.
        #[arg(long)]
        force: bool,
    },

    /// Remove build artifacts. Cached lookups are kept.
    Clean,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = CaravaneConfig::load_from_path(cli.config.clone())
        .context("Failed to load configuration")?;
    if let Some(format) = &cli.log_format {
        config.logging.format = match format {
            LogFormat::Text => "text".to_string(),
            LogFormat::Json => "json".to_string(),
        };
    }
    logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Build { force } => cmd_build(config, force).await,
        Command::Towns => cmd_towns(config).await,
        Command::Geocode { town, force } => cmd_geocode(config, &town, force).await,
        Command::Clean => cmd_clean(config).await,
    }
}

async fn cmd_build(config: CaravaneConfig, force: bool) -> Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, force)?;
    let report = pipeline.run().await.map_err(|e| {
        error!("{}", e);
        anyhow::anyhow!(e.user_message())
    })?;

    print!("{report}");
    if report.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_towns(config: CaravaneConfig) -> Result<ExitCode> {
    let itineraries = caravanes::ItinerarySet::load(&config.paths.itineraries)
        .await
        .with_context(|| format!("Failed to read {}", config.paths.itineraries.display()))?;
    for town in itineraries.town_set() {
        println!("{town}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_geocode(config: CaravaneConfig, town: &str, force: bool) -> Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, force)?;
    let (geocoded, resolution) = match pipeline.resolver().resolve(town).await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e.user_message());
            return Ok(ExitCode::FAILURE);
        }
    };
    pipeline.resolver().persist().await?;

    let source = match resolution {
        Resolution::Cached => "cache",
        Resolution::Fetched => "service",
    };
    match geocoded.coordinates() {
        Some((lon, lat)) => eprintln!(
            "{} -> {} at {lon:.5}, {lat:.5} (from {source})",
            town,
            geocoded.label().unwrap_or("?")
        ),
        None => eprintln!(
            "{} -> {} (from {source})",
            town,
            geocoded.label().unwrap_or("?")
        ),
    }
    println!("{}", serde_json::to_string_pretty(&geocoded.feature)?);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_clean(config: CaravaneConfig) -> Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, false)?;
    for path in pipeline.clean().await? {
        println!("removed {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

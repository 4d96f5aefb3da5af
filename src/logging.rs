//! Tracing subscriber setup for the binary

use crate::config::LoggingConfig;
use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directive for the configured level raised by `verbose` steps
#[must_use]
pub fn filter_directive(level: &str, verbose: u8) -> String {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    format!("caravanes={level}")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `config`.
pub fn init(config: &LoggingConfig, verbose: u8) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level, verbose)));

    let installed = match config.format.as_str() {
        "json" => fmt().json().with_env_filter(env_filter).try_init(),
        _ => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}

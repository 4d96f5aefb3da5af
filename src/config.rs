//! Configuration management for the caravanes pipeline
//!
//! Handles loading configuration from an optional TOML file and environment
//! variables, and validates every setting before the pipeline starts.

use crate::CaravaneError;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CaravaneConfig {
    /// Geocoding service settings
    pub geocoding: GeocodingConfig,
    /// Input and output locations
    pub paths: PathsConfig,
    /// Boundary filter settings
    pub boundaries: BoundaryConfig,
    /// External topology tools
    pub tools: ToolsConfig,
    /// Geocoding cache settings
    pub cache: CacheConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Geocoding service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// Base URL of the address search API
    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_geocoding_timeout")]
    pub timeout_seconds: u32,
    /// Maximum number of retries for transient failures
    #[serde(default = "default_geocoding_max_retries")]
    pub max_retries: u32,
    /// Maximum number of lookups in flight
    #[serde(default = "default_geocoding_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Itinerary definitions (`caravanes.json`)
    #[serde(default = "default_itineraries_path")]
    pub itineraries: PathBuf,
    /// Raw national boundary collection
    #[serde(default = "default_boundaries_path")]
    pub boundaries: PathBuf,
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
    /// Persistent store for geocoded towns and target state
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Region codes dropped from the boundary collection
    #[serde(default = "default_excluded_codes")]
    pub excluded_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directory prepended to `PATH` when spawning tools
    #[serde(default = "default_tools_bin_dir")]
    pub bin_dir: PathBuf,
    #[serde(default = "default_geo2topo")]
    pub geo2topo: String,
    #[serde(default = "default_topomerge")]
    pub topomerge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Geocoded entry TTL in hours, 0 keeps entries forever
    #[serde(default)]
    pub ttl_hours: u32,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_geocoding_base_url() -> String {
    "https://api-adresse.data.gouv.fr".to_string()
}

fn default_geocoding_timeout() -> u32 {
    30
}

fn default_geocoding_max_retries() -> u32 {
    3
}

fn default_geocoding_concurrency() -> usize {
    4
}

fn default_itineraries_path() -> PathBuf {
    PathBuf::from("caravanes.json")
}

fn default_boundaries_path() -> PathBuf {
    PathBuf::from("raw/departements.geojson")
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".caravanes/cache")
}

fn default_excluded_codes() -> Vec<String> {
    vec!["2A".to_string(), "2B".to_string()]
}

fn default_tools_bin_dir() -> PathBuf {
    PathBuf::from("node_modules/.bin")
}

fn default_geo2topo() -> String {
    "geo2topo".to_string()
}

fn default_topomerge() -> String {
    "topomerge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoding_base_url(),
            timeout_seconds: default_geocoding_timeout(),
            max_retries: default_geocoding_max_retries(),
            concurrency: default_geocoding_concurrency(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            itineraries: default_itineraries_path(),
            boundaries: default_boundaries_path(),
            build_dir: default_build_dir(),
            dist_dir: default_dist_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            excluded_codes: default_excluded_codes(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bin_dir: default_tools_bin_dir(),
            geo2topo: default_geo2topo(),
            topomerge: default_topomerge(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl GeocodingConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.into())
    }
}

impl CacheConfig {
    /// Entry lifetime, `None` when entries never expire
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_hours > 0).then(|| Duration::from_secs(u64::from(self.ttl_hours) * 60 * 60))
    }
}

impl CaravaneConfig {
    /// Load configuration from `config_path` (or `caravanes.toml`) and environment variables
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path.unwrap_or_else(Self::get_config_path);

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // CARAVANES_GEOCODING__MAX_RETRIES=5 overrides geocoding.max_retries
        builder = builder.add_source(
            Environment::with_prefix("CARAVANES")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("boundaries.excluded_codes")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let config: CaravaneConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> PathBuf {
        PathBuf::from("caravanes.toml")
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        self.validate_paths()?;
        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.geocoding.timeout_seconds == 0 || self.geocoding.timeout_seconds > 300 {
            return Err(CaravaneError::config(
                "Geocoding timeout must be between 1 and 300 seconds",
            )
            .into());
        }

        if self.geocoding.max_retries > 10 {
            return Err(CaravaneError::config("Geocoding max retries cannot exceed 10").into());
        }

        if !(1..=64).contains(&self.geocoding.concurrency) {
            return Err(
                CaravaneError::config("Geocoding concurrency must be between 1 and 64").into(),
            );
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(CaravaneError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["text", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(CaravaneError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        if !self.geocoding.base_url.starts_with("http://")
            && !self.geocoding.base_url.starts_with("https://")
        {
            return Err(CaravaneError::config(
                "Geocoding base URL must be a valid HTTP or HTTPS URL",
            )
            .into());
        }

        if self.tools.geo2topo.is_empty() || self.tools.topomerge.is_empty() {
            return Err(CaravaneError::config("Topology tool names cannot be empty").into());
        }

        Ok(())
    }

    fn validate_paths(&self) -> Result<()> {
        let paths = [
            ("paths.itineraries", &self.paths.itineraries),
            ("paths.boundaries", &self.paths.boundaries),
            ("paths.build_dir", &self.paths.build_dir),
            ("paths.dist_dir", &self.paths.dist_dir),
            ("paths.cache_dir", &self.paths.cache_dir),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(CaravaneError::config(format!("{name} cannot be empty")).into());
            }
        }
        Ok(())
    }
}

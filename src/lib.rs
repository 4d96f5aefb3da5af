//! `caravanes` - Geocoded travelling-show itineraries on a map of France
//!
//! This library geocodes the towns of each itinerary, writes one GeoJSON
//! feature collection per itinerary, filters the national boundaries and
//! merges everything into a single TopoJSON topology.

pub mod boundaries;
pub mod cache;
pub mod config;
pub mod error;
pub mod feature_builder;
pub mod geocoder;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod targets;
pub mod topology;

// Re-export core types for public API
pub use cache::PersistentCache;
pub use config::CaravaneConfig;
pub use error::CaravaneError;
pub use geocoder::{AddressApiClient, Geocoder};
pub use models::{GeocodedTown, Itinerary, ItinerarySet, Stop};
pub use pipeline::{BuildReport, Pipeline, TargetOutcome, TargetReport};
pub use resolver::{Resolution, TownResolver};
pub use topology::{TopojsonCli, TopologyLayer, TopologyMerger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, CaravaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}

//! Town Resolution Module
//!
//! Puts the persistent cache in front of a [`Geocoder`] so that each town is
//! looked up at most once: later builds read the stored feature instead of
//! issuing a request. Failures are never cached.

use crate::cache::PersistentCache;
use crate::geocoder::Geocoder;
use crate::models::{CachedTown, GeocodedTown};
use crate::{CaravaneError, Result};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a resolved feature came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Cached,
    Fetched,
}

/// Per-town outcome of [`TownResolver::resolve_all`]
#[derive(Debug, Default)]
pub struct ResolvedTowns {
    pub features: BTreeMap<String, GeocodedTown>,
    pub failures: BTreeMap<String, CaravaneError>,
    pub from_cache: usize,
    pub fetched: usize,
}

impl ResolvedTowns {
    #[must_use]
    pub fn feature(&self, town: &str) -> Option<&GeocodedTown> {
        self.features.get(town)
    }

    #[must_use]
    pub fn failure(&self, town: &str) -> Option<&CaravaneError> {
        self.failures.get(town)
    }
}

/// Service resolving town names through the cache, then the geocoder
pub struct TownResolver {
    geocoder: Arc<dyn Geocoder>,
    cache: PersistentCache,
    ttl: Option<Duration>,
    concurrency: usize,
    force: bool,
}

impl TownResolver {
    #[must_use]
    pub fn new(geocoder: Arc<dyn Geocoder>, cache: PersistentCache) -> Self {
        Self {
            geocoder,
            cache,
            ttl: None,
            concurrency: 4,
            force: false,
        }
    }

    /// Expire cached features after `ttl`
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Maximum lookups in flight
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ignore cached features and look every town up again
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Resolve one town, reading the cache first
    pub async fn resolve(&self, town: &str) -> Result<(GeocodedTown, Resolution)> {
        let key = GeocodedTown::cache_key(town);

        if !self.force {
            match self.cache.get::<CachedTown>(&key).await {
                Ok(Some(cached)) => match GeocodedTown::from_cached(cached) {
                    Ok(geocoded) => {
                        debug!("Using cached feature for '{}'", town);
                        return Ok((geocoded, Resolution::Cached));
                    }
                    Err(e) => warn!("Discarding cached feature for '{}': {}", town, e),
                },
                Ok(None) => {}
                Err(e) => warn!("Cache read failed for '{}', geocoding again: {}", town, e),
            }
        }

        let geocoded = self.geocoder.geocode(town).await?;
        self.cache.put(&key, geocoded.to_cached()?, self.ttl).await?;
        Ok((geocoded, Resolution::Fetched))
    }

    /// Resolve a deduplicated town set with bounded concurrency.
    ///
    /// A failing town never prevents the others from resolving.
    pub async fn resolve_all(&self, towns: &BTreeSet<String>) -> ResolvedTowns {
        info!(
            "Resolving {} towns ({} lookups in flight)",
            towns.len(),
            self.concurrency
        );

        let outcomes: Vec<(String, Result<(GeocodedTown, Resolution)>)> = stream::iter(towns)
            .map(|town| async move { (town.clone(), self.resolve(town).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut resolved = ResolvedTowns::default();
        for (town, outcome) in outcomes {
            match outcome {
                Ok((geocoded, Resolution::Cached)) => {
                    resolved.from_cache += 1;
                    resolved.features.insert(town, geocoded);
                }
                Ok((geocoded, Resolution::Fetched)) => {
                    resolved.fetched += 1;
                    resolved.features.insert(town, geocoded);
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("Failed to geocode '{}', a later build may succeed: {}", town, e);
                    } else {
                        warn!("Failed to geocode '{}': {}", town, e);
                    }
                    resolved.failures.insert(town, e);
                }
            }
        }

        if let Err(e) = self.cache.persist().await {
            warn!("Failed to flush geocoding cache: {}", e);
        }

        info!(
            "Resolved {} towns ({} cached, {} fetched, {} failed)",
            resolved.features.len(),
            resolved.from_cache,
            resolved.fetched,
            resolved.failures.len()
        );
        resolved
    }

    /// Flush stored features to disk
    pub async fn persist(&self) -> Result<()> {
        self.cache.persist().await
    }
}

//! Build pipeline
//!
//! Wires the components into a dependency-driven build:
//!
//! 1. load itineraries and extract the unique town set
//! 2. resolve every town (cache first, then the geocoding service)
//! 3. build one feature collection per itinerary, concurrently
//! 4. filter the boundary collection, concurrently with 2 and 3
//! 5. merge everything into the topology once all of its inputs succeeded
//!
//! A failing target only fails the targets that depend on it.

use crate::boundaries::filter_boundaries_str;
use crate::cache::PersistentCache;
use crate::config::CaravaneConfig;
use crate::feature_builder::{build_collection, to_geojson_string};
use crate::geocoder::{AddressApiClient, Geocoder};
use crate::models::{Itinerary, ItinerarySet};
use crate::resolver::{ResolvedTowns, TownResolver};
use crate::targets::{InputDigest, TargetState, write_artifact};
use crate::topology::{TopojsonCli, TopologyLayer, TopologyMerger};
use crate::{CaravaneError, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

pub const BOUNDARY_TARGET: &str = "hexagone";
pub const TOPOLOGY_TARGET: &str = "topology";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Built,
    UpToDate,
    Failed(String),
    /// Not attempted because a dependency failed
    Skipped(String),
}

impl TargetOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, TargetOutcome::Built | TargetOutcome::UpToDate)
    }
}

#[derive(Debug, Clone)]
pub struct TargetReport {
    pub name: String,
    pub path: PathBuf,
    pub outcome: TargetOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct GeocodingSummary {
    pub towns: usize,
    pub from_cache: usize,
    pub fetched: usize,
    /// Town name to failure reason
    pub failed: BTreeMap<String, String>,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub geocoding: GeocodingSummary,
    pub targets: Vec<TargetReport>,
}

impl BuildReport {
    /// True when every target was built or already up to date
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.targets.iter().all(|t| t.outcome.is_success())
    }

    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.name == name)
    }

    #[must_use]
    pub fn count(&self, outcome: fn(&TargetOutcome) -> bool) -> usize {
        self.targets.iter().filter(|t| outcome(&t.outcome)).count()
    }
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Geocoding: {} towns ({} cached, {} fetched, {} failed)",
            self.geocoding.towns,
            self.geocoding.from_cache,
            self.geocoding.fetched,
            self.geocoding.failed.len()
        )?;
        for (town, reason) in &self.geocoding.failed {
            writeln!(f, "   ✗ {town}: {reason}")?;
        }
        for target in &self.targets {
            match &target.outcome {
                TargetOutcome::Built => writeln!(f, "   ✓ {} -> {}", target.name, target.path.display())?,
                TargetOutcome::UpToDate => writeln!(f, "   - {} (up to date)", target.name)?,
                TargetOutcome::Failed(reason) => writeln!(f, "   ✗ {} failed: {reason}", target.name)?,
                TargetOutcome::Skipped(reason) => {
                    writeln!(f, "   ⏭ {} skipped: {reason}", target.name)?
                }
            }
        }
        Ok(())
    }
}

/// The caravanes build graph
pub struct Pipeline {
    config: CaravaneConfig,
    resolver: TownResolver,
    merger: Arc<dyn TopologyMerger>,
    targets: TargetState,
}

impl Pipeline {
    /// Pipeline backed by the address API and the topojson tools
    pub fn from_config(config: CaravaneConfig, force: bool) -> Result<Self> {
        let geocoder = Arc::new(AddressApiClient::new(&config.geocoding)?);
        let merger = Arc::new(TopojsonCli::new(&config.tools));
        Self::new(config, geocoder, merger, force)
    }

    pub fn new(
        config: CaravaneConfig,
        geocoder: Arc<dyn Geocoder>,
        merger: Arc<dyn TopologyMerger>,
        force: bool,
    ) -> Result<Self> {
        let cache = PersistentCache::open(&config.paths.cache_dir)?;
        let resolver = TownResolver::new(geocoder, cache.clone())
            .with_ttl(config.cache.ttl())
            .with_concurrency(config.geocoding.concurrency)
            .with_force(force);
        let targets = TargetState::new(cache).with_force(force);
        Ok(Self {
            config,
            resolver,
            merger,
            targets,
        })
    }

    #[must_use]
    pub fn resolver(&self) -> &TownResolver {
        &self.resolver
    }

    pub async fn load_itineraries(&self) -> Result<ItinerarySet> {
        ItinerarySet::load(&self.config.paths.itineraries).await
    }

    fn itinerary_path(&self, itinerary: &Itinerary) -> PathBuf {
        self.config.paths.build_dir.join(itinerary.file_name())
    }

    fn boundary_path(&self) -> PathBuf {
        self.config
            .paths
            .build_dir
            .join(format!("{BOUNDARY_TARGET}.geojson"))
    }

    fn topology_path(&self) -> PathBuf {
        self.config
            .paths
            .dist_dir
            .join(format!("{TOPOLOGY_TARGET}.json"))
    }

    /// Run the whole build.
    ///
    /// Returns `Err` only when nothing can be attempted (unreadable or
    /// malformed itineraries); every other failure is reported per target.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<BuildReport> {
        let start_time = Instant::now();
        let itineraries = self.load_itineraries().await?;
        info!(
            "Loaded {} itineraries from {}",
            itineraries.len(),
            self.config.paths.itineraries.display()
        );

        let itinerary_builds = async {
            let towns = itineraries.town_set();
            let resolved = self.resolver.resolve_all(&towns).await;
            let reports = join_all(
                itineraries
                    .iter()
                    .map(|itinerary| self.build_itinerary(itinerary, &resolved)),
            )
            .await;
            (resolved, reports)
        };
        let ((resolved, mut targets), boundary) =
            tokio::join!(itinerary_builds, self.build_boundaries());

        let topology = self.build_topology(&itineraries, &targets, &boundary).await;
        targets.push(boundary);
        targets.push(topology);

        if let Err(e) = self.targets.persist().await {
            warn!("Failed to flush target state: {}", e);
        }

        let report = BuildReport {
            geocoding: GeocodingSummary {
                towns: resolved.features.len() + resolved.failures.len(),
                from_cache: resolved.from_cache,
                fetched: resolved.fetched,
                failed: resolved
                    .failures
                    .iter()
                    .map(|(town, e)| (town.clone(), e.to_string()))
                    .collect(),
            },
            targets,
        };

        info!(
            "Build finished in {:.3}s: {} built, {} up to date, {} failed, {} skipped",
            start_time.elapsed().as_secs_f64(),
            report.count(|o| matches!(o, TargetOutcome::Built)),
            report.count(|o| matches!(o, TargetOutcome::UpToDate)),
            report.count(|o| matches!(o, TargetOutcome::Failed(_))),
            report.count(|o| matches!(o, TargetOutcome::Skipped(_)))
        );
        Ok(report)
    }

    async fn build_itinerary(&self, itinerary: &Itinerary, resolved: &ResolvedTowns) -> TargetReport {
        let name = itinerary.target_name();
        let path = self.itinerary_path(itinerary);
        let outcome = match self.try_build_itinerary(itinerary, resolved, &path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = match &e {
                    CaravaneError::UnresolvedTown { town, .. } => match resolved.failure(town) {
                        Some(cause) => format!("{e} ({cause})"),
                        None => e.to_string(),
                    },
                    _ => e.to_string(),
                };
                error!("{} failed: {}", name, reason);
                TargetOutcome::Failed(reason)
            }
        };
        TargetReport {
            name,
            path,
            outcome,
        }
    }

    async fn try_build_itinerary(
        &self,
        itinerary: &Itinerary,
        resolved: &ResolvedTowns,
        path: &Path,
    ) -> Result<TargetOutcome> {
        let collection = build_collection(itinerary, &resolved.features)?;

        let mut digest = InputDigest::new()
            .input("itinerary", itinerary.name.as_bytes())
            .input("stops", &serde_json::to_vec(&itinerary.stops)?);
        for town in itinerary.towns() {
            if let Some(geocoded) = resolved.feature(town) {
                digest = digest.input(town, &serde_json::to_vec(&geocoded.feature)?);
            }
        }
        let inputs_digest = digest.finish();

        let target = itinerary.target_name();
        if self.targets.is_up_to_date(&target, &inputs_digest, path).await? {
            info!("{} is up to date", target);
            return Ok(TargetOutcome::UpToDate);
        }

        let content = to_geojson_string(&collection)?;
        write_artifact(path, content.as_bytes()).await?;
        self.targets
            .record(&target, &inputs_digest, content.as_bytes())
            .await?;
        info!(
            "Wrote {} stops of {} to {}",
            collection.features.len(),
            itinerary.name,
            path.display()
        );
        Ok(TargetOutcome::Built)
    }

    async fn build_boundaries(&self) -> TargetReport {
        let path = self.boundary_path();
        let outcome = match self.try_build_boundaries(&path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} failed: {}", BOUNDARY_TARGET, e);
                TargetOutcome::Failed(e.to_string())
            }
        };
        TargetReport {
            name: BOUNDARY_TARGET.to_string(),
            path,
            outcome,
        }
    }

    async fn try_build_boundaries(&self, path: &Path) -> Result<TargetOutcome> {
        let source = &self.config.paths.boundaries;
        let raw = tokio::fs::read(source).await.map_err(|e| {
            CaravaneError::malformed(format!("cannot read {}: {e}", source.display()))
        })?;

        let excluded = &self.config.boundaries.excluded_codes;
        let inputs_digest = InputDigest::new()
            .input("boundaries", &raw)
            .input("excluded_codes", excluded.join(",").as_bytes())
            .finish();

        if self
            .targets
            .is_up_to_date(BOUNDARY_TARGET, &inputs_digest, path)
            .await?
        {
            info!("{} is up to date", BOUNDARY_TARGET);
            return Ok(TargetOutcome::UpToDate);
        }

        let raw = String::from_utf8(raw).map_err(|e| {
            CaravaneError::malformed(format!("{} is not UTF-8: {e}", source.display()))
        })?;
        let content = filter_boundaries_str(&raw, excluded)?;
        write_artifact(path, content.as_bytes()).await?;
        self.targets
            .record(BOUNDARY_TARGET, &inputs_digest, content.as_bytes())
            .await?;
        info!("Wrote filtered boundaries to {}", path.display());
        Ok(TargetOutcome::Built)
    }

    async fn build_topology(
        &self,
        itineraries: &ItinerarySet,
        itinerary_reports: &[TargetReport],
        boundary: &TargetReport,
    ) -> TargetReport {
        let path = self.topology_path();
        let failed: Vec<&str> = itinerary_reports
            .iter()
            .chain(std::iter::once(boundary))
            .filter(|t| !t.outcome.is_success())
            .map(|t| t.name.as_str())
            .collect();

        let outcome = if failed.is_empty() {
            match self.try_build_topology(itineraries, &path).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{} failed: {}", TOPOLOGY_TARGET, e);
                    TargetOutcome::Failed(e.to_string())
                }
            }
        } else {
            let reason = format!("dependencies failed: {}", failed.join(", "));
            warn!("Skipping {}: {}", TOPOLOGY_TARGET, reason);
            TargetOutcome::Skipped(reason)
        };

        TargetReport {
            name: TOPOLOGY_TARGET.to_string(),
            path,
            outcome,
        }
    }

    async fn try_build_topology(&self, itineraries: &ItinerarySet, path: &Path) -> Result<TargetOutcome> {
        let boundaries = self.boundary_path();
        let layers: Vec<TopologyLayer> = itineraries
            .iter()
            .map(|itinerary| TopologyLayer::new(&itinerary.name, self.itinerary_path(itinerary)))
            .collect();

        let mut digest = InputDigest::new().input(BOUNDARY_TARGET, &tokio::fs::read(&boundaries).await?);
        for layer in &layers {
            digest = digest.input(&layer.tag, &tokio::fs::read(&layer.path).await?);
        }
        let inputs_digest = digest.finish();

        if self
            .targets
            .is_up_to_date(TOPOLOGY_TARGET, &inputs_digest, path)
            .await?
        {
            info!("{} is up to date", TOPOLOGY_TARGET);
            return Ok(TargetOutcome::UpToDate);
        }

        self.merger.merge(&boundaries, &layers, path).await?;
        let content = tokio::fs::read(path).await?;
        self.targets
            .record(TOPOLOGY_TARGET, &inputs_digest, &content)
            .await?;
        info!("Wrote topology to {}", path.display());
        Ok(TargetOutcome::Built)
    }

    /// Remove every build artifact and its target record.
    ///
    /// Geocoded towns stay cached.
    pub async fn clean(&self) -> Result<Vec<PathBuf>> {
        let mut artifacts = vec![
            (BOUNDARY_TARGET.to_string(), self.boundary_path()),
            (TOPOLOGY_TARGET.to_string(), self.topology_path()),
        ];
        match self.load_itineraries().await {
            Ok(itineraries) => artifacts.extend(
                itineraries
                    .iter()
                    .map(|i| (i.target_name(), self.itinerary_path(i))),
            ),
            Err(e) => warn!("Cannot list itinerary artifacts: {}", e),
        }

        let mut removed = Vec::new();
        for (target, path) in artifacts {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.targets.forget(&target).await?;
        }
        self.targets.persist().await?;
        info!("Removed {} artifacts", removed.len());
        Ok(removed)
    }
}

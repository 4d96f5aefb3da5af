//! Geocoded town feature

use crate::{CaravaneError, Result};
use geojson::Feature;
use serde::{Deserialize, Serialize};

/// The feature the geocoding service returned for one town.
///
/// Immutable once produced: builders clone the feature before changing it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedTown {
    pub town: String,
    pub feature: Feature,
}

/// Cache representation, the feature is kept as GeoJSON text
#[derive(Debug, Serialize, Deserialize)]
pub struct CachedTown {
    pub town: String,
    pub feature_json: String,
}

impl GeocodedTown {
    #[must_use]
    pub fn new(town: impl Into<String>, feature: Feature) -> Self {
        Self {
            town: town.into(),
            feature,
        }
    }

    /// Generate cache key for a town name
    #[must_use]
    pub fn cache_key(town: &str) -> String {
        format!("geocode:{town}")
    }

    /// Label the service attached to the match, used to audit homonyms
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.feature.property("label").and_then(|v| v.as_str())
    }

    /// Department/region context the service attached to the match
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        self.feature.property("context").and_then(|v| v.as_str())
    }

    /// `[longitude, latitude]` of a point geometry
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self.feature.geometry.as_ref().map(|g| &g.value) {
            Some(geojson::Value::Point(position)) if position.len() >= 2 => {
                Some((position[0], position[1]))
            }
            _ => None,
        }
    }

    pub fn to_cached(&self) -> Result<CachedTown> {
        Ok(CachedTown {
            town: self.town.clone(),
            feature_json: serde_json::to_string(&self.feature)
                .map_err(|e| CaravaneError::cache(e.to_string()))?,
        })
    }

    pub fn from_cached(cached: CachedTown) -> Result<Self> {
        let feature: Feature = serde_json::from_str(&cached.feature_json)
            .map_err(|e| CaravaneError::cache(format!("corrupt entry for {}: {e}", cached.town)))?;
        Ok(Self::new(cached.town, feature))
    }
}

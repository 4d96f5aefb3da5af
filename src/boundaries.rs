//! Boundary Filter
//!
//! Keeps the metropolitan administrative regions of the national boundary
//! collection by dropping the features whose `properties.code` is excluded.

use crate::{CaravaneError, Result};
use geojson::{Feature, FeatureCollection};
use tracing::debug;

/// Region code of a boundary feature
fn region_code(feature: &Feature, index: usize) -> Result<&str> {
    feature
        .property("code")
        .and_then(|code| code.as_str())
        .ok_or_else(|| {
            CaravaneError::malformed(format!(
                "boundary feature {index} has no string properties.code"
            ))
        })
}

/// Filter a parsed boundary collection, keeping input order
pub fn filter_boundaries(
    collection: FeatureCollection,
    excluded_codes: &[String],
) -> Result<FeatureCollection> {
    let total = collection.features.len();
    let mut kept = Vec::with_capacity(total);

    for (index, feature) in collection.features.into_iter().enumerate() {
        let code = region_code(&feature, index)?;
        if excluded_codes.iter().any(|excluded| excluded == code) {
            debug!("Dropping boundary region {}", code);
            continue;
        }
        kept.push(feature);
    }

    debug!("Kept {} of {} boundary regions", kept.len(), total);
    Ok(FeatureCollection {
        bbox: None,
        features: kept,
        foreign_members: None,
    })
}

/// Parse raw boundary GeoJSON text and filter it
pub fn filter_boundaries_str(raw: &str, excluded_codes: &[String]) -> Result<String> {
    let collection: FeatureCollection = serde_json::from_str(raw).map_err(|e| {
        CaravaneError::malformed(format!("boundary data is not a FeatureCollection: {e}"))
    })?;
    let filtered = filter_boundaries(collection, excluded_codes)?;
    Ok(serde_json::to_string(&filtered)?)
}

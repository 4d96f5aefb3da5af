//! Itinerary Feature Builder
//!
//! Joins an itinerary's ordered stops to their geocoded features and emits one
//! GeoJSON `FeatureCollection` per itinerary.

use crate::models::{GeocodedTown, Itinerary};
use crate::{CaravaneError, Result};
use geojson::{FeatureCollection, JsonObject, JsonValue};
use std::collections::BTreeMap;

/// Build the feature collection of one itinerary.
///
/// Features appear in stop order. Each one is a copy of the town's geocoded
/// feature whose properties are replaced by exactly `{ville, dates}`. The
/// first stop whose town has no feature aborts the whole itinerary.
pub fn build_collection(
    itinerary: &Itinerary,
    features: &BTreeMap<String, GeocodedTown>,
) -> Result<FeatureCollection> {
    let mut collected = Vec::with_capacity(itinerary.stops.len());

    for stop in &itinerary.stops {
        let geocoded = features
            .get(&stop.ville)
            .ok_or_else(|| CaravaneError::unresolved(&itinerary.name, &stop.ville))?;

        let mut feature = geocoded.feature.clone();
        let mut properties = JsonObject::new();
        properties.insert("ville".to_string(), JsonValue::String(stop.ville.clone()));
        properties.insert("dates".to_string(), stop.dates.clone());
        feature.properties = Some(properties);

        collected.push(feature);
    }

    let mut members = JsonObject::new();
    members.insert("id".to_string(), JsonValue::String(itinerary.name.clone()));

    Ok(FeatureCollection {
        bbox: None,
        features: collected,
        foreign_members: Some(members),
    })
}

/// Serialize a collection the way it is written to disk
pub fn to_geojson_string(collection: &FeatureCollection) -> Result<String> {
    Ok(serde_json::to_string(collection)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stop;
    use crate::resolver::tests::point_feature;
    use serde_json::json;

    fn features(names: &[(&str, f64, f64)]) -> BTreeMap<String, GeocodedTown> {
        names
            .iter()
            .map(|(name, lon, lat)| {
                (
                    name.to_string(),
                    GeocodedTown::new(*name, point_feature(name, *lon, *lat)),
                )
            })
            .collect()
    }

    fn tour() -> Itinerary {
        Itinerary::new(
            "Tour2024",
            vec![
                Stop::new("Lyon", "2024-05-01"),
                Stop::new("Paris", "2024-05-03"),
                Stop::new("Lyon", json!(["2024-05-05", "2024-05-06"])),
            ],
        )
    }

    #[test]
    fn test_features_follow_stop_order() {
        let features = features(&[("Paris", 2.35, 48.85), ("Lyon", 4.83, 45.76)]);
        let collection = build_collection(&tour(), &features).unwrap();

        assert_eq!(collection.features.len(), 3);
        let villes: Vec<&str> = collection
            .features
            .iter()
            .map(|f| f.property("ville").and_then(|v| v.as_str()).unwrap())
            .collect();
        assert_eq!(villes, vec!["Lyon", "Paris", "Lyon"]);
    }

    #[test]
    fn test_properties_are_exactly_ville_and_dates() {
        let features = features(&[("Paris", 2.35, 48.85), ("Lyon", 4.83, 45.76)]);
        let collection = build_collection(&tour(), &features).unwrap();

        let last = collection.features[2].properties.as_ref().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last["ville"], json!("Lyon"));
        assert_eq!(last["dates"], json!(["2024-05-05", "2024-05-06"]));
        assert!(last.get("label").is_none());
        assert!(last.get("score").is_none());
    }

    #[test]
    fn test_geocoded_features_are_not_mutated() {
        let features = features(&[("Paris", 2.35, 48.85), ("Lyon", 4.83, 45.76)]);
        let before = features.clone();

        build_collection(&tour(), &features).unwrap();

        assert_eq!(features, before);
        assert_eq!(features["Lyon"].label(), Some("Lyon"));
    }

    #[test]
    fn test_geometry_is_copied() {
        let features = features(&[("Paris", 2.35, 48.85), ("Lyon", 4.83, 45.76)]);
        let collection = build_collection(&tour(), &features).unwrap();
        assert_eq!(collection.features[1].geometry, features["Paris"].feature.geometry);
    }

    #[test]
    fn test_unresolved_town_aborts_itinerary() {
        let features = features(&[("Lyon", 4.83, 45.76)]);
        let err = build_collection(&tour(), &features).unwrap_err();
        assert!(matches!(
            err,
            CaravaneError::UnresolvedTown { ref itinerary, ref town }
                if itinerary == "Tour2024" && town == "Paris"
        ));
    }

    #[test]
    fn test_output_document_shape() {
        let features = features(&[("Paris", 2.35, 48.85), ("Lyon", 4.83, 45.76)]);
        let collection = build_collection(&tour(), &features).unwrap();
        let document: serde_json::Value =
            serde_json::from_str(&to_geojson_string(&collection).unwrap()).unwrap();

        assert_eq!(document["type"], "FeatureCollection");
        assert_eq!(document["id"], "Tour2024");
        assert_eq!(document["features"].as_array().unwrap().len(), 3);
        assert_eq!(document["features"][0]["geometry"]["coordinates"], json!([4.83, 45.76]));
    }

    #[test]
    fn test_empty_itinerary() {
        let itinerary = Itinerary::new("Vide", vec![]);
        let collection = build_collection(&itinerary, &BTreeMap::new()).unwrap();
        assert!(collection.features.is_empty());
    }
}

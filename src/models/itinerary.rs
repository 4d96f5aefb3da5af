//! Itinerary ("caravane") and stop ("étape") definitions

use crate::topology::{BOUNDARY_OBJECT, MERGED_OBJECT};
use crate::{CaravaneError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One town and its date(s) within an itinerary
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stop {
    /// Town name, the join key into geocoded features
    pub ville: String,
    /// Date, date list or date range, carried through verbatim
    pub dates: Value,
}

/// A named, ordered sequence of stops
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Itinerary {
    pub name: String,
    pub stops: Vec<Stop>,
}

/// Every itinerary of a `caravanes.json` file, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItinerarySet {
    itineraries: BTreeMap<String, Itinerary>,
}

impl Stop {
    #[must_use]
    pub fn new(ville: impl Into<String>, dates: impl Into<Value>) -> Self {
        Self {
            ville: ville.into(),
            dates: dates.into(),
        }
    }
}

impl Itinerary {
    #[must_use]
    pub fn new(name: impl Into<String>, stops: Vec<Stop>) -> Self {
        Self {
            name: name.into(),
            stops,
        }
    }

    /// Name of the build target producing this itinerary's collection
    #[must_use]
    pub fn target_name(&self) -> String {
        format!("caravane_{}", self.name)
    }

    /// File name of this itinerary's feature collection
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.geojson", self.target_name())
    }

    /// Town names in stop order, duplicates included
    pub fn towns(&self) -> impl Iterator<Item = &str> {
        self.stops.iter().map(|stop| stop.ville.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CaravaneError::malformed("itinerary name cannot be empty"));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(CaravaneError::malformed(format!(
                "itinerary name '{}' cannot be used as a file name",
                self.name
            )));
        }
        if self.name == BOUNDARY_OBJECT || self.name == MERGED_OBJECT {
            return Err(CaravaneError::malformed(format!(
                "itinerary name '{}' is reserved for the boundary topology",
                self.name
            )));
        }
        if self.name.contains('=') {
            return Err(CaravaneError::malformed(format!(
                "itinerary name '{}' cannot contain '='",
                self.name
            )));
        }
        for (index, stop) in self.stops.iter().enumerate() {
            if stop.ville.trim().is_empty() {
                return Err(CaravaneError::malformed(format!(
                    "stop {} of itinerary '{}' has an empty town name",
                    index + 1,
                    self.name
                )));
            }
            if stop.dates.is_null() {
                return Err(CaravaneError::malformed(format!(
                    "stop {} ({}) of itinerary '{}' has no dates",
                    index + 1,
                    stop.ville,
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl ItinerarySet {
    /// Builds a set from already-parsed itineraries, validating each one
    pub fn new(itineraries: impl IntoIterator<Item = Itinerary>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for itinerary in itineraries {
            itinerary.validate()?;
            if by_name.contains_key(&itinerary.name) {
                return Err(CaravaneError::malformed(format!(
                    "itinerary '{}' is defined twice",
                    itinerary.name
                )));
            }
            by_name.insert(itinerary.name.clone(), itinerary);
        }
        Ok(Self {
            itineraries: by_name,
        })
    }

    /// Parses the `{name: [{ville, dates}, ...]}` document
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<Stop>> = serde_json::from_str(json)?;
        Self::new(
            raw.into_iter()
                .map(|(name, stops)| Itinerary::new(name, stops)),
        )
    }

    /// Loads and validates an itinerary file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CaravaneError::malformed(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&content).map_err(|e| match e {
            CaravaneError::MalformedInput { message } => {
                CaravaneError::malformed(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Every distinct town referenced by any stop of any itinerary
    #[must_use]
    pub fn town_set(&self) -> BTreeSet<String> {
        self.itineraries
            .values()
            .flat_map(Itinerary::towns)
            .map(str::to_string)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Itinerary> {
        self.itineraries.values()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Itinerary> {
        self.itineraries.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.itineraries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.itineraries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CARAVANES: &str = r#"{
        "Tour2024": [
            {"ville": "Lyon", "dates": "2024-05-01"},
            {"ville": "Paris", "dates": "2024-05-03"}
        ],
        "Sud": [
            {"ville": "Marseille", "dates": ["2024-06-01", "2024-06-02"]},
            {"ville": "Lyon", "dates": {"debut": "2024-06-04", "fin": "2024-06-05"}},
            {"ville": "Marseille", "dates": "2024-06-07"}
        ]
    }"#;

    #[test]
    fn test_parse_preserves_stop_order() {
        let set = ItinerarySet::from_json(CARAVANES).unwrap();
        assert_eq!(set.len(), 2);

        let tour = set.get("Tour2024").unwrap();
        let towns: Vec<&str> = tour.towns().collect();
        assert_eq!(towns, vec!["Lyon", "Paris"]);

        let sud = set.get("Sud").unwrap();
        assert_eq!(sud.stops[1].dates, json!({"debut": "2024-06-04", "fin": "2024-06-05"}));
    }

    #[test]
    fn test_town_set_collapses_duplicates() {
        let set = ItinerarySet::from_json(CARAVANES).unwrap();
        let towns = set.town_set();
        assert_eq!(towns.len(), 3);
        for town in ["Lyon", "Paris", "Marseille"] {
            assert!(towns.contains(town));
        }
    }

    #[test]
    fn test_town_set_of_empty_set() {
        let set = ItinerarySet::from_json("{}").unwrap();
        assert!(set.is_empty());
        assert!(set.town_set().is_empty());
    }

    #[test]
    fn test_missing_ville_is_malformed() {
        let err = ItinerarySet::from_json(r#"{"A": [{"dates": "2024-01-01"}]}"#).unwrap_err();
        assert!(matches!(err, CaravaneError::MalformedInput { .. }));
    }

    #[test]
    fn test_missing_dates_is_malformed() {
        let err = ItinerarySet::from_json(r#"{"A": [{"ville": "Lyon"}]}"#).unwrap_err();
        assert!(matches!(err, CaravaneError::MalformedInput { .. }));
    }

    #[test]
    fn test_empty_town_name_is_malformed() {
        let err =
            ItinerarySet::from_json(r#"{"A": [{"ville": "  ", "dates": "2024-01-01"}]}"#)
                .unwrap_err();
        assert!(err.to_string().contains("empty town name"));
    }

    #[test]
    fn test_itinerary_name_must_be_a_file_name() {
        let err = ItinerarySet::from_json(r#"{"../evil": []}"#).unwrap_err();
        assert!(matches!(err, CaravaneError::MalformedInput { .. }));
        let err = ItinerarySet::from_json(r#"{"a=b": []}"#).unwrap_err();
        assert!(err.to_string().contains("'='"));
    }

    #[test]
    fn test_topology_object_names_are_reserved() {
        for name in [BOUNDARY_OBJECT, MERGED_OBJECT] {
            let err = ItinerarySet::from_json(&format!(r#"{{"{name}": []}}"#)).unwrap_err();
            assert!(matches!(err, CaravaneError::MalformedInput { .. }));
            assert!(err.to_string().contains("reserved"));
        }
        assert!(ItinerarySet::from_json(r#"{"departements2024": []}"#).is_ok());
    }

    #[test]
    fn test_duplicate_itinerary_is_rejected() {
        let itineraries = vec![Itinerary::new("A", vec![]), Itinerary::new("A", vec![])];
        assert!(ItinerarySet::new(itineraries).is_err());
    }

    #[test]
    fn test_target_and_file_names() {
        let itinerary = Itinerary::new("Tour2024", vec![Stop::new("Lyon", "2024-05-01")]);
        assert_eq!(itinerary.target_name(), "caravane_Tour2024");
        assert_eq!(itinerary.file_name(), "caravane_Tour2024.geojson");
    }

    #[tokio::test]
    async fn test_load_unreadable_file_is_malformed() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ItinerarySet::load(dir.path().join("caravanes.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaravaneError::MalformedInput { .. }));
    }
}

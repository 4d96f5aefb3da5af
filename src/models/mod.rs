//! Data models for the caravanes pipeline
//!
//! - Itinerary: named, ordered stops read from `caravanes.json`
//! - Geocoded: the feature the geocoding service returned for a town

pub mod geocoded;
pub mod itinerary;

pub use geocoded::{CachedTown, GeocodedTown};
pub use itinerary::{Itinerary, ItinerarySet, Stop};

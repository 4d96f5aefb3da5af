//! Geocoding client for the French national address API
//!
//! Resolves a free-text town name to the first feature of the service's
//! ranked result list. Transient transport failures are retried with
//! exponential backoff; an empty result list is reported as `NoMatchFound`.

use crate::config::GeocodingConfig;
use crate::models::GeocodedTown;
use crate::{CaravaneError, Result};
use async_trait::async_trait;
use geojson::FeatureCollection;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Resolves a town name to exactly one feature
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, town: &str) -> Result<GeocodedTown>;
}

/// HTTP client for `GET <base_url>/search/?q=<town>`
pub struct AddressApiClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl AddressApiClient {
    /// Create a new geocoding client
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("caravanes/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CaravaneError::config(format!("Failed to create HTTP client: {e}")))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Search URL for a town, the name is percent-encoded
    #[must_use]
    pub fn search_url(&self, town: &str) -> String {
        format!("{}/search/?q={}", self.base_url, urlencoding::encode(town))
    }
}

#[async_trait]
impl Geocoder for AddressApiClient {
    #[instrument(skip(self))]
    async fn geocode(&self, town: &str) -> Result<GeocodedTown> {
        info!("Geocoding town: '{}'", town);
        let start_time = Instant::now();

        let url = self.search_url(town);
        debug!("Address API request URL: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CaravaneError::lookup_failed(town, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CaravaneError::lookup_failed(
                town,
                format!("HTTP {status}: {body}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CaravaneError::lookup_failed(town, e.to_string()))?;
        let collection: FeatureCollection = serde_json::from_str(&body).map_err(|e| {
            CaravaneError::lookup_failed(town, format!("invalid geocoding response: {e}"))
        })?;

        let Some(feature) = collection.features.into_iter().next() else {
            warn!("No results found for town '{}'", town);
            return Err(CaravaneError::no_match(town));
        };

        let geocoded = GeocodedTown::new(town, feature);
        debug!(
            "Matched '{}' to {:?} ({:?}) in {:.3}s",
            town,
            geocoded.label(),
            geocoded.context(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(geocoded)
    }
}

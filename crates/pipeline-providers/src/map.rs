//! `MapClipProvider`: hands coordinates to the headless map-rendering
//! collaborator and returns a blob URL for the produced clip. The core
//! treats this render as opaque — it does not rasterize maps itself.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use pipeline_models::Coordinates;
use pipeline_storage::BlobStore;

use crate::error::{ProviderError, ProviderResult};

/// The headless map-rendering collaborator interface.
#[async_trait]
pub trait MapClipProvider: Send + Sync {
    /// Renders a map clip centered on `coordinates` and returns the raw
    /// bytes of the rendered video.
    async fn render(&self, coordinates: &Coordinates) -> ProviderResult<Vec<u8>>;

    /// Cheap liveness check used before committing a job to a map-dependent
    /// template.
    async fn health_check(&self) -> ProviderResult<bool>;
}

#[derive(Debug, Clone)]
pub struct MapProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl MapProviderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("MAP_RENDERER_BASE_URL")
                .unwrap_or_else(|_| "https://maprenderer.internal.example".to_string()),
            api_key: std::env::var("MAP_RENDERER_API_KEY").unwrap_or_default(),
            request_timeout: std::env::var("MAP_RENDERER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(45)),
        }
    }
}

#[derive(Debug, Serialize)]
struct RenderRequest {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    ok: bool,
}

/// REST-backed `MapClipProvider` talking to a headless map renderer.
pub struct HeadlessMapClipProvider {
    http: Client,
    config: MapProviderConfig,
}

impl HeadlessMapClipProvider {
    pub fn new(config: MapProviderConfig) -> ProviderResult<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(MapProviderConfig::from_env())
    }
}

#[async_trait]
impl MapClipProvider for HeadlessMapClipProvider {
    async fn render(&self, coordinates: &Coordinates) -> ProviderResult<Vec<u8>> {
        let (lat, lng) = coordinates.rounded();
        debug!(lat, lng, "requesting map clip render");

        let resp = self
            .http
            .post(format!("{}/v1/render", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&RenderRequest { lat, lng })
            .send()
            .await?
            .error_for_status()?;

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidOutput(
                "map renderer returned an empty clip".to_string(),
            ));
        }
        Ok(bytes.to_vec())
    }

    async fn health_check(&self) -> ProviderResult<bool> {
        let resp = self
            .http
            .get(format!("{}/v1/health", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                let parsed: HealthResponse = r.json().await.unwrap_or(HealthResponse { ok: false });
                Ok(parsed.ok)
            }
            _ => Ok(false),
        }
    }
}

/// Renders a map clip and uploads it to `blob_store` under `temp_key`,
/// returning the blob URL for the caller to later `mv` into its
/// durable location once validated.
pub async fn produce(
    provider: &dyn MapClipProvider,
    blob_store: &dyn BlobStore,
    coordinates: &Coordinates,
    temp_key: &str,
) -> ProviderResult<String> {
    let bytes = provider.render(coordinates).await?;
    blob_store.upload(bytes, temp_key, "video/mp4").await?;
    let url = blob_store.url_from_key(temp_key);
    info!(url = %url, "map clip rendered");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_has_sane_default_timeout() {
        let config = MapProviderConfig {
            base_url: "https://example.com".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(45),
        };
        assert_eq!(config.request_timeout, Duration::from_secs(45));
    }
}

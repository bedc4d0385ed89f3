//! `AssetCache`: content-addressed cache mapping a fingerprint to a blob
//! URL, with two TTL tiers and hit accounting persisted through
//! `JobRepository`.

use md5::{Digest, Md5};
use tracing::debug;

use pipeline_models::{AssetType, CacheKeyDiscriminator, ProcessedAsset};
use pipeline_repo::JobRepository;

use crate::config::CacheConfig;
use crate::error::PipelineResult;

/// Computes the MD5-over-stable-JSON cache key for a discriminator.
///
/// Field order in `CacheKeyDiscriminator`'s derived `Serialize` is fixed by
/// struct declaration order, which `serde_json` preserves, so the digest is
/// reproducible across processes for identical inputs.
pub fn cache_key(discriminator: &CacheKeyDiscriminator) -> String {
    let json = serde_json::to_vec(discriminator).expect("CacheKeyDiscriminator always serializes");
    let digest = Md5::digest(&json);
    format!("{digest:x}")
}

/// Content-addressed cache fronting `JobRepository`'s asset collection.
pub struct AssetCache<R: JobRepository + ?Sized> {
    repo: std::sync::Arc<R>,
    config: CacheConfig,
}

impl<R: JobRepository + ?Sized> AssetCache<R> {
    pub fn new(repo: std::sync::Arc<R>, config: CacheConfig) -> Self {
        Self { repo, config }
    }

    /// Looks up `key`. Returns `None` on miss or on an expired entry
    /// (expired entries are not eagerly deleted, per the design's
    /// documented reliance on read-time staleness detection); on hit,
    /// increments the entry's access accounting.
    pub async fn get(&self, key: &str) -> PipelineResult<Option<String>> {
        let Some(asset) = self.repo.get_asset(key).await? else {
            return Ok(None);
        };

        if asset.is_expired() {
            debug!(cache_key = key, "asset cache entry expired");
            return Ok(None);
        }

        self.repo.touch_asset(key).await?;
        Ok(Some(asset.path))
    }

    /// Idempotent upsert. Callers pass the freshly-produced blob URL;
    /// `put` always overwrites `metadata.timestamp` and resets access
    /// accounting, matching the "first successful production" semantics.
    pub async fn put(
        &self,
        key: &str,
        blob_url: &str,
        asset_type: AssetType,
        hash: &str,
    ) -> PipelineResult<()> {
        let asset = ProcessedAsset::new(asset_type, key.to_string(), blob_url.to_string(), hash.to_string());
        self.repo.put_asset(&asset).await?;
        Ok(())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_models::Coordinates;

    #[test]
    fn cache_key_is_stable_for_identical_inputs() {
        let d1 = CacheKeyDiscriminator {
            asset_type: AssetType::Runway,
            input_files: Some(vec!["a.jpg".into()]),
            template: None,
            coordinates: None,
            metadata: None,
        };
        let d2 = CacheKeyDiscriminator {
            asset_type: AssetType::Runway,
            input_files: Some(vec!["a.jpg".into()]),
            template: None,
            coordinates: None,
            metadata: None,
        };
        assert_eq!(cache_key(&d1), cache_key(&d2));
    }

    #[test]
    fn cache_key_rounds_map_coordinates_to_six_decimals() {
        let coords = Coordinates { lat: 37.774_912_34, lng: -122.419_412_9 };
        let d1 = CacheKeyDiscriminator {
            asset_type: AssetType::Map,
            input_files: None,
            template: None,
            coordinates: Some(coords.rounded()),
            metadata: None,
        };
        let d2 = CacheKeyDiscriminator {
            asset_type: AssetType::Map,
            input_files: None,
            template: None,
            coordinates: Some((37.774912, -122.419413)),
            metadata: None,
        };
        assert_eq!(cache_key(&d1), cache_key(&d2));
    }

    #[test]
    fn differing_inputs_produce_differing_keys() {
        let d1 = CacheKeyDiscriminator {
            asset_type: AssetType::Webp,
            input_files: Some(vec!["a.jpg".into()]),
            template: None,
            coordinates: None,
            metadata: None,
        };
        let d2 = CacheKeyDiscriminator {
            asset_type: AssetType::Webp,
            input_files: Some(vec!["b.jpg".into()]),
            template: None,
            coordinates: None,
            metadata: None,
        };
        assert_ne!(cache_key(&d1), cache_key(&d2));
    }
}

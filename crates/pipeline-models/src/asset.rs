//! Content-addressed cache entry model backing AssetCache.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of artifact a cache entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Runway,
    Map,
    Webp,
    Template,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Runway => "runway",
            AssetType::Map => "map",
            AssetType::Webp => "webp",
            AssetType::Template => "template",
        }
    }
}

/// Cache tier, which determines an entry's expiration window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Default tier: 24h expiration.
    Normal,
    /// Promoted after >=5 reads within the last 7 days: 7d expiration.
    Frequent,
}

impl CacheTier {
    /// Number of reads within the trailing window required for promotion.
    pub const FREQUENT_THRESHOLD: u32 = 5;

    pub fn ttl_ms(&self) -> i64 {
        match self {
            CacheTier::Normal => 24 * 60 * 60 * 1000,
            CacheTier::Frequent => 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// Access-accounting metadata attached to a cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssetMetadata {
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    /// Timestamps of recent reads, used to decide tier promotion. Pruned to
    /// the trailing 7-day window on every read.
    #[serde(default)]
    pub recent_reads: Vec<DateTime<Utc>>,
}

impl AssetMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            timestamp: now,
            last_accessed: now,
            access_count: 0,
            recent_reads: Vec::new(),
        }
    }
}

impl Default for AssetMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A single content-addressed cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessedAsset {
    pub asset_type: AssetType,
    /// MD5 of a stable JSON serialization of the discriminator fields.
    pub cache_key: String,
    /// Blob URL of the cached artifact.
    pub path: String,
    pub hash: String,
    pub metadata: AssetMetadata,
}

impl ProcessedAsset {
    pub fn new(
        asset_type: AssetType,
        cache_key: impl Into<String>,
        path: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            asset_type,
            cache_key: cache_key.into(),
            path: path.into(),
            hash: hash.into(),
            metadata: AssetMetadata::new(),
        }
    }

    /// Tier this entry currently belongs to, based on its recent-read history.
    pub fn tier(&self) -> CacheTier {
        let window_start = Utc::now() - chrono::Duration::days(7);
        let recent = self
            .metadata
            .recent_reads
            .iter()
            .filter(|t| **t >= window_start)
            .count() as u32;
        if recent >= CacheTier::FREQUENT_THRESHOLD {
            CacheTier::Frequent
        } else {
            CacheTier::Normal
        }
    }

    /// Whether this entry has aged past its tier's TTL, measured from `timestamp`.
    pub fn is_expired(&self) -> bool {
        let ttl = chrono::Duration::milliseconds(self.tier().ttl_ms());
        Utc::now() > self.metadata.timestamp + ttl
    }
}

/// The fields used to compute `cacheKey`, serialized stably before hashing.
///
/// Field ordering in the derived `Serialize` impl is fixed by struct
/// declaration order, which `serde_json` preserves, keeping the digest
/// reproducible across processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKeyDiscriminator {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Coordinates rounded to six decimal places for `map` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_not_expired() {
        let asset = ProcessedAsset::new(AssetType::Runway, "abc", "properties/x/videos/runway/j/0.mp4", "h");
        assert!(!asset.is_expired());
        assert_eq!(asset.tier(), CacheTier::Normal);
    }
}

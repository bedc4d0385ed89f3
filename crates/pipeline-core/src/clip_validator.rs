//! `ClipValidator`: confirms a generated clip is present, downloadable,
//! decodable, and meets a minimum duration before it's trusted as input to a
//! template render. Results are memoized per `(jobId, index)`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use pipeline_storage::BlobStore;

use crate::config::CacheConfig;
use crate::resource_tracker::{ResourceState, ResourceTracker};

/// Outcome of validating one clip.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Ok { duration: f64 },
    Fail { reason: String },
}

impl ValidationOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationOutcome::Ok { .. })
    }
}

/// Extra metadata required for map clips: non-zero video dimensions and a
/// video track.
#[derive(Debug, Clone, Copy)]
pub struct MetadataRequirement {
    pub min_duration_secs: f64,
}

#[derive(Clone)]
struct MemoEntry {
    outcome: ValidationOutcome,
    recorded_at: Instant,
}

pub struct ClipValidator {
    blob_store: std::sync::Arc<dyn BlobStore>,
    ttl: Duration,
    memo: Mutex<HashMap<(String, u32), MemoEntry>>,
}

impl ClipValidator {
    pub fn new(blob_store: std::sync::Arc<dyn BlobStore>, config: &CacheConfig) -> Self {
        Self {
            blob_store,
            ttl: config.validation_cache_ttl,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Validates the clip at `url`, tracked under `temp_dir` via `tracker`
    /// for guaranteed cleanup. `metadata_requirement` is `Some` for map
    /// clips, which additionally require a non-zero video track.
    pub async fn validate(
        &self,
        url: &str,
        index: u32,
        job_id: &str,
        temp_dir: &std::path::Path,
        tracker: &ResourceTracker,
        metadata_requirement: Option<MetadataRequirement>,
    ) -> ValidationOutcome {
        let memo_key = (job_id.to_string(), index);
        if let Some(entry) = self.memo.lock().unwrap().get(&memo_key) {
            if entry.recorded_at.elapsed() < self.ttl {
                debug!(job_id, index, "clip validation memo hit");
                return entry.outcome.clone();
            }
        }

        let outcome = self.validate_uncached(url, temp_dir, tracker, metadata_requirement).await;
        self.memo.lock().unwrap().insert(
            memo_key,
            MemoEntry {
                outcome: outcome.clone(),
                recorded_at: Instant::now(),
            },
        );
        outcome
    }

    async fn validate_uncached(
        &self,
        url: &str,
        temp_dir: &std::path::Path,
        tracker: &ResourceTracker,
        metadata_requirement: Option<MetadataRequirement>,
    ) -> ValidationOutcome {
        let key = match self.blob_store.key_from_url(url) {
            Ok(k) => k,
            Err(e) => return ValidationOutcome::Fail { reason: format!("bad url: {e}") },
        };

        match self.blob_store.head(&key).await {
            Ok(Some(info)) if info.size > 0 => {}
            Ok(Some(_)) => return ValidationOutcome::Fail { reason: "blob is empty".to_string() },
            Ok(None) => return ValidationOutcome::Fail { reason: "blob does not exist".to_string() },
            Err(e) => return ValidationOutcome::Fail { reason: format!("head failed: {e}") },
        }

        let local_path: PathBuf = temp_dir.join(format!("validate-{}.mp4", uuid::Uuid::new_v4()));
        tracker.track(&local_path, "clip_validation");

        if let Err(e) = self.blob_store.download(&key, &local_path).await {
            tracker.update_state(&local_path, ResourceState::Failed);
            return ValidationOutcome::Fail { reason: format!("download failed: {e}") };
        }

        let duration = match pipeline_media::get_duration_secs(&local_path).await {
            Ok(d) if d > 0.0 => d,
            Ok(_) => {
                tracker.update_state(&local_path, ResourceState::Failed);
                return ValidationOutcome::Fail { reason: "zero duration".to_string() };
            }
            Err(e) => {
                tracker.update_state(&local_path, ResourceState::Failed);
                return ValidationOutcome::Fail { reason: format!("probe failed: {e}") };
            }
        };

        if let Err(e) = pipeline_media::validate_integrity(&local_path).await {
            tracker.update_state(&local_path, ResourceState::Failed);
            return ValidationOutcome::Fail { reason: format!("integrity check failed: {e}") };
        }

        if let Some(requirement) = metadata_requirement {
            match pipeline_media::get_metadata(&local_path).await {
                Ok(meta) if meta.has_video && meta.width > 0 && meta.height > 0 && duration >= requirement.min_duration_secs => {}
                Ok(meta) => {
                    tracker.update_state(&local_path, ResourceState::Failed);
                    return ValidationOutcome::Fail {
                        reason: format!(
                            "metadata requirement not met: has_video={} width={} height={} duration={}",
                            meta.has_video, meta.width, meta.height, duration
                        ),
                    };
                }
                Err(e) => {
                    tracker.update_state(&local_path, ResourceState::Failed);
                    return ValidationOutcome::Fail { reason: format!("metadata probe failed: {e}") };
                }
            }
        }

        tracker.update_state(&local_path, ResourceState::Uploaded);
        ValidationOutcome::Ok { duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_outcome_is_not_ok() {
        let outcome = ValidationOutcome::Fail { reason: "x".to_string() };
        assert!(!outcome.is_ok());
    }

    #[test]
    fn ok_outcome_is_ok() {
        let outcome = ValidationOutcome::Ok { duration: 3.0 };
        assert!(outcome.is_ok());
    }
}

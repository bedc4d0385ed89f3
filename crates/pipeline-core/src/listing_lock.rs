//! `ListingLock`: cluster-safe mutual exclusion per listing across worker
//! processes. Two layers: a process-local advisory lock and a persisted row
//! checked transactionally against concurrent holders on other processes.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{info, warn};

use pipeline_models::ListingLock as ListingLockRow;
use pipeline_repo::{FirestoreError, JobRepository};

use crate::config::LockConfig;
use crate::error::{PipelineError, PipelineResult};

/// Process-local advisory lock keyed by a 31-bit hash of `listingId`.
///
/// This is the first of the two layers: it only prevents two jobs *on this
/// process* from racing, cheaply, before the more expensive persisted-row
/// check runs.
#[derive(Debug, Default)]
struct AdvisoryLocks {
    held: Mutex<HashSet<u32>>,
}

impl AdvisoryLocks {
    fn hash(listing_id: &str) -> u32 {
        let mut hash: u32 = 5381;
        for byte in listing_id.bytes() {
            hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
        }
        hash & 0x7fff_ffff
    }

    fn try_acquire(&self, listing_id: &str) -> bool {
        self.held.lock().unwrap().insert(Self::hash(listing_id))
    }

    fn release(&self, listing_id: &str) {
        self.held.lock().unwrap().remove(&Self::hash(listing_id));
    }
}

/// A held lock, releasable via `ListingLock::release`.
pub struct LockHandle {
    pub listing_id: String,
    pub job_id: String,
    pub process_id: String,
}

/// Cluster-safe per-listing mutex.
pub struct ListingLock<R: JobRepository + ?Sized> {
    repo: std::sync::Arc<R>,
    advisory: AdvisoryLocks,
    process_id: String,
    config: LockConfig,
}

impl<R: JobRepository + ?Sized> ListingLock<R> {
    pub fn new(repo: std::sync::Arc<R>, process_id: impl Into<String>, config: LockConfig) -> Self {
        Self {
            repo,
            advisory: AdvisoryLocks::default(),
            process_id: process_id.into(),
            config,
        }
    }

    /// Acquires the lock for `listing_id` on behalf of `job_id`, retrying up
    /// to `config.max_acquire_attempts` times with exponential backoff.
    /// Reaps stale (expired) rows before each attempt.
    pub async fn acquire(&self, listing_id: &str, job_id: &str) -> PipelineResult<LockHandle> {
        for attempt in 1..=self.config.max_acquire_attempts {
            self.repo.delete_expired_locks(listing_id).await?;

            if !self.advisory.try_acquire(listing_id) {
                warn!(listing_id, attempt, "advisory lock already held locally");
                self.backoff(attempt).await;
                continue;
            }

            let row = ListingLockRow::new(listing_id, job_id, self.process_id.clone());
            match self.repo.create_lock(&row).await {
                Ok(()) => {
                    info!(listing_id, job_id, attempt, "acquired listing lock");
                    return Ok(LockHandle {
                        listing_id: listing_id.to_string(),
                        job_id: job_id.to_string(),
                        process_id: self.process_id.clone(),
                    });
                }
                Err(FirestoreError::AlreadyExists(_)) => {
                    self.advisory.release(listing_id);
                    warn!(listing_id, attempt, "listing already locked by another holder");
                    self.backoff(attempt).await;
                }
                Err(e) => {
                    self.advisory.release(listing_id);
                    return Err(PipelineError::from(e));
                }
            }
        }

        Err(PipelineError::Locked(listing_id.to_string()))
    }

    /// Releases both layers. Failure to delete the persisted row is logged,
    /// not fatal — its lease will expire and it will be reaped on the next
    /// acquisition attempt for that listing.
    pub async fn release(&self, handle: &LockHandle) {
        if let Err(e) = self
            .repo
            .delete_lock(&handle.listing_id, &handle.job_id, &handle.process_id)
            .await
        {
            warn!(listing_id = %handle.listing_id, job_id = %handle.job_id, error = %e, "failed to delete lock row, will expire");
        }
        self.advisory.release(&handle.listing_id);
        info!(listing_id = %handle.listing_id, job_id = %handle.job_id, "released listing lock");
    }

    async fn backoff(&self, attempt: u32) {
        let delay_ms = 100u64.saturating_mul(1 << attempt.min(10));
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use pipeline_models::{Job, JobProgress, JobStatus, Photo, ProcessedAsset};
    use pipeline_repo::{FirestoreResult, MetadataPatch, PhotoPatch};

    #[test]
    fn advisory_hash_is_within_31_bits() {
        let hash = AdvisoryLocks::hash("listing-1234567890");
        assert!(hash <= 0x7fff_ffff);
    }

    #[test]
    fn advisory_lock_prevents_double_local_acquire() {
        let locks = AdvisoryLocks::default();
        assert!(locks.try_acquire("listing-1"));
        assert!(!locks.try_acquire("listing-1"));
        locks.release("listing-1");
        assert!(locks.try_acquire("listing-1"));
    }

    mockall::mock! {
        pub Repo {}

        #[async_trait]
        impl JobRepository for Repo {
            async fn create_job(&self, job: &Job) -> FirestoreResult<()>;
            async fn get_job(&self, job_id: &pipeline_models::JobId) -> FirestoreResult<Option<Job>>;
            async fn update_status(
                &self,
                job_id: &pipeline_models::JobId,
                status: JobStatus,
                progress: Option<JobProgress>,
                error: Option<String>,
            ) -> FirestoreResult<()>;
            async fn set_metadata(&self, job_id: &pipeline_models::JobId, patch: MetadataPatch) -> FirestoreResult<()>;
            async fn set_output(
                &self,
                job_id: &pipeline_models::JobId,
                output_blob_url: &str,
                completed_at: DateTime<Utc>,
            ) -> FirestoreResult<()>;
            async fn get_photos(&self, listing_id: &str) -> FirestoreResult<Vec<Photo>>;
            async fn update_photo(&self, id: &str, patch: PhotoPatch) -> FirestoreResult<()>;
            async fn upsert_photo_by_order(&self, listing_id: &str, order: u32, patch: PhotoPatch) -> FirestoreResult<Photo>;
            async fn list_locks(&self, listing_id: &str) -> FirestoreResult<Vec<ListingLockRow>>;
            async fn create_lock(&self, lock: &ListingLockRow) -> FirestoreResult<()>;
            async fn delete_expired_locks(&self, listing_id: &str) -> FirestoreResult<u32>;
            async fn delete_lock(&self, listing_id: &str, job_id: &str, process_id: &str) -> FirestoreResult<()>;
            async fn put_asset(&self, asset: &ProcessedAsset) -> FirestoreResult<()>;
            async fn get_asset(&self, cache_key: &str) -> FirestoreResult<Option<ProcessedAsset>>;
            async fn touch_asset(&self, cache_key: &str) -> FirestoreResult<()>;
        }
    }

    fn fast_lock_config() -> LockConfig {
        LockConfig { max_acquire_attempts: 2, ..LockConfig::default() }
    }

    #[tokio::test]
    async fn acquire_succeeds_when_no_row_exists() {
        let mut repo = MockRepo::new();
        repo.expect_delete_expired_locks().returning(|_| Ok(0));
        repo.expect_create_lock().returning(|_| Ok(()));

        let lock = ListingLock::new(std::sync::Arc::new(repo), "process-a", fast_lock_config());
        let handle = lock.acquire("listing-1", "job-1").await.expect("should acquire");
        assert_eq!(handle.listing_id, "listing-1");
        assert_eq!(handle.job_id, "job-1");
    }

    #[tokio::test]
    async fn acquire_fails_fast_when_row_already_held_by_another_job() {
        let mut repo = MockRepo::new();
        repo.expect_delete_expired_locks().returning(|_| Ok(0));
        repo.expect_create_lock().returning(|_| Err(FirestoreError::AlreadyExists("lock row exists".to_string())));

        let lock = ListingLock::new(std::sync::Arc::new(repo), "process-a", fast_lock_config());
        let result = lock.acquire("listing-1", "job-2").await;

        assert!(matches!(result, Err(PipelineError::Locked(_))));
    }

    #[tokio::test]
    async fn acquire_reaps_expired_row_before_retrying() {
        let mut repo = MockRepo::new();
        repo.expect_delete_expired_locks().returning(|_| Ok(1));
        repo.expect_create_lock().returning(|_| Ok(()));

        let lock = ListingLock::new(std::sync::Arc::new(repo), "process-a", fast_lock_config());
        let handle = lock.acquire("listing-1", "job-3").await.expect("should acquire after reaping");
        assert_eq!(handle.job_id, "job-3");
    }

    #[tokio::test]
    async fn release_clears_advisory_lock_even_if_row_delete_fails() {
        let mut repo = MockRepo::new();
        repo.expect_delete_expired_locks().returning(|_| Ok(0));
        repo.expect_create_lock().returning(|_| Ok(()));
        repo.expect_delete_lock().returning(|_, _, _| Err(FirestoreError::NotFound("lock row".to_string())));

        let lock = ListingLock::new(std::sync::Arc::new(repo), "process-a", fast_lock_config());
        let handle = lock.acquire("listing-1", "job-4").await.expect("should acquire");
        lock.release(&handle).await;

        assert!(lock.advisory.try_acquire("listing-1"));
    }
}

//! `Pipeline` orchestrates every other collaborator to turn a set of
//! listing photos into one or more rendered template videos.
//!
//! The algorithm is linear except where noted: resolve listing, acquire the
//! listing lock, prepare images, generate motion clips (concurrently with an
//! optional map clip), validate, fan out over requested templates, persist
//! the result, then unconditionally release the lock and reap temp state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pipeline_media::{
    stitch, ClipSpec, MuxTemplate, VisionCropper, WatermarkConfig,
};
use pipeline_models::{
    AssetType, CacheKeyDiscriminator, Coordinates, ErrorDetails, ExecuteInput, JobId, JobProgress,
    JobStatus, Photo, RegenerationContext, SequenceSlot, Stage, TemplateDefinition,
};
use pipeline_providers::{MapClipProvider, MotionClipProvider};
use pipeline_repo::{JobRepository, PhotoPatch};
use pipeline_storage::{keys, BlobStore};

use crate::asset_cache::{cache_key, AssetCache};
use crate::clip_validator::{ClipValidator, MetadataRequirement, ValidationOutcome};
use crate::config::{BatchingConfig, PipelineConfig, RetryConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::listing_lock::{ListingLock, LockHandle};
use crate::logging::JobLogger;
use crate::resource_tracker::{ResourceState, ResourceTracker};
use crate::retry::{retry_with_backoff, RetryResult};
use crate::template_catalog::TemplateCatalog;

/// Samples the process's share of total system memory to drive
/// `BatchController`'s adaptive sizing.
struct MemorySampler {
    system: StdMutex<sysinfo::System>,
}

impl MemorySampler {
    fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        Self { system: StdMutex::new(system) }
    }

    /// Fraction of total system memory currently in use, in `[0, 1]`.
    fn usage_fraction(&self) -> f64 {
        let mut system = self.system.lock().unwrap();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }
}

/// Memory-adaptive concurrency controller for batched fan-out (image prep,
/// motion-clip submission, template rendering).
///
/// Samples before each batch: at or above the critical threshold it halves
/// the batch size (never below `min`); below the warn threshold it steps
/// the size back up toward the default.
struct BatchController {
    current: AtomicUsize,
    min: usize,
    default: usize,
    warn_frac: f64,
    critical_frac: f64,
    sampler: MemorySampler,
}

impl BatchController {
    fn new(config: &BatchingConfig) -> Self {
        Self {
            current: AtomicUsize::new(config.default_batch_size),
            min: config.min_batch_size,
            default: config.default_batch_size,
            warn_frac: config.memory_warn_frac,
            critical_frac: config.memory_critical_frac,
            sampler: MemorySampler::new(),
        }
    }

    fn sample_and_adjust(&self) -> usize {
        let usage = self.sampler.usage_fraction();
        let current = self.current.load(Ordering::SeqCst);

        if usage >= self.critical_frac {
            let reduced = (current / 2).max(self.min);
            if reduced != current {
                warn!(usage_pct = usage * 100.0, batch_size = reduced, "memory critical, halving batch size");
                self.current.store(reduced, Ordering::SeqCst);
            }
            reduced
        } else {
            if usage >= self.warn_frac {
                warn!(usage_pct = usage * 100.0, "memory usage elevated");
            }
            if current < self.default {
                let raised = (current + 1).min(self.default);
                self.current.store(raised, Ordering::SeqCst);
                raised
            } else {
                current
            }
        }
    }
}

/// The job orchestrator: consumes every other collaborator in this crate
/// plus `BlobStore`, `MotionClipProvider`, and `MapClipProvider`.
pub struct Pipeline {
    blob_store: Arc<dyn BlobStore>,
    repo: Arc<dyn JobRepository>,
    motion_provider: Arc<dyn MotionClipProvider>,
    map_provider: Arc<dyn MapClipProvider>,
    asset_cache: AssetCache<dyn JobRepository>,
    listing_lock: ListingLock<dyn JobRepository>,
    clip_validator: ClipValidator,
    catalog: TemplateCatalog,
    config: PipelineConfig,
    temp_root: PathBuf,
    motion_max_polls: u32,
    motion_poll_interval: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        repo: Arc<dyn JobRepository>,
        motion_provider: Arc<dyn MotionClipProvider>,
        map_provider: Arc<dyn MapClipProvider>,
        config: PipelineConfig,
        process_id: impl Into<String>,
        temp_root: impl Into<PathBuf>,
        motion_max_polls: u32,
        motion_poll_interval: Duration,
    ) -> Self {
        let asset_cache = AssetCache::new(repo.clone(), config.cache);
        let listing_lock = ListingLock::new(repo.clone(), process_id, config.lock);
        let clip_validator = ClipValidator::new(blob_store.clone(), &config.cache);
        Self {
            blob_store,
            repo,
            motion_provider,
            map_provider,
            asset_cache,
            listing_lock,
            clip_validator,
            catalog: TemplateCatalog::new(),
            config,
            temp_root: temp_root.into(),
            motion_max_polls,
            motion_poll_interval,
        }
    }

    /// `Execute(input) -> outputBlobURL`, with no external cancellation
    /// source. Equivalent to `execute_with_cancel` with a channel that
    /// never fires.
    pub async fn execute(&self, input: ExecuteInput) -> PipelineResult<String> {
        let (_tx, rx) = watch::channel(false);
        self.execute_with_cancel(input, rx).await
    }

    /// `Execute`, honoring `cancel`: when it flips to `true`, in-flight work
    /// is abandoned at the next suspension point and the `finally` phase
    /// still runs.
    pub async fn execute_with_cancel(&self, input: ExecuteInput, cancel: watch::Receiver<bool>) -> PipelineResult<String> {
        let job_id = JobId::from_string(input.job_id.clone());
        let logger = JobLogger::new(&job_id, "execute");
        logger.log_start("pipeline execute starting");

        match self.run_execute(&job_id, &input, cancel).await {
            Ok(url) => {
                logger.log_completion(&url);
                Ok(url)
            }
            Err(error) => {
                logger.log_error(&error.to_string());
                self.mark_failed(&job_id, &error).await;
                Err(error)
            }
        }
    }

    /// `RegeneratePhotos(jobId, photoIds[])`: re-renders all templates after
    /// regenerating the given photos' motion clips, reusing every other
    /// photo's existing clip by blob URL. An empty `photo_ids` on a
    /// completed job is a no-op.
    pub async fn regenerate_photos(&self, job_id: &JobId, photo_ids: &[String]) -> PipelineResult<String> {
        let job = self
            .repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::InputInvalid(format!("job {job_id} not found")))?;

        if photo_ids.is_empty() {
            return job
                .output_file
                .clone()
                .ok_or_else(|| PipelineError::InputInvalid("job has no output to return".to_string()));
        }

        let photos = self.repo.get_photos(&job.listing_id).await?;
        let (to_regenerate, existing): (Vec<Photo>, Vec<Photo>) =
            photos.into_iter().partition(|p| photo_ids.contains(&p.id));

        let context = RegenerationContext {
            total_photos: (to_regenerate.len() + existing.len()) as u32,
            regenerated_photo_ids: to_regenerate.iter().map(|p| p.id.clone()).collect(),
            photos_to_regenerate: to_regenerate,
            existing_photos: existing,
        };

        if !context.covers_all_orders_without_gaps_or_overlap() {
            return Err(PipelineError::internal(
                "regeneration context does not cover every photo order exactly once",
            ));
        }

        let input = ExecuteInput {
            job_id: job_id.as_str().to_string(),
            listing_id: Some(job.listing_id.clone()),
            input_files: job.input_files.clone(),
            template: job.template_default.join(","),
            coordinates: None,
            is_regeneration: true,
            regeneration_context: Some(context),
            skip_motion: false,
            skip_motion_if_cached: false,
            skip_lock: false,
            force_regeneration: false,
        };

        self.execute(input).await
    }

    async fn run_execute(&self, job_id: &JobId, input: &ExecuteInput, cancel: watch::Receiver<bool>) -> PipelineResult<String> {
        let listing_id = self.resolve_listing_id(job_id, input).await?;

        if input.input_files.is_empty() {
            return Err(PipelineError::InputInvalid("execute requires at least one input photo".to_string()));
        }

        let lock_handle: Option<LockHandle> = if input.skip_lock {
            None
        } else {
            Some(self.listing_lock.acquire(&listing_id, job_id.as_str()).await?)
        };

        let temp_dir = self.temp_root.join(job_id.as_str());
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| PipelineError::internal(format!("failed to create job temp dir: {e}")))?;
        let tracker = ResourceTracker::new();

        let result = self.execute_body(job_id, &listing_id, input, &temp_dir, &tracker, cancel).await;

        tracker.cleanup(true).await;
        if let Err(e) = tokio::fs::remove_dir_all(&temp_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id = %job_id, error = %e, "failed to remove job temp directory");
            }
        }
        if let Some(handle) = lock_handle {
            self.listing_lock.release(&handle).await;
        }

        result
    }

    async fn resolve_listing_id(&self, job_id: &JobId, input: &ExecuteInput) -> PipelineResult<String> {
        if let Some(listing_id) = &input.listing_id {
            return Ok(listing_id.clone());
        }
        let job = self.repo.get_job(job_id).await?;
        job.map(|j| j.listing_id)
            .ok_or_else(|| PipelineError::InputInvalid("listing_id not provided and job not found".to_string()))
    }

    async fn execute_body(
        &self,
        job_id: &JobId,
        listing_id: &str,
        input: &ExecuteInput,
        temp_dir: &Path,
        tracker: &ResourceTracker,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<String> {
        self.emit_progress(job_id, Stage::Vision, 0, None).await;

        let mut photos = self.ensure_photos(listing_id, &input.input_files).await?;

        let batching = BatchController::new(&self.config.batching);
        self.prepare_images(job_id, listing_id, &mut photos, temp_dir, tracker, &batching).await?;

        self.emit_progress(job_id, Stage::Motion, 0, None).await;

        let coordinates = input.coordinates;
        let map_work = async {
            if let Some(coords) = coordinates {
                self.generate_map_clip(job_id, listing_id, &coords, temp_dir, tracker, cancel.clone())
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };
        let motion_work =
            self.generate_motion_clips(job_id, listing_id, &mut photos, input, temp_dir, &batching, cancel.clone());

        let (motion_result, map_result) = tokio::join!(motion_work, map_work);
        let motion_clips = motion_result?;
        let map_clip: Option<(PathBuf, f64)> = map_result?;

        self.validate_motion_clips(job_id, &motion_clips, temp_dir, tracker).await?;

        self.emit_progress(job_id, Stage::Template, 50, None).await;

        let watermark_config = self.acquire_watermark(temp_dir, tracker).await;

        let requested_keys: Vec<String> = input
            .template
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let map_local = map_clip.as_ref().map(|(path, _)| path.as_path());
        let map_duration = map_clip.as_ref().map(|(_, duration)| *duration);

        let mut eligible: Vec<&TemplateDefinition> = Vec::new();
        for key in &requested_keys {
            match self.catalog.lookup(key) {
                None => warn!(template = %key, "unknown template key, skipping"),
                Some(def) if def.requires_map() && map_local.is_none() => {
                    warn!(template = %key, "template requires a map clip but none is available, dropping");
                    let _ = def;
                }
                Some(def) => eligible.push(def),
            }
        }

        if eligible.is_empty() {
            return Err(PipelineError::NoTemplateSucceeded);
        }

        let batch_size = batching.sample_and_adjust().max(1);
        let results: Vec<PipelineResult<(String, String)>> = stream::iter(eligible.iter().map(|template| {
            self.render_template_with_retry(
                job_id,
                listing_id,
                template,
                &motion_clips,
                map_local,
                map_duration,
                temp_dir,
                watermark_config.as_ref(),
            )
        }))
        .buffer_unordered(batch_size)
        .collect()
        .await;

        let mut processed: Vec<(String, String)> = Vec::new();
        for result in results {
            match result {
                Ok(pair) => processed.push(pair),
                Err(e) => warn!(job_id = %job_id, error = %e, "template render failed, continuing with remaining templates"),
            }
        }

        if processed.is_empty() {
            return Err(PipelineError::NoTemplateSucceeded);
        }

        let primary_key = requested_keys.first().cloned().unwrap_or_default();
        let primary = processed
            .iter()
            .find(|(key, _)| *key == primary_key)
            .cloned()
            .unwrap_or_else(|| processed[0].clone());

        self.persist_completion(job_id, &processed, &primary, eligible.len() as u32).await?;

        Ok(primary.1)
    }

    async fn persist_completion(
        &self,
        job_id: &JobId,
        processed: &[(String, String)],
        primary: &(String, String),
        total_templates: u32,
    ) -> PipelineResult<()> {
        let mut patch = HashMap::new();
        if let Ok(json) = serde_json::to_string(
            &processed
                .iter()
                .map(|(key, url)| serde_json::json!({"key": key, "blobURL": url}))
                .collect::<Vec<_>>(),
        ) {
            patch.insert("processed_templates".to_string(), json);
        }
        self.repo.set_metadata(job_id, patch).await?;
        self.repo.set_output(job_id, &primary.1, Utc::now()).await?;

        let progress = JobProgress {
            total_templates,
            completed_templates: processed.len() as u32,
            succeeded_templates: processed.len() as u32,
            failed_templates: total_templates.saturating_sub(processed.len() as u32),
            current_template: None,
        };
        self.repo.update_status(job_id, JobStatus::Completed, Some(progress), None).await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, error: &PipelineError) {
        let details = ErrorDetails::new(error.kind(), error.to_string());
        if let Ok(json) = serde_json::to_string(&details) {
            let mut patch = HashMap::new();
            patch.insert("error_details".to_string(), json);
            if let Err(e) = self.repo.set_metadata(job_id, patch).await {
                warn!(job_id = %job_id, error = %e, "failed to persist error details");
            }
        }
        if let Err(e) = self.repo.update_status(job_id, JobStatus::Failed, None, Some(error.to_string())).await {
            warn!(job_id = %job_id, error = %e, "failed to mark job failed");
        }
    }

    async fn emit_progress(&self, job_id: &JobId, stage: Stage, percent: u8, sub_stage: Option<&str>) {
        let mut patch = HashMap::new();
        patch.insert("current_stage".to_string(), stage.as_str().to_string());
        if let Some(sub) = sub_stage {
            patch.insert("current_sub_stage".to_string(), sub.to_string());
        }
        patch.insert("progress_percent".to_string(), percent.to_string());
        patch.insert("last_updated".to_string(), Utc::now().to_rfc3339());
        if let Err(e) = self.repo.set_metadata(job_id, patch).await {
            warn!(job_id = %job_id, stage = stage.as_str(), error = %e, "failed to emit progress");
        }
    }

    async fn ensure_photos(&self, listing_id: &str, input_files: &[String]) -> PipelineResult<Vec<Photo>> {
        for (order, file_path) in input_files.iter().enumerate() {
            let patch = PhotoPatch { file_path: Some(file_path.clone()), ..Default::default() };
            self.repo.upsert_photo_by_order(listing_id, order as u32, patch).await?;
        }
        let mut photos = self.repo.get_photos(listing_id).await?;
        photos.sort_by_key(|p| p.order);
        Ok(photos)
    }

    async fn prepare_images(
        &self,
        job_id: &JobId,
        listing_id: &str,
        photos: &mut [Photo],
        temp_dir: &Path,
        tracker: &ResourceTracker,
        batching: &BatchController,
    ) -> PipelineResult<()> {
        let cropper = VisionCropper::new();
        let pending: Vec<usize> = photos
            .iter()
            .enumerate()
            .filter(|(_, p)| p.processed_file_path.is_none())
            .map(|(i, _)| i)
            .collect();

        let total = pending.len();
        if total == 0 {
            return Ok(());
        }

        let mut idx = 0usize;
        while idx < pending.len() {
            let batch_size = batching.sample_and_adjust().max(1);
            let end = (idx + batch_size).min(pending.len());
            let chunk = &pending[idx..end];

            let outcomes: Vec<(usize, PipelineResult<String>)> = stream::iter(chunk.iter().map(|&photo_idx| {
                let photo = photos[photo_idx].clone();
                let cropper = &cropper;
                async move {
                    let result = self.crop_one(&photo, job_id, listing_id, cropper, temp_dir, tracker).await;
                    (photo_idx, result)
                }
            }))
            .buffer_unordered(batch_size)
            .collect()
            .await;

            for (photo_idx, result) in outcomes {
                photos[photo_idx].processed_file_path = Some(result?);
            }

            idx = end;
            let percent = ((end as f64 / total as f64) * 100.0) as u8;
            self.emit_progress(job_id, Stage::Vision, percent, Some("image_preparation")).await;
        }

        Ok(())
    }

    async fn crop_one(
        &self,
        photo: &Photo,
        job_id: &JobId,
        listing_id: &str,
        cropper: &VisionCropper,
        temp_dir: &Path,
        tracker: &ResourceTracker,
    ) -> PipelineResult<String> {
        let input_key = self.blob_store.key_from_url(&photo.file_path)?;
        let local_input = temp_dir.join(format!("orig-{}.jpg", photo.order));
        tracker.track(&local_input, "original_image");
        self.blob_store.download(&input_key, &local_input).await?;

        let local_output = temp_dir.join(format!("vision-{}.webp", photo.order));
        tracker.track(&local_output, "vision_webp");
        cropper
            .process(&local_input, &local_output)
            .await
            .map_err(|e| PipelineError::vision_failed(e.to_string()))?;
        tracker.update_state(&local_input, ResourceState::Uploaded);

        let key = keys::processed_vision_key(listing_id, job_id.as_str(), photo.order);
        self.blob_store.upload_file(&local_output, &key, "image/webp").await?;
        tracker.update_state(&local_output, ResourceState::Uploaded);

        let url = self.blob_store.url_from_key(&key);
        self.repo
            .update_photo(&photo.id, PhotoPatch { processed_file_path: Some(url.clone()), ..Default::default() })
            .await?;
        Ok(url)
    }

    async fn generate_motion_clips(
        &self,
        job_id: &JobId,
        listing_id: &str,
        photos: &mut [Photo],
        input: &ExecuteInput,
        temp_dir: &Path,
        batching: &BatchController,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<Vec<String>> {
        let total = photos.len() as u32;

        if input.skip_motion_if_cached && photos.iter().all(Photo::has_motion_clip) {
            debug!(job_id = %job_id, "reusing cached motion clips for every photo");
        } else if !input.skip_motion {
            let to_regenerate: Vec<u32> = if let Some(ctx) = &input.regeneration_context {
                ctx.photos_to_regenerate.iter().map(|p| p.order).collect()
            } else {
                photos
                    .iter()
                    .filter(|p| input.force_regeneration || !p.has_motion_clip())
                    .map(|p| p.order)
                    .collect()
            };

            let mut idx = 0usize;
            while idx < to_regenerate.len() {
                let batch_size = batching.sample_and_adjust().max(1);
                let end = (idx + batch_size).min(to_regenerate.len());
                let batch = &to_regenerate[idx..end];

                let outcomes: Vec<PipelineResult<(u32, String)>> = stream::iter(batch.iter().map(|&order| {
                    let photo = photos
                        .iter()
                        .find(|p| p.order == order)
                        .cloned()
                        .ok_or_else(|| PipelineError::internal(format!("no photo at order {order}")));
                    let cancel = cancel.clone();
                    async move {
                        let photo = photo?;
                        self.generate_one_motion_clip(job_id, listing_id, photo, cancel).await
                    }
                }))
                .buffer_unordered(batch_size)
                .collect()
                .await;

                for outcome in outcomes {
                    let (order, url) = outcome?;
                    if let Some(photo) = photos.iter_mut().find(|p| p.order == order) {
                        photo.runway_video_path = Some(url);
                    }
                }

                idx = end;
            }
        }

        if let Some(ctx) = &input.regeneration_context {
            for existing in &ctx.existing_photos {
                if let Some(photo) = photos.iter_mut().find(|p| p.order == existing.order) {
                    if photo.runway_video_path.is_none() {
                        photo.runway_video_path = existing.runway_video_path.clone();
                    }
                }
            }
        }

        let mut ordered = Vec::with_capacity(total as usize);
        for order in 0..total {
            let url = photos
                .iter()
                .find(|p| p.order == order)
                .and_then(|p| p.runway_video_path.clone())
                .ok_or(PipelineError::MotionMissing(order))?;
            ordered.push(url);
        }
        Ok(ordered)
    }

    async fn generate_one_motion_clip(
        &self,
        job_id: &JobId,
        listing_id: &str,
        photo: Photo,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<(u32, String)> {
        let discriminator = CacheKeyDiscriminator {
            asset_type: AssetType::Runway,
            input_files: Some(vec![photo.file_path.clone()]),
            template: None,
            coordinates: None,
            metadata: None,
        };
        let discriminator_key = cache_key(&discriminator);

        if let Some(cached) = self.asset_cache.get(&discriminator_key).await? {
            return Ok((photo.order, cached));
        }

        let blob_key = keys::motion_clip_key(listing_id, job_id.as_str(), photo.order);
        let motion_provider = self.motion_provider.clone();
        let blob_store = self.blob_store.clone();
        let max_polls = self.motion_max_polls;
        let poll_interval = self.motion_poll_interval;
        let image_url = photo.file_path.clone();

        let retry_config = RetryConfig { max_retries: self.config.retry.max_motion_retries, ..self.config.retry };

        let result = retry_with_backoff(
            "motion_clip_generation",
            &retry_config,
            |_: &PipelineError| true,
            |_attempt| {
                let motion_provider = motion_provider.clone();
                let blob_store = blob_store.clone();
                let blob_key = blob_key.clone();
                let image_url = image_url.clone();
                let cancel = cancel.clone();
                async move {
                    pipeline_providers::generate_motion_clip(
                        motion_provider.as_ref(),
                        blob_store.as_ref(),
                        &image_url,
                        &blob_key,
                        max_polls,
                        poll_interval,
                        cancel,
                    )
                    .await
                    .map_err(PipelineError::from)
                }
            },
        )
        .await;

        let url = match result {
            RetryResult::Success { value, .. } => value,
            RetryResult::Failed { error, .. } => return Err(PipelineError::motion_failed(error.to_string())),
        };

        let current = self.repo.get_photos(listing_id).await?.into_iter().find(|p| p.id == photo.id);
        if let Some(existing_photo) = current {
            if let Some(existing_url) = &existing_photo.runway_video_path {
                if *existing_url != url {
                    return Err(PipelineError::PersistedUrlMismatch {
                        listing_id: listing_id.to_string(),
                        order: photo.order,
                        existing: existing_url.clone(),
                        new: url,
                    });
                }
            }
        }

        self.repo
            .update_photo(&photo.id, PhotoPatch { runway_video_path: Some(url.clone()), ..Default::default() })
            .await?;
        self.asset_cache.put(&discriminator_key, &url, AssetType::Runway, &photo.file_path).await?;

        Ok((photo.order, url))
    }

    async fn validate_motion_clips(
        &self,
        job_id: &JobId,
        clips: &[String],
        temp_dir: &Path,
        tracker: &ResourceTracker,
    ) -> PipelineResult<()> {
        for (order, url) in clips.iter().enumerate() {
            let outcome = self.clip_validator.validate(url, order as u32, job_id.as_str(), temp_dir, tracker, None).await;
            if !outcome.is_ok() {
                return Err(PipelineError::motion_failed(format!("motion clip at order {order} failed validation")));
            }
        }
        Ok(())
    }

    async fn generate_map_clip(
        &self,
        job_id: &JobId,
        listing_id: &str,
        coordinates: &Coordinates,
        temp_dir: &Path,
        tracker: &ResourceTracker,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<(PathBuf, f64)> {
        let _ = &cancel;
        let discriminator = CacheKeyDiscriminator {
            asset_type: AssetType::Map,
            input_files: None,
            template: None,
            coordinates: Some(coordinates.rounded()),
            metadata: None,
        };
        let discriminator_key = cache_key(&discriminator);

        let url = if let Some(cached) = self.asset_cache.get(&discriminator_key).await? {
            cached
        } else {
            let timestamp = Utc::now().timestamp();
            let temp_key = keys::map_clip_temp_key(job_id.as_str(), timestamp);
            let map_provider = self.map_provider.clone();
            let blob_store = self.blob_store.clone();
            let coords = *coordinates;

            let result = retry_with_backoff(
                "map_clip_generation",
                &self.config.retry,
                |_: &PipelineError| true,
                |_attempt| {
                    let map_provider = map_provider.clone();
                    let blob_store = blob_store.clone();
                    let temp_key = temp_key.clone();
                    async move {
                        match tokio::time::timeout(
                            Duration::from_secs(300),
                            pipeline_providers::produce_map_clip(map_provider.as_ref(), blob_store.as_ref(), &coords, &temp_key),
                        )
                        .await
                        {
                            Ok(Ok(url)) => Ok(url),
                            Ok(Err(e)) => Err(PipelineError::from(e)),
                            Err(_) => Err(PipelineError::timeout("map clip render exceeded its 5-minute attempt budget")),
                        }
                    }
                },
            )
            .await;

            let temp_url = match result {
                RetryResult::Success { value, .. } => value,
                RetryResult::Failed { error, .. } => return Err(PipelineError::map_failed(error.to_string())),
            };

            let temp_blob_key = self.blob_store.key_from_url(&temp_url)?;
            let durable_key = keys::map_clip_key(listing_id, job_id.as_str(), timestamp);
            self.blob_store.mv(&temp_blob_key, &durable_key).await?;
            let durable_url = self.blob_store.url_from_key(&durable_key);

            let (lat, lng) = coordinates.rounded();
            self.asset_cache
                .put(&discriminator_key, &durable_url, AssetType::Map, &format!("{lat},{lng}"))
                .await?;
            durable_url
        };

        let local_path = temp_dir.join("map_clip.mp4");
        let key = self.blob_store.key_from_url(&url)?;
        tracker.track(&local_path, "map_clip");
        self.blob_store.download(&key, &local_path).await?;

        let outcome = self
            .clip_validator
            .validate(&url, u32::MAX, job_id.as_str(), temp_dir, tracker, Some(MetadataRequirement { min_duration_secs: 1.0 }))
            .await;

        match outcome {
            ValidationOutcome::Ok { duration } => {
                tracker.update_state(&local_path, ResourceState::Uploaded);
                Ok((local_path, duration))
            }
            ValidationOutcome::Fail { reason } => Err(PipelineError::map_failed(reason)),
        }
    }

    async fn acquire_watermark(&self, temp_dir: &Path, tracker: &ResourceTracker) -> Option<WatermarkConfig> {
        let watermark_local = temp_dir.join("watermark.png");
        let watermark_key = keys::watermark_key("default.png");

        match self.blob_store.download(&watermark_key, &watermark_local).await {
            Ok(()) => {
                tracker.track(&watermark_local, "watermark");
                tracker.update_state(&watermark_local, ResourceState::Uploaded);
                Some(WatermarkConfig::default().with_image_path(watermark_local.to_string_lossy().into_owned()))
            }
            Err(e) => {
                warn!(error = %e, "watermark asset unavailable, rendering without overlay");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_template_with_retry(
        &self,
        job_id: &JobId,
        listing_id: &str,
        template: &TemplateDefinition,
        motion_clips: &[String],
        map_local: Option<&Path>,
        map_duration: Option<f64>,
        job_temp_dir: &Path,
        watermark: Option<&WatermarkConfig>,
    ) -> PipelineResult<(String, String)> {
        let retry_config = RetryConfig { max_retries: template.max_retries, ..self.config.retry };
        let timeout_dur = Duration::from_millis(template.timeout_ms);

        let result = retry_with_backoff(
            "process_template",
            &retry_config,
            |_: &PipelineError| true,
            |_attempt| async {
                match tokio::time::timeout(
                    timeout_dur,
                    self.process_template(job_id, listing_id, template, motion_clips, map_local, map_duration, job_temp_dir, watermark),
                )
                .await
                {
                    Ok(inner) => inner,
                    Err(_) => Err(PipelineError::timeout(format!("template {} exceeded {:?}", template.key, timeout_dur))),
                }
            },
        )
        .await;

        match result.into_result() {
            Ok(pair) => Ok(pair),
            Err(e) => {
                warn!(template = %template.key, error = %e, "template render exhausted retries");
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_template(
        &self,
        job_id: &JobId,
        listing_id: &str,
        template: &TemplateDefinition,
        motion_clips: &[String],
        map_local: Option<&Path>,
        map_duration: Option<f64>,
        job_temp_dir: &Path,
        watermark: Option<&WatermarkConfig>,
    ) -> PipelineResult<(String, String)> {
        if template.durations.is_empty() || template.durations.iter().any(|d| *d <= 0.0) {
            return Err(PipelineError::internal(format!("template {} has invalid durations", template.key)));
        }

        let template_temp_dir = job_temp_dir.join(format!("template-{}", template.key));
        tokio::fs::create_dir_all(&template_temp_dir)
            .await
            .map_err(|e| PipelineError::internal(format!("failed to create template temp dir: {e}")))?;

        let tracker = ResourceTracker::new();
        let result = tracker
            .with_tracking(|| {
                self.render_template_body(job_id, listing_id, template, motion_clips, map_local, map_duration, &template_temp_dir, &tracker, watermark)
            })
            .await;

        let _ = tokio::fs::remove_dir_all(&template_temp_dir).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_template_body(
        &self,
        job_id: &JobId,
        listing_id: &str,
        template: &TemplateDefinition,
        motion_clips: &[String],
        map_local: Option<&Path>,
        map_duration: Option<f64>,
        temp_dir: &Path,
        tracker: &ResourceTracker,
        watermark: Option<&WatermarkConfig>,
    ) -> PipelineResult<(String, String)> {
        let referenced_orders: Vec<u32> = {
            let mut orders: Vec<u32> = template
                .sequence
                .iter()
                .filter_map(|s| match s {
                    SequenceSlot::Photo(order) => Some(*order),
                    SequenceSlot::Map => None,
                })
                .collect();
            orders.sort_unstable();
            orders.dedup();
            orders
        };

        let prepared: Vec<(u32, PathBuf, f64)> = stream::iter(referenced_orders.iter().filter_map(|&order| {
            motion_clips.get(order as usize).map(|url| (order, url.clone()))
        }))
        .filter_map(|(order, url)| async move { self.prepare_template_clip(job_id, order, &url, temp_dir, tracker).await })
        .collect()
        .await;

        let clip_paths: HashMap<u32, (PathBuf, f64)> =
            prepared.into_iter().map(|(order, path, duration)| (order, (path, duration))).collect();

        let mut clips = Vec::new();
        for (i, slot) in template.sequence.iter().enumerate() {
            let duration_cap = template.durations[i];
            let transition = template.transitions.get(i).cloned().flatten();

            match slot {
                SequenceSlot::Map => {
                    let Some(path) = map_local else {
                        return Err(PipelineError::MapRequired);
                    };
                    clips.push(ClipSpec {
                        path: path.to_path_buf(),
                        duration: duration_cap.min(map_duration.unwrap_or(duration_cap)),
                        transition,
                        color_correction: template.color_correction.clone(),
                        reverse: template.reverse_clips,
                    });
                }
                SequenceSlot::Photo(order) => {
                    if let Some((path, measured)) = clip_paths.get(order) {
                        clips.push(ClipSpec {
                            path: path.clone(),
                            duration: duration_cap.min(*measured),
                            transition,
                            color_correction: template.color_correction.clone(),
                            reverse: template.reverse_clips,
                        });
                    } else {
                        warn!(template = %template.key, order, "dropping sequence slot with no valid clip");
                    }
                }
            }
        }

        if clips.is_empty() {
            return Err(PipelineError::NoValidClips);
        }

        let music = if let Some(music_spec) = &template.music {
            match self.resolve_music(music_spec, temp_dir, tracker).await {
                Ok(path) => Some((path, music_spec.clone())),
                Err(e) => {
                    warn!(template = %template.key, error = %e, "proceeding without music");
                    None
                }
            }
        } else {
            None
        };

        let mux_template = MuxTemplate {
            name: template.key.clone(),
            description: None,
            color_correction: template.color_correction.clone(),
            music,
            output_options: Vec::new(),
        };

        let output_local = temp_dir.join(format!("{}.mp4", template.key));
        tracker.track(&output_local, "template_output");
        stitch(&clips, &output_local, &mux_template, watermark)
            .await
            .map_err(|e| PipelineError::mux_failed(e.to_string()))?;
        tracker.update_state(&output_local, ResourceState::Processing);

        let local_size = tokio::fs::metadata(&output_local)
            .await
            .map_err(|e| PipelineError::internal(format!("failed to stat rendered output: {e}")))?
            .len();

        let output_key = keys::template_output_key(listing_id, job_id.as_str(), &template.key);
        self.blob_store
            .upload_file(&output_local, &output_key, "video/mp4")
            .await
            .map_err(|e| PipelineError::upload_failed(e.to_string()))?;

        match self.blob_store.head(&output_key).await? {
            Some(info) if info.size > 0 && info.size == local_size => {}
            _ => return Err(PipelineError::upload_failed(format!("upload verification failed for template {}", template.key))),
        }

        tracker.update_state(&output_local, ResourceState::Uploaded);
        let url = self.blob_store.url_from_key(&output_key);
        info!(template = %template.key, url = %url, "template rendered");
        Ok((template.key.clone(), url))
    }

    async fn prepare_template_clip(
        &self,
        job_id: &JobId,
        order: u32,
        url: &str,
        temp_dir: &Path,
        tracker: &ResourceTracker,
    ) -> Option<(u32, PathBuf, f64)> {
        let outcome = self.clip_validator.validate(url, order, job_id.as_str(), temp_dir, tracker, None).await;
        let duration = match outcome {
            ValidationOutcome::Ok { duration } => duration,
            ValidationOutcome::Fail { reason } => {
                warn!(order, reason = %reason, "dropping invalid clip from template render");
                return None;
            }
        };

        let key = self.blob_store.key_from_url(url).ok()?;
        let local_path = temp_dir.join(format!("clip-{order}.mp4"));
        tracker.track(&local_path, "template_input_clip");
        if self.blob_store.download(&key, &local_path).await.is_err() {
            tracker.update_state(&local_path, ResourceState::Failed);
            return None;
        }
        tracker.update_state(&local_path, ResourceState::Uploaded);
        Some((order, local_path, duration))
    }

    async fn resolve_music(
        &self,
        music: &pipeline_models::MusicSpec,
        temp_dir: &Path,
        tracker: &ResourceTracker,
    ) -> PipelineResult<PathBuf> {
        let discriminator = CacheKeyDiscriminator {
            asset_type: AssetType::Template,
            input_files: None,
            template: Some(music.track.clone()),
            coordinates: None,
            metadata: None,
        };
        let discriminator_key = cache_key(&discriminator);
        let local_path = temp_dir.join(format!("music-{}.mp3", music.track));
        tracker.track(&local_path, "music");

        if let Some(cached_url) = self.asset_cache.get(&discriminator_key).await? {
            let key = self.blob_store.key_from_url(&cached_url)?;
            self.blob_store.download(&key, &local_path).await?;
        } else {
            let key = keys::music_key(&music.track);
            self.blob_store.download(&key, &local_path).await?;
            let url = self.blob_store.url_from_key(&key);
            self.asset_cache.put(&discriminator_key, &url, AssetType::Template, &music.track).await?;
        }

        pipeline_media::validate_music_file(&local_path)
            .await
            .map_err(|e| PipelineError::internal(format!("music file failed validation: {e}")))?;
        tracker.update_state(&local_path, ResourceState::Uploaded);
        Ok(local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_controller_halves_under_critical_pressure_and_respects_floor() {
        let config = BatchingConfig { default_batch_size: 4, min_batch_size: 1, memory_warn_frac: 0.70, memory_critical_frac: 0.80 };
        let controller = BatchController::new(&config);
        controller.current.store(4, Ordering::SeqCst);

        // Simulate the halving logic directly, since real memory pressure
        // cannot be driven deterministically in a unit test.
        let reduced = (4usize / 2).max(config.min_batch_size);
        assert_eq!(reduced, 2);
        let floor = (1usize / 2).max(config.min_batch_size);
        assert_eq!(floor, 1);
    }

    #[test]
    fn batch_controller_starts_at_default() {
        let config = BatchingConfig::default();
        let controller = BatchController::new(&config);
        assert_eq!(controller.current.load(Ordering::SeqCst), config.default_batch_size);
    }
}

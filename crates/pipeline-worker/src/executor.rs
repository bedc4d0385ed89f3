//! Job executor that claims `pipeline-queue` entries and drives them
//! through a `pipeline_core::Pipeline`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pipeline_core::{JobLogger, Pipeline};
use pipeline_models::ErrorDetails;
use pipeline_queue::{JobQueue, ProgressChannel, QueueJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Job executor that claims and runs jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    progress: Arc<ProgressChannel>,
    pipeline: Arc<Pipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: JobQueue, progress: ProgressChannel, pipeline: Pipeline) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            progress: Arc::new(progress),
            pipeline: Arc::new(pipeline),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        let queue_clone = Arc::clone(&self.queue);
        let progress_clone = Arc::clone(&self.progress);
        let pipeline_clone = Arc::clone(&self.pipeline);
        let consumer_name = self.consumer_name.clone();
        let semaphore_clone = Arc::clone(&self.job_semaphore);
        let claim_interval = self.config.claim_interval;
        let claim_min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = queue_clone.process_scheduled_jobs().await {
                            warn!("Failed to process scheduled jobs: {}", e);
                        }
                        match queue_clone.claim_pending(&consumer_name, claim_min_idle_ms, 5).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let queue = Arc::clone(&queue_clone);
                                    let progress = Arc::clone(&progress_clone);
                                    let pipeline = Arc::clone(&pipeline_clone);
                                    let permit = match semaphore_clone.clone().acquire_owned().await {
                                        Ok(p) => p,
                                        Err(_) => break,
                                    };

                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(pipeline, queue, progress, message_id, job).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self.queue.consume(&self.consumer_name, 1000, available.min(5)).await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let queue = Arc::clone(&self.queue);
            let progress = Arc::clone(&self.progress);
            let pipeline = Arc::clone(&self.pipeline);
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(pipeline, queue, progress, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Run one job end to end, acking, retrying, or dead-lettering it
    /// based on the resulting `PipelineError`'s retryability.
    async fn execute_job(pipeline: Arc<Pipeline>, queue: Arc<JobQueue>, progress: Arc<ProgressChannel>, message_id: String, job: QueueJob) {
        let job_id = job.job_id().clone();
        let logger = JobLogger::new(&job_id, "worker");
        logger.log_start(&format!("claimed message {message_id}"));

        progress.mark_active(&job_id).await.ok();
        progress.heartbeat(&job_id).await.ok();

        let result = match &job {
            QueueJob::Execute(j) => pipeline.execute(j.input.clone()).await,
            QueueJob::RegeneratePhotos(j) => pipeline.regenerate_photos(&j.job_id, &j.photo_ids).await,
        };

        progress.mark_inactive(&job_id).await.ok();
        progress.clear_heartbeat(&job_id).await.ok();

        match result {
            Ok(output_url) => {
                logger.log_completion(&output_url);
                progress.done(&job_id, output_url).await.ok();
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }
            }
            Err(pipeline_error) => {
                logger.log_error(&pipeline_error.to_string());

                if pipeline_error.is_permanent_failure() {
                    warn!("Job {} permanently failed, moving to DLQ", job_id);
                    Self::dead_letter(&queue, &progress, &job_id, &job, &message_id, &pipeline_error.to_string()).await;
                    return;
                }

                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_retries = queue.max_retries();

                if !pipeline_error.is_retryable() || retry_count >= max_retries {
                    warn!("Job {} exhausted retries ({}/{}), moving to DLQ", job_id, retry_count, max_retries);
                    Self::dead_letter(&queue, &progress, &job_id, &job, &message_id, &pipeline_error.to_string()).await;
                } else {
                    info!("Job {} will be retried (attempt {}/{})", job_id, retry_count, max_retries);
                }
            }
        }
    }

    async fn dead_letter(
        queue: &JobQueue,
        progress: &ProgressChannel,
        job_id: &pipeline_models::JobId,
        job: &QueueJob,
        message_id: &str,
        error: &str,
    ) {
        if let Err(e) = queue.dlq(message_id, job, error).await {
            error!("Failed to move job {} to DLQ: {}", job_id, e);
        }
        if let Err(e) = queue.clear_dedup(job).await {
            warn!("Failed to clear dedup key for job {}: {}", job_id, e);
        }
        progress
            .error(job_id, ErrorDetails::new(pipeline_models::ErrorKind::Internal, error.to_string()))
            .await
            .ok();
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

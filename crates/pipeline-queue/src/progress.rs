//! Progress events via Redis Pub/Sub with persistence and heartbeat support.
//!
//! This module provides:
//! - Real-time `StageProgress`/error events via Redis Pub/Sub
//! - Persistent progress history via Redis Sorted Sets
//! - Worker heartbeat tracking for stale job detection

use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pipeline_models::{ErrorDetails, JobId, Stage, StageProgress};

use crate::error::QueueResult;

/// Prefix for worker heartbeat keys: `heartbeat:{job_id}`
const HEARTBEAT_KEY_PREFIX: &str = "heartbeat:";

/// Prefix for progress history sorted sets: `progress:history:{job_id}`
const PROGRESS_HISTORY_PREFIX: &str = "progress:history:";

/// Prefix for the active-jobs sorted set.
const ACTIVE_JOBS_KEY: &str = "jobs:active";

/// Heartbeat TTL - a job is considered dead after this long without one.
pub const HEARTBEAT_TTL_SECS: u64 = 60;

/// Progress history TTL - retain events for this long for recovery.
pub const PROGRESS_HISTORY_TTL_SECS: u64 = 3600;

/// Grace period before marking a job without heartbeat as stale.
pub const STALE_GRACE_PERIOD_SECS: i64 = 120;

/// Stale threshold - no heartbeat for this long means stale.
pub const STALE_THRESHOLD_SECS: i64 = 60;

/// One event published on a job's progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// `{stage, percent}` emission, as in §4.1 step 3/5/9 of the design.
    Stage { job_id: JobId, progress: StageProgress },
    /// A plain log line, for operator visibility.
    Log { job_id: JobId, message: String, timestamp_ms: i64 },
    /// Terminal failure with structured details.
    Error { job_id: JobId, details: ErrorDetails },
    /// Terminal success with the primary output's blob URL.
    Done { job_id: JobId, output_url: String, timestamp_ms: i64 },
}

impl ProgressEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            ProgressEvent::Stage { job_id, .. } => job_id,
            ProgressEvent::Log { job_id, .. } => job_id,
            ProgressEvent::Error { job_id, .. } => job_id,
            ProgressEvent::Done { job_id, .. } => job_id,
        }
    }
}

/// Channel for publishing/subscribing to a job's progress events.
#[derive(Clone)]
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }

    /// The Pub/Sub channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    /// Publish an event with dual-write to Pub/Sub (real-time) and a
    /// timestamp-scored sorted set (history/recovery).
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(event.job_id());
        let history_key = format!("{}{}", PROGRESS_HISTORY_PREFIX, event.job_id());
        let payload = serde_json::to_string(event)?;
        let score = Utc::now().timestamp_millis() as f64;

        debug!("Publishing progress event to {}", channel);

        redis::pipe()
            .publish(&channel, &payload)
            .ignore()
            .zadd(&history_key, &payload, score)
            .ignore()
            .expire(&history_key, PROGRESS_HISTORY_TTL_SECS as i64)
            .ignore()
            .exec_async(&mut conn)
            .await?;

        Ok(())
    }

    /// Publish a `{stage, percent}` progress update.
    pub async fn stage(&self, job_id: &JobId, progress: StageProgress) -> QueueResult<()> {
        self.publish(&ProgressEvent::Stage { job_id: job_id.clone(), progress }).await
    }

    /// Publish a log line.
    pub async fn log(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(&ProgressEvent::Log {
            job_id: job_id.clone(),
            message: message.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
        })
        .await
    }

    /// Publish a terminal error.
    pub async fn error(&self, job_id: &JobId, details: ErrorDetails) -> QueueResult<()> {
        self.publish(&ProgressEvent::Error { job_id: job_id.clone(), details }).await
    }

    /// Publish terminal success.
    pub async fn done(&self, job_id: &JobId, output_url: impl Into<String>) -> QueueResult<()> {
        self.publish(&ProgressEvent::Done {
            job_id: job_id.clone(),
            output_url: output_url.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
        })
        .await
    }

    /// Convenience for emitting a vision/motion/template stage update at a
    /// given percent with no sub-stage.
    pub async fn at_percent(&self, job_id: &JobId, stage: Stage, percent: u8) -> QueueResult<()> {
        self.stage(job_id, StageProgress::new(stage, percent)).await
    }

    /// Subscribe to progress events for a job.
    pub async fn subscribe(&self, job_id: &JobId) -> QueueResult<std::pin::Pin<Box<dyn futures::Stream<Item = ProgressEvent> + Send>>> {
        use futures::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }

    // ------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------

    /// Refresh the worker heartbeat for a job. Workers call this roughly
    /// every `HEARTBEAT_TTL_SECS / 2` while processing.
    pub async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, job_id);
        let now = Utc::now().timestamp();

        conn.set_ex::<_, _, ()>(&key, now, HEARTBEAT_TTL_SECS).await?;
        Ok(())
    }

    /// Whether a job has an active (non-expired) heartbeat.
    pub async fn is_alive(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, job_id);
        let exists: bool = conn.exists(&key).await?;
        Ok(exists)
    }

    /// Clear a job's heartbeat on completion.
    pub async fn clear_heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", HEARTBEAT_KEY_PREFIX, job_id);
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Progress events for `job_id` with timestamp (ms) >= `since_ms`.
    pub async fn get_history_since(&self, job_id: &JobId, since_ms: i64) -> QueueResult<Vec<ProgressEvent>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", PROGRESS_HISTORY_PREFIX, job_id);

        let events: Vec<String> = conn.zrangebyscore(&key, since_ms as f64, "+inf").await?;
        Ok(events.into_iter().filter_map(|s| serde_json::from_str(&s).ok()).collect())
    }

    /// Full progress history for a job.
    pub async fn get_full_history(&self, job_id: &JobId) -> QueueResult<Vec<ProgressEvent>> {
        self.get_history_since(job_id, 0).await
    }

    /// Clear progress history for a job.
    pub async fn clear_history(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", PROGRESS_HISTORY_PREFIX, job_id);
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Active-jobs tracking
    // ------------------------------------------------------------------

    /// Record a job as actively processing.
    pub async fn mark_active(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let score = Utc::now().timestamp_millis() as f64;
        conn.zadd::<_, _, _, ()>(ACTIVE_JOBS_KEY, job_id.to_string(), score).await?;
        Ok(())
    }

    /// Remove a job from the active set (completion or failure).
    pub async fn mark_inactive(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.zrem::<_, _, ()>(ACTIVE_JOBS_KEY, job_id.to_string()).await?;
        Ok(())
    }

    /// All job IDs currently marked active.
    pub async fn get_active_job_ids(&self) -> QueueResult<Vec<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.zrange(ACTIVE_JOBS_KEY, 0, -1).await?;
        Ok(ids)
    }

    /// Count of jobs currently marked active.
    pub async fn get_active_job_count(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: u64 = conn.zcard(ACTIVE_JOBS_KEY).await?;
        Ok(count)
    }
}

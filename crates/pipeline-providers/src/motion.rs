//! `MotionClipProvider`: submits (image -> short video) tasks to the
//! external image-to-video model, polls to completion, and returns a blob
//! URL. Polling is a cancellable sleep between status reads, not a blocking
//! sleep, so an orchestrator's cancellation is honored promptly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pipeline_storage::BlobStore;

use crate::error::{ProviderError, ProviderResult};

const PROMPT: &str = "Move forward slowly";
const CLIP_DURATION_SECS: f64 = 5.0;
const RATIO: (u32, u32) = (768, 1280);
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Status of a submitted external model task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub output_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// The external image-to-video model collaborator interface.
#[async_trait]
pub trait MotionClipProvider: Send + Sync {
    async fn create_task(
        &self,
        image_url: &str,
        prompt: &str,
        duration_secs: f64,
        ratio: (u32, u32),
    ) -> ProviderResult<String>;

    async fn get_task(&self, task_id: &str) -> ProviderResult<TaskResult>;

    async fn cancel_task(&self, task_id: &str) -> ProviderResult<()>;
}

/// Configuration for the hosted image-to-video model.
#[derive(Debug, Clone)]
pub struct MotionProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub poll_interval: Duration,
    /// Number of polls allowed before a single `generate` attempt times out.
    /// Combined with `MAX_RUNWAY_RETRIES` at the call site this bounds total
    /// wall-clock spent on one photo.
    pub max_polls: u32,
}

impl MotionProviderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("MOTION_MODEL_BASE_URL")
                .unwrap_or_else(|_| "https://api.motionmodel.example".to_string()),
            api_key: std::env::var("MOTION_MODEL_API_KEY").unwrap_or_default(),
            poll_interval: POLL_INTERVAL,
            max_polls: std::env::var("MOTION_MODEL_MAX_POLLS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest<'a> {
    #[serde(rename = "promptImage")]
    prompt_image: &'a str,
    #[serde(rename = "promptText")]
    prompt_text: &'a str,
    duration: f64,
    ratio: String,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GetTaskResponse {
    status: TaskStatus,
    #[serde(default)]
    output: Vec<String>,
    #[serde(default)]
    failure: Option<String>,
}

/// REST-backed `MotionClipProvider`.
pub struct HostedMotionClipProvider {
    http: Client,
    config: MotionProviderConfig,
}

impl HostedMotionClipProvider {
    pub fn new(config: MotionProviderConfig) -> ProviderResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(MotionProviderConfig::from_env())
    }
}

#[async_trait]
impl MotionClipProvider for HostedMotionClipProvider {
    async fn create_task(
        &self,
        image_url: &str,
        prompt: &str,
        duration_secs: f64,
        ratio: (u32, u32),
    ) -> ProviderResult<String> {
        let body = CreateTaskRequest {
            prompt_image: image_url,
            prompt_text: prompt,
            duration: duration_secs,
            ratio: format!("{}:{}", ratio.0, ratio.1),
        };

        let resp = self
            .http
            .post(format!("{}/v1/image_to_video", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: CreateTaskResponse = resp.json().await?;
        debug!(task_id = %parsed.id, "created motion clip task");
        Ok(parsed.id)
    }

    async fn get_task(&self, task_id: &str) -> ProviderResult<TaskResult> {
        let resp = self
            .http
            .get(format!("{}/v1/tasks/{task_id}", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?
            .error_for_status()?;

        let parsed: GetTaskResponse = resp.json().await?;
        Ok(TaskResult {
            status: parsed.status,
            output_url: parsed.output.into_iter().next(),
            failure_reason: parsed.failure,
        })
    }

    async fn cancel_task(&self, task_id: &str) -> ProviderResult<()> {
        let _ = self
            .http
            .post(format!("{}/v1/tasks/{task_id}/cancel", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;
        Ok(())
    }
}

/// Submits a photo, polls to completion, and uploads the produced clip to
/// `blob_store` under `key`. Returns the blob URL.
///
/// `cancel` is watched between polls; when it flips to `true` the in-flight
/// task is cancelled best-effort and `ProviderError::Cancelled` is returned.
pub async fn generate(
    provider: &dyn MotionClipProvider,
    blob_store: &dyn BlobStore,
    image_blob_url: &str,
    key: &str,
    max_polls: u32,
    poll_interval: Duration,
    mut cancel: watch::Receiver<bool>,
) -> ProviderResult<String> {
    let task_id = provider
        .create_task(image_blob_url, PROMPT, CLIP_DURATION_SECS, RATIO)
        .await?;

    let mut polls = 0u32;
    loop {
        if *cancel.borrow() {
            provider.cancel_task(&task_id).await.ok();
            return Err(ProviderError::Cancelled);
        }

        let result = provider.get_task(&task_id).await?;
        match result.status {
            TaskStatus::Succeeded => {
                let output_url = result
                    .output_url
                    .ok_or_else(|| ProviderError::InvalidOutput("succeeded task has no output".into()))?;
                let bytes = download_raw(&output_url).await?;
                blob_store.upload(bytes, key, "video/mp4").await?;
                let url = blob_store.url_from_key(key);
                info!(task_id = %task_id, url = %url, "motion clip generated");
                return Ok(url);
            }
            TaskStatus::Failed => {
                return Err(ProviderError::TaskFailed(
                    result.failure_reason.unwrap_or_else(|| "unknown failure".to_string()),
                ));
            }
            TaskStatus::Pending | TaskStatus::Processing => {
                polls += 1;
                if polls >= max_polls {
                    provider.cancel_task(&task_id).await.ok();
                    return Err(ProviderError::PollTimeout(poll_interval * max_polls));
                }
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            provider.cancel_task(&task_id).await.ok();
                            return Err(ProviderError::Cancelled);
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
}

async fn download_raw(url: &str) -> ProviderResult<Vec<u8>> {
    let resp = Client::new().get(url).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    if bytes.is_empty() {
        warn!(url, "downloaded motion clip is empty");
    }
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_prompt_and_ratio() {
        assert_eq!(PROMPT, "Move forward slowly");
        assert_eq!(CLIP_DURATION_SECS, 5.0);
        assert_eq!(RATIO, (768, 1280));
    }
}

//! Job definitions for the production pipeline.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued and has not started execution.
    #[default]
    Pending,
    /// Pipeline.Execute is actively running for this job.
    Processing,
    /// All requested templates produced a usable asset.
    Completed,
    /// Execution ended in a terminal, non-retryable failure.
    Failed,
    /// Job is being reprocessed for a subset of templates.
    Reprocessing,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Reprocessing => "reprocessing",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-template progress counters tracked while a job is executing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct JobProgress {
    /// Total number of templates requested for this job.
    pub total_templates: u32,
    /// Number of templates that have finished (success or failure).
    pub completed_templates: u32,
    /// Number of templates that produced a usable asset.
    pub succeeded_templates: u32,
    /// Number of templates that failed permanently.
    pub failed_templates: u32,
    /// Template currently being produced, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_template: Option<String>,
}

impl JobProgress {
    pub fn new(total_templates: u32) -> Self {
        Self {
            total_templates,
            ..Default::default()
        }
    }

    pub fn percentage(&self) -> u32 {
        if self.total_templates == 0 {
            return 0;
        }
        ((self.completed_templates as f64 / self.total_templates as f64) * 100.0) as u32
    }
}

/// A production job: render one or more video templates for a listing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,

    /// Listing this job belongs to.
    pub listing_id: String,

    /// User who triggered the job.
    pub user_id: String,

    /// Templates to render. Empty means "use the catalog's defaults".
    #[serde(default)]
    pub template_default: Vec<String>,

    /// Job lifecycle state.
    #[serde(default)]
    pub status: JobStatus,

    /// Progress counters.
    #[serde(default)]
    pub progress: JobProgress,

    /// Source photo keys supplied by the caller.
    #[serde(default)]
    pub input_files: Vec<String>,

    /// Blob key of the primary produced output, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,

    /// Free-form metadata carried alongside the job (listing address, agent id, etc).
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Terminal error message, if the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `Pending` state.
    pub fn new(
        listing_id: impl Into<String>,
        user_id: impl Into<String>,
        input_files: Vec<String>,
        template_default: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        let total_templates = template_default.len() as u32;
        Self {
            id: JobId::new(),
            listing_id: listing_id.into(),
            user_id: user_id.into(),
            template_default,
            status: JobStatus::Pending,
            progress: JobProgress::new(total_templates),
            input_files,
            output_file: None,
            metadata: HashMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition to `Processing`.
    pub fn start(mut self) -> Self {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Transition to `Completed`.
    pub fn complete(mut self, output_file: impl Into<String>) -> Self {
        self.status = JobStatus::Completed;
        self.output_file = Some(output_file.into());
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }

    /// Transition to `Failed` with a terminal error.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new("listing-1", "user-1", vec!["raw/a.jpg".into()], vec!["standard".into()]);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress.total_templates, 1);
    }

    #[test]
    fn job_transitions() {
        let job = Job::new("listing-1", "user-1", vec![], vec!["standard".into()]).start();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        let done = job.complete("videos/listing-1/standard.mp4");
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.output_file.as_deref(), Some("videos/listing-1/standard.mp4"));
    }
}

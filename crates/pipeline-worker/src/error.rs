//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline_core::PipelineError),

    #[error("Queue error: {0}")]
    Queue(#[from] pipeline_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] pipeline_storage::StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] pipeline_providers::ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the underlying failure is worth retrying, deferring to
    /// `PipelineError::is_retryable` when that's the cause.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Pipeline(e) => e.is_retryable(),
            WorkerError::Queue(_) | WorkerError::Storage(_) | WorkerError::Provider(_) => true,
            WorkerError::JobFailed(_) | WorkerError::ConfigError(_) | WorkerError::Io(_) => false,
        }
    }

    /// Whether retrying can never succeed and the job should go straight
    /// to the dead-letter queue.
    pub fn is_permanent_failure(&self) -> bool {
        match self {
            WorkerError::Pipeline(e) => e.is_permanent_failure(),
            _ => false,
        }
    }
}

//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("external task failed: {0}")]
    TaskFailed(String),

    #[error("polling timed out after {0:?}")]
    PollTimeout(std::time::Duration),

    #[error("invalid output from provider: {0}")]
    InvalidOutput(String),

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] pipeline_storage::StorageError),

    #[error("task was cancelled")]
    Cancelled,
}

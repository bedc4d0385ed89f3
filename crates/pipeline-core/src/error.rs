//! Pipeline error types.
//!
//! `PipelineError` wraps every lower-layer collaborator's error via
//! `#[from]` and classifies each variant into the `ErrorKind` enumerated in
//! the error-handling design, with `is_retryable`/`is_permanent_failure`
//! predicates in the shape of the reference worker's `WorkerError`.

use thiserror::Error;

use pipeline_models::ErrorKind;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("listing is locked: {0}")]
    Locked(String),

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("vision processing failed: {0}")]
    VisionFailed(String),

    #[error("motion clip generation failed: {0}")]
    MotionFailed(String),

    #[error("motion clip vector has a gap at order {0}")]
    MotionMissing(u32),

    #[error("persisted motion clip URL mismatch for (listing {listing_id}, order {order}): existing={existing} new={new}")]
    PersistedUrlMismatch {
        listing_id: String,
        order: u32,
        existing: String,
        new: String,
    },

    #[error("map clip generation failed: {0}")]
    MapFailed(String),

    #[error("template requires a map clip but none is available")]
    MapRequired,

    #[error("no valid input clips remained after validation")]
    NoValidClips,

    #[error("video muxing failed: {0}")]
    MuxFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("no template succeeded")]
    NoTemplateSucceeded,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] pipeline_storage::StorageError),

    #[error("repository error: {0}")]
    Repository(#[from] pipeline_repo::FirestoreError),

    #[error("media error: {0}")]
    Media(#[from] pipeline_media::MediaError),

    #[error("provider error: {0}")]
    Provider(#[from] pipeline_providers::ProviderError),
}

impl PipelineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn vision_failed(msg: impl Into<String>) -> Self {
        Self::VisionFailed(msg.into())
    }

    pub fn motion_failed(msg: impl Into<String>) -> Self {
        Self::MotionFailed(msg.into())
    }

    pub fn map_failed(msg: impl Into<String>) -> Self {
        Self::MapFailed(msg.into())
    }

    pub fn mux_failed(msg: impl Into<String>) -> Self {
        Self::MuxFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Maps this error onto the `ErrorKind` enumerated in §7, including
    /// kinds wrapped from lower-layer collaborators.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Locked(_) => ErrorKind::Locked,
            PipelineError::InputInvalid(_) => ErrorKind::InputInvalid,
            PipelineError::VisionFailed(_) => ErrorKind::VisionFailed,
            PipelineError::MotionFailed(_) => ErrorKind::MotionFailed,
            PipelineError::MotionMissing(_) => ErrorKind::MotionMissing,
            PipelineError::PersistedUrlMismatch { .. } => ErrorKind::PersistedUrlMismatch,
            PipelineError::MapFailed(_) => ErrorKind::MapFailed,
            PipelineError::MapRequired => ErrorKind::MapRequired,
            PipelineError::NoValidClips => ErrorKind::NoValidClips,
            PipelineError::MuxFailed(_) => ErrorKind::MuxFailed,
            PipelineError::UploadFailed(_) => ErrorKind::UploadFailed,
            PipelineError::NoTemplateSucceeded => ErrorKind::NoTemplateSucceeded,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Internal(_) => ErrorKind::Internal,
            PipelineError::Storage(_) => ErrorKind::UploadFailed,
            PipelineError::Repository(_) => ErrorKind::Internal,
            PipelineError::Media(_) => ErrorKind::MuxFailed,
            PipelineError::Provider(_) => ErrorKind::MotionFailed,
        }
    }

    /// Whether a retry wrapper should attempt this operation again.
    ///
    /// Transient collaborator failures and timeouts are retryable;
    /// structural failures (bad input, missing map, invariant violations)
    /// are not — retrying would just reproduce them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Storage(_)
                | PipelineError::Repository(_)
                | PipelineError::Media(_)
                | PipelineError::Provider(_)
                | PipelineError::Timeout(_)
                | PipelineError::MotionFailed(_)
                | PipelineError::MapFailed(_)
                | PipelineError::UploadFailed(_)
                | PipelineError::MuxFailed(_)
        )
    }

    /// Whether this error represents a terminal, non-retryable job failure
    /// (distinct from `is_retryable`: some non-retryable errors, like
    /// `Cancelled`, are not "failures" to surface as permanent either).
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::InputInvalid(_)
                | PipelineError::MapRequired
                | PipelineError::NoValidClips
                | PipelineError::NoTemplateSucceeded
                | PipelineError::PersistedUrlMismatch { .. }
                | PipelineError::MotionMissing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_structural_errors_as_permanent() {
        assert!(PipelineError::MapRequired.is_permanent_failure());
        assert!(!PipelineError::MapRequired.is_retryable());
    }

    #[test]
    fn classifies_transient_collaborator_errors_as_retryable() {
        let err = PipelineError::motion_failed("timed out polling");
        assert!(err.is_retryable());
        assert!(!err.is_permanent_failure());
    }

    #[test]
    fn kind_mapping_matches_error_kind_names() {
        assert_eq!(
            PipelineError::NoTemplateSucceeded.kind().as_str(),
            "NO_TEMPLATE_SUCCEEDED"
        );
        assert_eq!(
            PipelineError::PersistedUrlMismatch {
                listing_id: "l".into(),
                order: 0,
                existing: "a".into(),
                new: "b".into(),
            }
            .kind()
            .as_str(),
            "PERSISTED_URL_MISMATCH"
        );
    }
}

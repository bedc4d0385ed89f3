//! Stage-level progress events and structured error details written into
//! `Job.metadata` as the pipeline advances.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The named stages `Execute` emits progress for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Vision,
    Motion,
    Template,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Vision => "vision",
            Stage::Motion => "motion",
            Stage::Template => "template",
        }
    }
}

/// One `{stage, percent}` progress emission.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageProgress {
    pub stage: Stage,
    pub sub_stage: Option<String>,
    pub percent: u8,
    pub last_updated: DateTime<Utc>,
}

impl StageProgress {
    pub fn new(stage: Stage, percent: u8) -> Self {
        Self {
            stage,
            sub_stage: None,
            percent,
            last_updated: Utc::now(),
        }
    }

    pub fn with_sub_stage(mut self, sub_stage: impl Into<String>) -> Self {
        self.sub_stage = Some(sub_stage.into());
        self
    }
}

/// The named error kinds surfaced to job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Locked,
    InputInvalid,
    VisionFailed,
    MotionFailed,
    MotionMissing,
    PersistedUrlMismatch,
    MapFailed,
    MapRequired,
    NoValidClips,
    MuxFailed,
    UploadFailed,
    NoTemplateSucceeded,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Locked => "LOCKED",
            ErrorKind::InputInvalid => "INPUT_INVALID",
            ErrorKind::VisionFailed => "VISION_FAILED",
            ErrorKind::MotionFailed => "MOTION_FAILED",
            ErrorKind::MotionMissing => "MOTION_MISSING",
            ErrorKind::PersistedUrlMismatch => "PERSISTED_URL_MISMATCH",
            ErrorKind::MapFailed => "MAP_FAILED",
            ErrorKind::MapRequired => "MAP_REQUIRED",
            ErrorKind::NoValidClips => "NO_VALID_CLIPS",
            ErrorKind::MuxFailed => "MUX_FAILED",
            ErrorKind::UploadFailed => "UPLOAD_FAILED",
            ErrorKind::NoTemplateSucceeded => "NO_TEMPLATE_SUCCEEDED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Structured error details written into `Job.metadata.errorDetails` when a
/// job exits FAILED.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the inputs that produced this failure, for diagnosis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs_snapshot: Option<Value>,
}

impl ErrorDetails {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: None,
            timestamp: Utc::now(),
            inputs_snapshot: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings_match_spec_names() {
        assert_eq!(ErrorKind::NoTemplateSucceeded.as_str(), "NO_TEMPLATE_SUCCEEDED");
        assert_eq!(ErrorKind::PersistedUrlMismatch.as_str(), "PERSISTED_URL_MISMATCH");
    }
}

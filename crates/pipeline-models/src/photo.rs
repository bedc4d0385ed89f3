//! Photo records: the per-image units a job fans motion-clip generation over.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Processing state of a single photo within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Processing => "processing",
            PhotoStatus::Completed => "completed",
            PhotoStatus::Failed => "failed",
        }
    }
}

/// A logical photo in a listing.
///
/// `order` is dense and unique within a listing: it is the index into the
/// motion-clip vector a template render walks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Photo {
    pub id: String,
    pub listing_id: String,

    /// 0-based index, unique and dense within a listing.
    pub order: u32,

    /// Original blob URL.
    pub file_path: String,

    /// Normalized 9:16 WebP blob URL, set by VisionCropper.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_file_path: Option<String>,

    /// Generated motion clip blob URL, set by MotionClipProvider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runway_video_path: Option<String>,

    #[serde(default)]
    pub status: PhotoStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Photo {
    pub fn new(listing_id: impl Into<String>, order: u32, file_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            listing_id: listing_id.into(),
            order,
            file_path: file_path.into(),
            processed_file_path: None,
            runway_video_path: None,
            status: PhotoStatus::Pending,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// True once the photo has a motion clip it can contribute to a render.
    pub fn has_motion_clip(&self) -> bool {
        self.runway_video_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_photo_has_no_motion_clip() {
        let photo = Photo::new("listing-1", 0, "properties/listing-1/images/original/a.jpg");
        assert!(!photo.has_motion_clip());
        assert_eq!(photo.status, PhotoStatus::Pending);
    }
}

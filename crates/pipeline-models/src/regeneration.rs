//! RegenerationContext: the subset-of-photos-to-redo bookkeeping for
//! `Pipeline.RegeneratePhotos`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::photo::Photo;

/// Describes which photos of a job are being re-submitted to
/// MotionClipProvider and which existing motion clips must be reused as-is.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegenerationContext {
    /// Photos to re-submit to MotionClipProvider.
    pub photos_to_regenerate: Vec<Photo>,
    /// Photos whose `runway_video_path` is authoritative and must be reused.
    pub existing_photos: Vec<Photo>,
    pub regenerated_photo_ids: Vec<String>,
    pub total_photos: u32,
}

impl RegenerationContext {
    /// Checks the data-model invariant: the two photo sets cover every
    /// `order` position exactly once.
    pub fn covers_all_orders_without_gaps_or_overlap(&self) -> bool {
        let mut seen = vec![false; self.total_photos as usize];
        for photo in self.photos_to_regenerate.iter().chain(self.existing_photos.iter()) {
            let idx = photo.order as usize;
            if idx >= seen.len() || seen[idx] {
                return false;
            }
            seen[idx] = true;
        }
        seen.into_iter().all(|covered| covered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(order: u32) -> Photo {
        Photo::new("listing-1", order, format!("properties/listing-1/images/original/{order}.jpg"))
    }

    #[test]
    fn detects_full_dense_coverage() {
        let ctx = RegenerationContext {
            photos_to_regenerate: vec![photo(2)],
            existing_photos: vec![photo(0), photo(1), photo(3), photo(4)],
            regenerated_photo_ids: vec!["p2".into()],
            total_photos: 5,
        };
        assert!(ctx.covers_all_orders_without_gaps_or_overlap());
    }

    #[test]
    fn detects_gap() {
        let ctx = RegenerationContext {
            photos_to_regenerate: vec![photo(2)],
            existing_photos: vec![photo(0), photo(1)],
            regenerated_photo_ids: vec!["p2".into()],
            total_photos: 4,
        };
        assert!(!ctx.covers_all_orders_without_gaps_or_overlap());
    }

    #[test]
    fn detects_overlap() {
        let ctx = RegenerationContext {
            photos_to_regenerate: vec![photo(0)],
            existing_photos: vec![photo(0)],
            regenerated_photo_ids: vec!["p0".into()],
            total_photos: 1,
        };
        assert!(!ctx.covers_all_orders_without_gaps_or_overlap());
    }
}

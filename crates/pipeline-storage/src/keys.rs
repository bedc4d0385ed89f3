//! Blob key conventions for persisted pipeline state.

/// `properties/{listingId}/images/original/{name}`
pub fn original_image_key(listing_id: &str, name: &str) -> String {
    format!("properties/{listing_id}/images/original/{name}")
}

/// `properties/{listingId}/images/processed/{jobId}/vision_{order}.webp`
pub fn processed_vision_key(listing_id: &str, job_id: &str, order: u32) -> String {
    format!("properties/{listing_id}/images/processed/{job_id}/vision_{order}.webp")
}

/// `properties/{listingId}/videos/runway/{jobId}/{order}.mp4`
pub fn motion_clip_key(listing_id: &str, job_id: &str, order: u32) -> String {
    format!("properties/{listing_id}/videos/runway/{job_id}/{order}.mp4")
}

/// `temp/maps/{jobId}/{timestamp}.mp4`, the staging key a map clip is
/// produced at before being moved to its persisted key.
pub fn map_clip_temp_key(job_id: &str, timestamp: i64) -> String {
    format!("temp/maps/{job_id}/{timestamp}.mp4")
}

/// `properties/{listingId}/videos/maps/{jobId}/{timestamp}.mp4`
pub fn map_clip_key(listing_id: &str, job_id: &str, timestamp: i64) -> String {
    format!("properties/{listing_id}/videos/maps/{job_id}/{timestamp}.mp4")
}

/// `properties/{listingId}/videos/templates/{jobId}/{templateKey}.mp4`
pub fn template_output_key(listing_id: &str, job_id: &str, template_key: &str) -> String {
    format!("properties/{listing_id}/videos/templates/{job_id}/{template_key}.mp4")
}

/// `assets/watermark/{name}`, shared across listings.
pub fn watermark_key(name: &str) -> String {
    format!("assets/watermark/{name}")
}

/// `assets/music/{trackName}.mp3`, shared across listings.
pub fn music_key(track_name: &str) -> String {
    format!("assets/music/{track_name}.mp3")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_the_documented_layout() {
        assert_eq!(
            original_image_key("listing1", "front.jpg"),
            "properties/listing1/images/original/front.jpg"
        );
        assert_eq!(
            processed_vision_key("listing1", "job1", 2),
            "properties/listing1/images/processed/job1/vision_2.webp"
        );
        assert_eq!(
            motion_clip_key("listing1", "job1", 2),
            "properties/listing1/videos/runway/job1/2.mp4"
        );
        assert_eq!(
            map_clip_temp_key("job1", 1700000000),
            "temp/maps/job1/1700000000.mp4"
        );
        assert_eq!(
            map_clip_key("listing1", "job1", 1700000000),
            "properties/listing1/videos/maps/job1/1700000000.mp4"
        );
        assert_eq!(
            template_output_key("listing1", "job1", "storyteller"),
            "properties/listing1/videos/templates/job1/storyteller.mp4"
        );
        assert_eq!(music_key("upbeat"), "assets/music/upbeat.mp3");
    }
}

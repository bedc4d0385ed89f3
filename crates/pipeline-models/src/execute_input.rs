//! Input to `Pipeline::execute`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::regeneration::RegenerationContext;

/// Geographic coordinates for a map fly-in clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Rounds both components to six decimal places, the precision the map
    /// cache key is hashed at.
    pub fn rounded(&self) -> (f64, f64) {
        let scale = 1_000_000.0;
        ((self.lat * scale).round() / scale, (self.lng * scale).round() / scale)
    }
}

/// Input to one `Pipeline::execute` call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteInput {
    pub job_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,

    /// Blob URLs of original photos.
    #[serde(default)]
    pub input_files: Vec<String>,

    /// Requested template key(s). Entries that turn out to need `map` but
    /// have no `coordinates` are dropped during fan-out.
    pub template: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    #[serde(default)]
    pub is_regeneration: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub regeneration_context: Option<RegenerationContext>,

    #[serde(default)]
    pub skip_motion: bool,

    #[serde(default)]
    pub skip_motion_if_cached: bool,

    #[serde(default)]
    pub skip_lock: bool,

    #[serde(default)]
    pub force_regeneration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_round_to_six_decimals() {
        let c = Coordinates { lat: 37.774_912_34, lng: -122.419_412_9 };
        let (lat, lng) = c.rounded();
        assert_eq!(lat, 37.774912);
        assert_eq!(lng, -122.419413);
    }
}

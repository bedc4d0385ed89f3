//! Immutable, code-resident template definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One slot in a template's clip sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SequenceSlot {
    /// Index into the ordered motion-clip vector.
    Photo(u32),
    /// The map fly-in clip.
    Map,
}

/// Access tier gating which tenants may request a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Standard,
    Premium,
}

/// A named visual transition applied between two sequence slots.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transition {
    pub kind: String,
    pub duration_secs: f64,
}

/// Background music reference and mix parameters.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MusicSpec {
    /// Blob key under `assets/music/{trackName}.mp3`.
    pub track: String,
    pub volume: f64,
    #[serde(default)]
    pub start_offset_secs: f64,
}

/// An immutable rendering plan: sequence of clip slots, durations, and
/// optional transitions/music/color-grading/watermark policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TemplateDefinition {
    pub key: String,

    /// Ordered clip slots; length must equal `durations.len()`.
    pub sequence: Vec<SequenceSlot>,

    /// Per-slot duration in seconds, > 0, same length as `sequence`.
    pub durations: Vec<f64>,

    /// Per-slot transition, indexed the same as `sequence`. `None` entries
    /// mean "no transition at that position".
    #[serde(default)]
    pub transitions: Vec<Option<Transition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<MusicSpec>,

    /// FFmpeg filter expression applied to the whole render.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_correction: Option<String>,

    #[serde(default)]
    pub reverse_clips: bool,

    #[serde(default)]
    pub access_level: AccessLevel,

    /// Operation timeout in milliseconds for rendering this template.
    pub timeout_ms: u64,

    pub max_retries: u32,
}

impl TemplateDefinition {
    /// Validates the two length invariants from the data model: sequence and
    /// durations are equal length, and every duration is positive.
    pub fn is_well_formed(&self) -> bool {
        self.sequence.len() == self.durations.len()
            && self.durations.iter().all(|d| *d > 0.0)
    }

    /// True if this template's sequence references the map slot.
    pub fn requires_map(&self) -> bool {
        self.sequence.iter().any(|s| matches!(s, SequenceSlot::Map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_requires_matching_lengths_and_positive_durations() {
        let t = TemplateDefinition {
            key: "storyteller".into(),
            sequence: vec![SequenceSlot::Photo(0), SequenceSlot::Photo(1)],
            durations: vec![3.0, 4.0],
            transitions: vec![None, None],
            music: None,
            color_correction: None,
            reverse_clips: false,
            access_level: AccessLevel::Standard,
            timeout_ms: 120_000,
            max_retries: 3,
        };
        assert!(t.is_well_formed());
        assert!(!t.requires_map());
    }

    #[test]
    fn requires_map_detects_map_slot() {
        let t = TemplateDefinition {
            key: "googlezoomintro".into(),
            sequence: vec![SequenceSlot::Map, SequenceSlot::Photo(0)],
            durations: vec![2.0, 3.0],
            transitions: vec![None, None],
            music: None,
            color_correction: None,
            reverse_clips: false,
            access_level: AccessLevel::Standard,
            timeout_ms: 120_000,
            max_retries: 3,
        };
        assert!(t.requires_map());
    }
}

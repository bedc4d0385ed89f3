//! `TemplateCatalog`: the immutable, code-resident registry of template
//! definitions. There is no admin API and no persistence layer for
//! templates — adding one is a code change, per the design's "immutable
//! registry" choice.

use std::collections::HashMap;

use pipeline_models::{AccessLevel, MusicSpec, SequenceSlot, TemplateDefinition, Transition};

fn photo_sequence(n: u32) -> Vec<SequenceSlot> {
    (0..n).map(SequenceSlot::Photo).collect()
}

fn flat_durations(n: usize, secs: f64) -> Vec<f64> {
    vec![secs; n]
}

fn no_transitions(n: usize) -> Vec<Option<Transition>> {
    vec![None; n]
}

fn crossfade(n: usize, duration_secs: f64) -> Vec<Option<Transition>> {
    (0..n)
        .map(|i| {
            if i == 0 {
                None
            } else {
                Some(Transition {
                    kind: "crossfade".to_string(),
                    duration_secs,
                })
            }
        })
        .collect()
}

fn build_catalog() -> HashMap<String, TemplateDefinition> {
    let mut templates = HashMap::new();

    templates.insert(
        "crescendo".to_string(),
        TemplateDefinition {
            key: "crescendo".to_string(),
            sequence: photo_sequence(5),
            durations: flat_durations(5, 2.5),
            transitions: crossfade(5, 0.4),
            music: Some(MusicSpec {
                track: "crescendo".to_string(),
                volume: 0.8,
                start_offset_secs: 0.0,
            }),
            color_correction: Some("eq=contrast=1.08:saturation=1.15".to_string()),
            reverse_clips: false,
            access_level: AccessLevel::Standard,
            timeout_ms: 120_000,
            max_retries: 3,
        },
    );

    templates.insert(
        "wave".to_string(),
        TemplateDefinition {
            key: "wave".to_string(),
            sequence: photo_sequence(4),
            durations: flat_durations(4, 3.0),
            transitions: no_transitions(4),
            music: Some(MusicSpec {
                track: "wave".to_string(),
                volume: 0.7,
                start_offset_secs: 2.0,
            }),
            color_correction: Some("eq=contrast=1.0:saturation=1.25:brightness=0.02".to_string()),
            reverse_clips: false,
            access_level: AccessLevel::Standard,
            timeout_ms: 120_000,
            max_retries: 3,
        },
    );

    templates.insert(
        "storyteller".to_string(),
        TemplateDefinition {
            key: "storyteller".to_string(),
            sequence: photo_sequence(3),
            durations: flat_durations(3, 4.0),
            transitions: crossfade(3, 0.6),
            music: Some(MusicSpec {
                track: "storyteller".to_string(),
                volume: 0.6,
                start_offset_secs: 0.0,
            }),
            color_correction: None,
            reverse_clips: false,
            access_level: AccessLevel::Standard,
            timeout_ms: 150_000,
            max_retries: 3,
        },
    );

    templates.insert(
        "googlezoomintro".to_string(),
        TemplateDefinition {
            key: "googlezoomintro".to_string(),
            sequence: {
                let mut seq = vec![SequenceSlot::Map];
                seq.extend(photo_sequence(10));
                seq
            },
            durations: {
                let mut d = vec![2.5];
                d.extend(flat_durations(10, 1.8));
                d
            },
            transitions: no_transitions(11),
            music: Some(MusicSpec {
                track: "googlezoomintro".to_string(),
                volume: 0.75,
                start_offset_secs: 0.0,
            }),
            color_correction: Some("eq=contrast=1.05:saturation=1.1".to_string()),
            reverse_clips: false,
            access_level: AccessLevel::Standard,
            timeout_ms: 180_000,
            max_retries: 2,
        },
    );

    templates.insert(
        "wesanderson".to_string(),
        TemplateDefinition {
            key: "wesanderson".to_string(),
            sequence: photo_sequence(5),
            durations: flat_durations(5, 2.8),
            transitions: no_transitions(5),
            music: Some(MusicSpec {
                track: "wesanderson".to_string(),
                volume: 0.65,
                start_offset_secs: 0.0,
            }),
            color_correction: Some("eq=contrast=0.95:saturation=0.85:brightness=0.03".to_string()),
            reverse_clips: false,
            access_level: AccessLevel::Premium,
            timeout_ms: 120_000,
            max_retries: 3,
        },
    );

    templates.insert(
        "hyperpop".to_string(),
        TemplateDefinition {
            key: "hyperpop".to_string(),
            sequence: photo_sequence(6),
            durations: flat_durations(6, 1.5),
            transitions: no_transitions(6),
            music: Some(MusicSpec {
                track: "hyperpop".to_string(),
                volume: 0.9,
                start_offset_secs: 0.0,
            }),
            color_correction: Some("eq=contrast=1.2:saturation=1.4".to_string()),
            reverse_clips: true,
            access_level: AccessLevel::Premium,
            timeout_ms: 120_000,
            max_retries: 3,
        },
    );

    debug_assert!(templates.values().all(TemplateDefinition::is_well_formed));

    templates
}

/// Immutable, process-lifetime registry of template definitions.
pub struct TemplateCatalog {
    templates: HashMap<String, TemplateDefinition>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self {
            templates: build_catalog(),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&TemplateDefinition> {
        self.templates.get(key)
    }

    pub fn all(&self) -> impl Iterator<Item = &TemplateDefinition> {
        self.templates.values()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPECTED_KEYS: &[&str] = &[
        "crescendo",
        "wave",
        "storyteller",
        "googlezoomintro",
        "wesanderson",
        "hyperpop",
    ];

    #[test]
    fn catalog_contains_exactly_the_reference_templates() {
        let catalog = TemplateCatalog::new();
        for key in EXPECTED_KEYS {
            assert!(catalog.lookup(key).is_some(), "missing template {key}");
        }
        assert_eq!(catalog.all().count(), EXPECTED_KEYS.len());
    }

    #[test]
    fn only_googlezoomintro_requires_map() {
        let catalog = TemplateCatalog::new();
        for template in catalog.all() {
            let requires_map = template.requires_map();
            assert_eq!(requires_map, template.key == "googlezoomintro");
        }
    }

    #[test]
    fn every_template_is_well_formed() {
        let catalog = TemplateCatalog::new();
        for template in catalog.all() {
            assert!(template.is_well_formed(), "{} is not well-formed", template.key);
        }
    }

    #[test]
    fn lookup_of_unknown_key_is_none() {
        let catalog = TemplateCatalog::new();
        assert!(catalog.lookup("nonexistent").is_none());
    }
}

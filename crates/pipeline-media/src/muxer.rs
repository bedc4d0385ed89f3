//! VideoMuxer: concatenates clips into one portrait MP4 with transitions,
//! color grading, music, and a watermark overlay.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::probe::{get_duration, probe_video};
use crate::watermark::WatermarkConfig;
use pipeline_models::{MusicSpec, Transition};

/// Output frame size every template renders to.
pub const OUTPUT_WIDTH: u32 = 768;
pub const OUTPUT_HEIGHT: u32 = 1280;

/// One resolved clip slot ready to be stitched.
#[derive(Debug, Clone)]
pub struct ClipSpec {
    /// Local path of the downloaded, validated clip.
    pub path: PathBuf,
    /// Duration to use for this slot, already capped to the clip's measured
    /// duration.
    pub duration: f64,
    pub transition: Option<Transition>,
    pub color_correction: Option<String>,
    pub reverse: bool,
}

/// Template-level mix parameters passed to `stitch`.
#[derive(Debug, Clone)]
pub struct MuxTemplate {
    pub name: String,
    pub description: Option<String>,
    pub color_correction: Option<String>,
    pub music: Option<(PathBuf, MusicSpec)>,
    pub output_options: Vec<String>,
}

/// Metadata probed from a rendered or input clip.
#[derive(Debug, Clone)]
pub struct ClipMetadata {
    pub has_video: bool,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

/// Concatenate `clips` into `output` following `template`, optionally
/// overlaying `watermark`.
///
/// Returns only after the output file is closed and flushed by FFmpeg.
pub async fn stitch(
    clips: &[ClipSpec],
    output: &Path,
    template: &MuxTemplate,
    watermark: Option<&WatermarkConfig>,
) -> MediaResult<()> {
    if clips.is_empty() {
        return Err(MediaError::InvalidVideo("no clips to stitch".to_string()));
    }

    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let mut args: Vec<String> = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];

    for clip in clips {
        args.push("-t".to_string());
        args.push(format!("{:.3}", clip.duration));
        args.push("-i".to_string());
        args.push(clip.path.to_string_lossy().to_string());
    }

    let watermark_available = watermark.map(|w| w.is_available()).unwrap_or(false);
    if watermark_available {
        args.push("-i".to_string());
        args.push(watermark.unwrap().image_path.clone());
    }

    let (music_input_index, music_path) = if let Some((path, _)) = &template.music {
        let idx = clips.len() + usize::from(watermark_available);
        args.push("-i".to_string());
        args.push(path.to_string_lossy().to_string());
        (Some(idx), Some(path.clone()))
    } else {
        (None, None)
    };

    let watermark_for_graph = watermark.filter(|w| w.is_available());
    let filter_complex = build_filter_complex(clips, template, watermark_for_graph, music_input_index);
    args.push("-filter_complex".to_string());
    args.push(filter_complex.graph);

    args.push("-map".to_string());
    args.push(format!("[{}]", filter_complex.video_label));
    if let Some(audio_label) = &filter_complex.audio_label {
        args.push("-map".to_string());
        args.push(format!("[{}]", audio_label));
    }

    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.extend(template.output_options.clone());
    args.push(output.to_string_lossy().to_string());

    debug!(template = %template.name, clips = clips.len(), "running ffmpeg stitch");
    if let Some(path) = &music_path {
        debug!(music = %path.display(), "mixing music track");
    }

    let out = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !out.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "stitch failed",
            Some(String::from_utf8_lossy(&out.stderr).into_owned()),
            out.status.code(),
        ));
    }

    let meta = tokio::fs::metadata(output).await?;
    if meta.len() == 0 {
        return Err(MediaError::InvalidVideo("stitch produced an empty file".to_string()));
    }

    info!(template = %template.name, output = %output.display(), "stitch complete");
    Ok(())
}

struct FilterGraph {
    graph: String,
    video_label: String,
    audio_label: Option<String>,
}

/// Maps a template-authored transition kind onto an `xfade` transition
/// name. `"crossfade"` is the only kind any reference template uses;
/// anything else is passed through, trusting it already names a valid
/// `xfade` transition.
fn xfade_transition_name(kind: &str) -> &str {
    match kind {
        "crossfade" => "fade",
        other => other,
    }
}

fn build_filter_complex(
    clips: &[ClipSpec],
    template: &MuxTemplate,
    watermark: Option<&WatermarkConfig>,
    music_input_index: Option<usize>,
) -> FilterGraph {
    let mut chains = Vec::new();

    for (i, clip) in clips.iter().enumerate() {
        let mut filter = format!(
            "scale={OUTPUT_WIDTH}:{OUTPUT_HEIGHT}:force_original_aspect_ratio=decrease,\
             pad={OUTPUT_WIDTH}:{OUTPUT_HEIGHT}:(ow-iw)/2:(oh-ih)/2,setsar=1"
        );
        if clip.reverse {
            filter = format!("{filter},reverse");
        }
        if let Some(cc) = &clip.color_correction {
            filter = format!("{filter},{cc}");
        }
        let label = format!("v{i}");
        chains.push(format!("[{i}:v]{filter}[{label}]"));
    }

    // Per-slot transitions (§4.1 processTemplate step 6): when no clip past
    // the first carries one, a single `concat` mirrors every clip's own
    // duration with a hard cut. When any does, clips are folded in
    // sequentially: an `xfade` dissolves the carried-over tail of the
    // running output into the next clip over `duration_secs`, anything
    // without a transition is appended with a plain two-input `concat`.
    let has_transitions = clips.iter().skip(1).any(|c| c.transition.is_some());
    let mut video_label;
    if !has_transitions {
        let concat_labels: String = (0..clips.len()).map(|i| format!("[v{i}]")).collect();
        chains.push(format!("{concat_labels}concat=n={}:v=1:a=0[concat_v]", clips.len()));
        video_label = "concat_v".to_string();
    } else {
        video_label = "v0".to_string();
        let mut cumulative = clips[0].duration;
        for (i, clip) in clips.iter().enumerate().skip(1) {
            let next_label = format!("v{i}");
            if let Some(transition) = &clip.transition {
                let duration = transition.duration_secs.max(0.0).min(cumulative).min(clip.duration);
                let offset = (cumulative - duration).max(0.0);
                let kind = xfade_transition_name(&transition.kind);
                let out_label = format!("x{i}");
                chains.push(format!(
                    "[{video_label}][{next_label}]xfade=transition={kind}:duration={duration:.3}:offset={offset:.3}[{out_label}]"
                ));
                cumulative = (cumulative + clip.duration - duration).max(0.0);
                video_label = out_label;
            } else {
                let out_label = format!("c{i}");
                chains.push(format!("[{video_label}][{next_label}]concat=n=2:v=1:a=0[{out_label}]"));
                cumulative += clip.duration;
                video_label = out_label;
            }
        }
    }

    if let Some(cc) = &template.color_correction {
        chains.push(format!("[{video_label}]{cc}[graded]"));
        video_label = "graded".to_string();
    }

    if let Some(config) = watermark {
        let wm_index = clips.len();
        chains.push(format!("[{wm_index}:v]format=rgba[wm_raw]"));
        let wm_label = if config.opacity < 1.0 {
            chains.push(format!("[wm_raw]colorchannelmixer=aa={:.2}[wm]", config.opacity));
            "wm"
        } else {
            "wm_raw"
        };
        chains.push(format!(
            "[{video_label}][{wm_label}]overlay=(W-w)/2:H-h-{}:format=auto[watermarked]",
            config.offset_bottom
        ));
        video_label = "watermarked".to_string();
    }

    let audio_label = music_input_index.map(|idx| {
        let total_duration: f64 = clips.iter().map(|c| c.duration).sum();
        let (volume, fade_start) = template
            .music
            .as_ref()
            .map(|(_, spec)| (spec.volume, (total_duration - 1.0).max(0.0)))
            .unwrap_or((1.0, (total_duration - 1.0).max(0.0)));
        chains.push(format!(
            "[{idx}:a]atrim=0:{total_duration:.3},volume={volume:.3},afade=t=out:st={fade_start:.3}:d=1[music_out]"
        ));
        "music_out".to_string()
    });

    FilterGraph {
        graph: chains.join(";"),
        video_label,
        audio_label,
    }
}

/// Probed duration of a file in seconds.
pub async fn get_duration_secs(path: impl AsRef<Path>) -> MediaResult<f64> {
    get_duration(path).await
}

/// Decode the file end-to-end, confirming it is not truncated or corrupt.
pub async fn validate_integrity(path: impl AsRef<Path>) -> MediaResult<()> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

    let out = Command::new("ffmpeg")
        .args([
            "-v",
            "error",
            "-i",
        ])
        .arg(path.as_ref())
        .args(["-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !out.status.success() || !out.stderr.is_empty() {
        return Err(MediaError::InvalidVideo(format!(
            "integrity check failed: {}",
            String::from_utf8_lossy(&out.stderr)
        )));
    }
    Ok(())
}

/// Probe stream characteristics used by ClipValidator's metadata check.
pub async fn get_metadata(path: impl AsRef<Path>) -> MediaResult<ClipMetadata> {
    let info = probe_video(path).await?;
    Ok(ClipMetadata {
        has_video: info.width > 0 && info.height > 0,
        width: info.width,
        height: info.height,
        duration: info.duration,
    })
}

/// Confirm a candidate music file is a readable, decodable audio source.
pub async fn validate_music_file(path: impl AsRef<Path>) -> MediaResult<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    match validate_integrity(path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "music file failed validation");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_complex_includes_concat_and_watermark() {
        let clips = vec![
            ClipSpec {
                path: PathBuf::from("/tmp/a.mp4"),
                duration: 3.0,
                transition: None,
                color_correction: None,
                reverse: false,
            },
            ClipSpec {
                path: PathBuf::from("/tmp/b.mp4"),
                duration: 4.0,
                transition: None,
                color_correction: None,
                reverse: false,
            },
        ];
        let template = MuxTemplate {
            name: "storyteller".into(),
            description: None,
            color_correction: None,
            music: None,
            output_options: vec![],
        };
        let watermark = WatermarkConfig::default().with_image_path("/tmp/watermark.png");
        let graph = build_filter_complex(&clips, &template, Some(&watermark), None);
        assert!(graph.graph.contains("concat=n=2:v=1:a=0"));
        assert!(graph.graph.contains("colorchannelmixer=aa=0.70"));
        assert!(graph.graph.contains("overlay=(W-w)/2:H-h-300"));
        assert_eq!(graph.video_label, "watermarked");
    }

    #[test]
    fn filter_complex_without_watermark_ends_at_concat() {
        let clips = vec![ClipSpec {
            path: PathBuf::from("/tmp/a.mp4"),
            duration: 3.0,
            transition: None,
            color_correction: None,
            reverse: false,
        }];
        let template = MuxTemplate {
            name: "wave".into(),
            description: None,
            color_correction: None,
            music: None,
            output_options: vec![],
        };
        let graph = build_filter_complex(&clips, &template, None, None);
        assert_eq!(graph.video_label, "concat_v");
    }

    #[test]
    fn filter_complex_full_opacity_watermark_skips_colorchannelmixer() {
        let clips = vec![ClipSpec {
            path: PathBuf::from("/tmp/a.mp4"),
            duration: 3.0,
            transition: None,
            color_correction: None,
            reverse: false,
        }];
        let template = MuxTemplate {
            name: "wave".into(),
            description: None,
            color_correction: None,
            music: None,
            output_options: vec![],
        };
        let watermark = WatermarkConfig::default().with_image_path("/tmp/watermark.png").with_opacity(1.0);
        let graph = build_filter_complex(&clips, &template, Some(&watermark), None);
        assert!(!graph.graph.contains("colorchannelmixer"));
        assert!(graph.graph.contains("overlay=(W-w)/2:H-h-300"));
    }

    #[test]
    fn filter_complex_applies_xfade_for_transitioned_slot() {
        let clips = vec![
            ClipSpec {
                path: PathBuf::from("/tmp/a.mp4"),
                duration: 2.5,
                transition: None,
                color_correction: None,
                reverse: false,
            },
            ClipSpec {
                path: PathBuf::from("/tmp/b.mp4"),
                duration: 2.5,
                transition: Some(Transition { kind: "crossfade".to_string(), duration_secs: 0.4 }),
                color_correction: None,
                reverse: false,
            },
            ClipSpec {
                path: PathBuf::from("/tmp/c.mp4"),
                duration: 2.5,
                transition: Some(Transition { kind: "crossfade".to_string(), duration_secs: 0.4 }),
                color_correction: None,
                reverse: false,
            },
        ];
        let template = MuxTemplate {
            name: "crescendo".into(),
            description: None,
            color_correction: None,
            music: None,
            output_options: vec![],
        };
        let graph = build_filter_complex(&clips, &template, None, None);
        assert!(!graph.graph.contains("concat=n=3"));
        assert_eq!(graph.graph.matches("xfade=transition=fade:duration=0.400:offset=2.100").count(), 1);
        assert_eq!(graph.graph.matches("xfade=transition=fade:duration=0.400").count(), 2);
        assert!(graph.video_label.starts_with('x'));
    }

    #[test]
    fn filter_complex_mixes_cut_and_transition_slots() {
        let clips = vec![
            ClipSpec {
                path: PathBuf::from("/tmp/a.mp4"),
                duration: 3.0,
                transition: None,
                color_correction: None,
                reverse: false,
            },
            ClipSpec {
                path: PathBuf::from("/tmp/b.mp4"),
                duration: 3.0,
                transition: None,
                color_correction: None,
                reverse: false,
            },
            ClipSpec {
                path: PathBuf::from("/tmp/c.mp4"),
                duration: 3.0,
                transition: Some(Transition { kind: "crossfade".to_string(), duration_secs: 0.5 }),
                color_correction: None,
                reverse: false,
            },
        ];
        let template = MuxTemplate {
            name: "mixed".into(),
            description: None,
            color_correction: None,
            music: None,
            output_options: vec![],
        };
        let graph = build_filter_complex(&clips, &template, None, None);
        assert!(graph.graph.contains("concat=n=2:v=1:a=0[c1]"));
        assert!(graph.graph.contains("xfade=transition=fade:duration=0.500:offset=5.500[x2]"));
    }
}

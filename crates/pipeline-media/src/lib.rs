#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper and heuristic image cropping for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation support via tokio
//! - Clip stitching, color grading, music mixing, and watermark overlay
//! - Saliency-weighted portrait cropping for still photos

pub mod command;
pub mod crop;
pub mod error;
pub mod muxer;
pub mod probe;
pub mod progress;
pub mod watermark;

pub use command::{FfmpegCommand, FfmpegRunner};
pub use crop::{select_crop_window, CropWindow, VisionCropper};
pub use error::{MediaError, MediaResult};
pub use muxer::{get_duration_secs, get_metadata, stitch, validate_integrity, validate_music_file, ClipMetadata, ClipSpec, MuxTemplate, OUTPUT_HEIGHT, OUTPUT_WIDTH};
pub use probe::{get_duration, probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use watermark::{
    apply_watermark, apply_watermark_if_available, WatermarkConfig, DEFAULT_WATERMARK_PATH,
};

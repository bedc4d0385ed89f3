//! Saliency-weighted portrait cropping for still photos.
//!
//! Given a source photo, scans a grid of candidate 9:16 windows and keeps
//! the one maximizing a weighted combination of edge density, contrast, and
//! brightness, then re-encodes the chosen window to the output frame size
//! as WebP.

use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage};
use webp::Encoder;

use crate::error::{MediaError, MediaResult};
use crate::muxer::{OUTPUT_HEIGHT, OUTPUT_WIDTH};
use pipeline_models::NormalizedRect;

const EDGE_WEIGHT: f64 = 0.5;
const CONTRAST_WEIGHT: f64 = 0.3;
const BRIGHTNESS_WEIGHT: f64 = 0.2;

const HORIZONTAL_STEPS: u32 = 5;
const VERTICAL_STEPS: u32 = 3;

const WEBP_QUALITY: f32 = 80.0;
const WEBP_METHOD: i32 = 6;

/// A candidate (or chosen) crop window in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    /// Express this window as fractions of the source image's dimensions.
    pub fn normalized(&self, source_width: u32, source_height: u32) -> NormalizedRect {
        NormalizedRect::new(
            self.x as f64 / source_width as f64,
            self.y as f64 / source_height as f64,
            self.width as f64 / source_width as f64,
            self.height as f64 / source_height as f64,
        )
    }
}

/// Re-encodes a source photo to a normalized portrait frame, selecting the
/// crop window automatically.
#[derive(Debug, Default, Clone, Copy)]
pub struct VisionCropper;

impl VisionCropper {
    pub fn new() -> Self {
        Self
    }

    /// Analyze `input_path`, crop to the best 9:16 window, and write the
    /// resized WebP result to `output_path`. Returns the window that was
    /// selected, normalized to the source image's dimensions.
    pub async fn process(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> MediaResult<NormalizedRect> {
        let input_path = input_path.as_ref().to_path_buf();
        let output_path = output_path.as_ref().to_path_buf();

        tokio::task::spawn_blocking(move || process_blocking(&input_path, &output_path))
            .await
            .map_err(|e| MediaError::internal(format!("vision crop task panicked: {e}")))?
    }
}

fn process_blocking(input_path: &Path, output_path: &Path) -> MediaResult<NormalizedRect> {
    if !input_path.exists() {
        return Err(MediaError::FileNotFound(input_path.to_path_buf()));
    }

    let img = image::open(input_path)?;
    let (src_width, src_height) = img.dimensions();

    let window = select_crop_window(&img);
    let normalized = window.normalized(src_width, src_height);

    let cropped = img.crop_imm(window.x, window.y, window.width, window.height);
    let resized = cropped.resize_exact(OUTPUT_WIDTH, OUTPUT_HEIGHT, FilterType::Lanczos3);

    let bytes = encode_webp(&resized)?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, bytes)?;

    Ok(normalized)
}

fn encode_webp(img: &DynamicImage) -> MediaResult<Vec<u8>> {
    let encoder = Encoder::from_image(img)
        .map_err(|e| MediaError::internal(format!("webp encoder setup failed: {e}")))?;
    let mut config = webp::WebPConfig::new()
        .map_err(|_| MediaError::internal("invalid webp encoder config"))?;
    config.quality = WEBP_QUALITY;
    config.method = WEBP_METHOD;
    let memory = encoder
        .encode_advanced(&config)
        .map_err(|e| MediaError::internal(format!("webp encode failed: {e:?}")))?;
    Ok(memory.to_vec())
}

/// Selects the highest-scoring 9:16 window by grid-scanning `img`.
///
/// Candidates are generated on a horizontal/vertical grid with step sizes
/// `max(1, (W - cropW) / HORIZONTAL_STEPS)` and
/// `max(1, (H - cropH) / VERTICAL_STEPS)`. Each candidate is scored as
/// `0.5 * edge_density + 0.3 * contrast + 0.2 * brightness`, all normalized
/// to `[0, 1]`.
pub fn select_crop_window(img: &DynamicImage) -> CropWindow {
    let (width, height) = img.dimensions();
    let (crop_w, crop_h) = target_crop_dimensions(width, height);

    let gray = img.to_luma8();

    let max_x = width.saturating_sub(crop_w);
    let max_y = height.saturating_sub(crop_h);
    let step_x = (max_x / HORIZONTAL_STEPS).max(1);
    let step_y = (max_y / VERTICAL_STEPS).max(1);

    let xs = candidate_positions(max_x, step_x);
    let ys = candidate_positions(max_y, step_y);

    let mut best = CropWindow {
        x: 0,
        y: 0,
        width: crop_w,
        height: crop_h,
    };
    let mut best_score = f64::MIN;

    for &y in &ys {
        for &x in &xs {
            let score = score_window(&gray, x, y, crop_w, crop_h);
            if score > best_score {
                best_score = score;
                best = CropWindow {
                    x,
                    y,
                    width: crop_w,
                    height: crop_h,
                };
            }
        }
    }

    best
}

fn candidate_positions(max: u32, step: u32) -> Vec<u32> {
    let mut positions: Vec<u32> = (0..=max).step_by(step as usize).collect();
    if positions.last() != Some(&max) {
        positions.push(max);
    }
    positions
}

/// The largest 9:16 window that fits inside a `width`x`height` source image.
fn target_crop_dimensions(width: u32, height: u32) -> (u32, u32) {
    const TARGET_RATIO: f64 = 9.0 / 16.0;

    if width == 0 || height == 0 {
        return (width, height);
    }

    let source_ratio = width as f64 / height as f64;
    if source_ratio > TARGET_RATIO {
        let crop_h = height;
        let crop_w = ((height as f64) * TARGET_RATIO).round() as u32;
        (crop_w.max(1).min(width), crop_h)
    } else {
        let crop_w = width;
        let crop_h = ((width as f64) / TARGET_RATIO).round() as u32;
        (crop_w, crop_h.max(1).min(height))
    }
}

fn score_window(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> f64 {
    let edge = edge_density(gray, x, y, w, h);
    let (contrast, brightness) = contrast_and_brightness(gray, x, y, w, h);
    EDGE_WEIGHT * edge + CONTRAST_WEIGHT * contrast + BRIGHTNESS_WEIGHT * brightness
}

/// Mean absolute gradient magnitude over the window, normalized to `[0, 1]`.
fn edge_density(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> f64 {
    if w < 2 || h < 2 {
        return 0.0;
    }

    let mut total = 0f64;
    let mut count = 0u64;

    for row in y..(y + h - 1) {
        for col in x..(x + w - 1) {
            let p = gray.get_pixel(col, row).0[0] as i32;
            let right = gray.get_pixel(col + 1, row).0[0] as i32;
            let down = gray.get_pixel(col, row + 1).0[0] as i32;
            total += ((right - p).abs() + (down - p).abs()) as f64;
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }
    (total / count as f64 / 510.0).min(1.0)
}

/// Normalized standard deviation (contrast) and mean brightness, the latter
/// scored so mid-exposure windows (near 50% gray) outrank near-black or
/// blown-out ones.
fn contrast_and_brightness(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
    if w == 0 || h == 0 {
        return (0.0, 0.0);
    }

    let mut sum = 0f64;
    let mut count = 0u64;
    for row in y..(y + h) {
        for col in x..(x + w) {
            sum += gray.get_pixel(col, row).0[0] as f64;
            count += 1;
        }
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;

    let mut variance_sum = 0f64;
    for row in y..(y + h) {
        for col in x..(x + w) {
            let diff = gray.get_pixel(col, row).0[0] as f64 - mean;
            variance_sum += diff * diff;
        }
    }
    let stddev = (variance_sum / count as f64).sqrt();

    let contrast = (stddev / 127.5).min(1.0);
    let brightness = 1.0 - ((mean / 255.0) - 0.5).abs() * 2.0;

    (contrast, brightness.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn checkerboard(width: u32, height: u32, bright_quadrant: (u32, u32)) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let quadrant = (x / (width / 2).max(1), y / (height / 2).max(1));
            if quadrant == bright_quadrant {
                Rgba([240, 240, 240, 255])
            } else {
                Rgba([20, 20, 20, 255])
            }
        });
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn target_dimensions_preserve_nine_by_sixteen() {
        let (w, h) = target_crop_dimensions(1920, 1080);
        assert_eq!(h, 1080);
        assert!((w as f64 / h as f64 - 9.0 / 16.0).abs() < 0.01);

        let (w, h) = target_crop_dimensions(900, 1600);
        assert_eq!(w, 900);
        assert!((w as f64 / h as f64 - 9.0 / 16.0).abs() < 0.01);
    }

    #[test]
    fn candidate_positions_cover_full_range() {
        let positions = candidate_positions(100, 20);
        assert_eq!(positions.first(), Some(&0));
        assert_eq!(positions.last(), Some(&100));
    }

    #[test]
    fn selects_window_containing_high_contrast_content() {
        let img = checkerboard(400, 400, (1, 1));
        let window = select_crop_window(&img);
        // the bottom-right quadrant carries the brightness/contrast signal;
        // the chosen window should be pulled toward it rather than sitting
        // at the default top-left origin.
        assert!(window.x > 0 || window.y > 0);
    }

    #[test]
    fn edge_density_is_zero_for_flat_image() {
        let flat = ImageBuffer::from_pixel(50, 50, image::Luma([128u8]));
        let score = edge_density(&flat, 0, 0, 50, 50);
        assert_eq!(score, 0.0);
    }
}

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::video::VideoSource;

/// A contiguous segment between two detected content-change boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scene {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
}

/// Detects shot boundaries by scoring the content change between
/// consecutive frames.
pub struct SceneDetector {
    /// Content-change score above which a cut is declared (0.0-1.0).
    threshold: f64,
    /// Minimum scene length in seconds.
    min_scene_len: f64,
}

impl SceneDetector {
    pub fn new(threshold: f64, min_scene_len: f64) -> Self {
        Self {
            threshold,
            min_scene_len,
        }
    }

    /// Scores how different two frames are, 0.0 (identical) to 1.0
    /// (completely different). Combines a grayscale histogram distance with
    /// the mean per-pixel difference.
    pub fn frame_difference(&self, a: &DynamicImage, b: &DynamicImage) -> f64 {
        let gray_a = a.to_luma8();
        let gray_b = b.to_luma8();

        let hist = histogram_difference(&gray_a, &gray_b);
        let pixel = pixel_difference(&gray_a, &gray_b);

        hist * 0.6 + pixel * 0.4
    }

    /// Walks the sampled frames and cuts a new scene whenever the
    /// content-change score clears the threshold and the current scene is at
    /// least `min_scene_len` long. Always returns at least one scene for a
    /// non-empty input.
    pub fn detect_scenes(&self, frames: &[(f64, DynamicImage)]) -> Vec<Scene> {
        let Some(&(first_ts, _)) = frames.first() else {
            return Vec::new();
        };
        let last_ts = frames.last().map(|(t, _)| *t).unwrap_or(first_ts);

        let mut boundaries = vec![first_ts];
        for window in frames.windows(2) {
            let (_, ref prev) = window[0];
            let (ts, ref curr) = window[1];

            let diff = self.frame_difference(prev, curr);
            if diff > self.threshold {
                let since_last = ts - boundaries.last().copied().unwrap_or(first_ts);
                if since_last >= self.min_scene_len {
                    boundaries.push(ts);
                }
            }
        }

        boundaries
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = boundaries.get(i + 1).copied().unwrap_or(last_ts);
                Scene { start, end }
            })
            .collect()
    }
}

fn histogram_difference(a: &GrayImage, b: &GrayImage) -> f64 {
    let mut hist_a = [0u32; 256];
    let mut hist_b = [0u32; 256];

    for pixel in a.pixels() {
        hist_a[pixel[0] as usize] += 1;
    }
    for pixel in b.pixels() {
        hist_b[pixel[0] as usize] += 1;
    }

    let total_a = (a.width() * a.height()).max(1) as f64;
    let total_b = (b.width() * b.height()).max(1) as f64;

    let mut diff = 0.0;
    for i in 0..256 {
        diff += (hist_a[i] as f64 / total_a - hist_b[i] as f64 / total_b).abs();
    }

    diff / 2.0
}

fn pixel_difference(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.width() != b.width() || a.height() != b.height() {
        return 1.0;
    }

    let total = (a.width() * a.height()).max(1) as u64;
    let mut sum = 0u64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        sum += (pa[0] as i32 - pb[0] as i32).unsigned_abs() as u64;
    }

    sum as f64 / (total as f64 * 255.0)
}

/// Runs scene detection over a video and writes one representative JPEG per
/// scene into `output_dir`, named `scene_<N>.jpg` with a 1-based index.
/// Returns the detected scenes. Frames already written are not cleaned up
/// when a later step fails.
pub fn detect_and_save_scenes(
    video: &VideoSource,
    output_dir: impl AsRef<Path>,
    threshold: f64,
    min_scene_len: f64,
    sample_rate: f64,
) -> Result<Vec<Scene>> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output folder: {}", output_dir.display()))?;

    let frames = video
        .sample_frames(sample_rate)
        .context("failed to detect and save scenes")?;

    let detector = SceneDetector::new(threshold, min_scene_len);
    let scenes = detector.detect_scenes(&frames);

    for (i, scene) in scenes.iter().enumerate() {
        // Representative frame: the sampled frame closest to the scene start.
        let frame = frames
            .iter()
            .min_by(|(t1, _), (t2, _)| {
                (t1 - scene.start)
                    .abs()
                    .total_cmp(&(t2 - scene.start).abs())
            })
            .map(|(_, img)| img);
        let Some(frame) = frame else { continue };

        let image_path = output_dir.join(format!("scene_{}.jpg", i + 1));
        frame
            .save(&image_path)
            .with_context(|| format!("failed to save scene frame: {}", image_path.display()))?;
    }

    info!(
        "Saved {} scene images to {}",
        scenes.len(),
        output_dir.display()
    );
    Ok(scenes)
}

/// Lists `scene_<N>.jpg` files in a folder, keyed by scene index. Filenames
/// that do not follow the convention are skipped.
pub fn enumerate_scene_images(dir: impl AsRef<Path>) -> Result<BTreeMap<u32, PathBuf>> {
    let dir = dir.as_ref();
    let mut scenes = BTreeMap::new();

    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read scene folder: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.context("failed to read scene folder entry")?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(index) = name
            .strip_prefix("scene_")
            .and_then(|rest| rest.strip_suffix(".jpg"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        scenes.insert(index, path);
    }

    Ok(scenes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn flat(level: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(64, 64, |_, _| image::Luma([level])))
    }

    #[test]
    fn test_frame_difference() {
        let detector = SceneDetector::new(0.3, 1.0);

        let diff = detector.frame_difference(&flat(100), &flat(200));
        assert!(diff > 0.0);

        let same = detector.frame_difference(&flat(100), &flat(100));
        assert!(same < 1e-9);
    }

    #[test]
    fn test_detect_scenes_cuts_on_content_change() {
        let detector = SceneDetector::new(0.3, 1.0);

        // Two seconds of dark frames, then bright frames.
        let mut frames = Vec::new();
        for i in 0..4 {
            frames.push((i as f64 * 0.5, flat(20)));
        }
        for i in 4..8 {
            frames.push((i as f64 * 0.5, flat(230)));
        }

        let scenes = detector.detect_scenes(&frames);
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].start, 0.0);
        assert_eq!(scenes[0].end, 2.0);
        assert_eq!(scenes[1].start, 2.0);
        assert_eq!(scenes[1].end, 3.5);
    }

    #[test]
    fn test_min_scene_len_suppresses_rapid_cuts() {
        let detector = SceneDetector::new(0.3, 10.0);

        let frames = vec![
            (0.0, flat(20)),
            (0.5, flat(230)),
            (1.0, flat(20)),
            (1.5, flat(230)),
        ];

        // Every pair differs, but no cut may happen before 10 seconds.
        let scenes = detector.detect_scenes(&frames);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].start, 0.0);
        assert_eq!(scenes[0].end, 1.5);
    }

    #[test]
    fn test_detect_scenes_empty_input() {
        let detector = SceneDetector::new(0.3, 1.0);
        assert!(detector.detect_scenes(&[]).is_empty());
    }

    #[test]
    fn test_enumerate_scene_images_skips_foreign_files() {
        let dir = std::env::temp_dir().join(format!("scenefind-enum-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("scene_1.jpg"), b"x").unwrap();
        std::fs::write(dir.join("scene_12.jpg"), b"x").unwrap();
        std::fs::write(dir.join("scene_abc.jpg"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();

        let scenes = enumerate_scene_images(&dir).unwrap();
        assert_eq!(scenes.keys().copied().collect::<Vec<_>>(), vec![1, 12]);

        std::fs::remove_dir_all(&dir).ok();
    }
}

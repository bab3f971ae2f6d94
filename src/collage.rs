use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Grid shape for `n` thumbnails: `floor(sqrt(n)) + 1` columns, enough rows
/// to fit everything.
pub fn grid_dimensions(n: usize) -> (usize, usize) {
    let columns = (n as f64).sqrt().floor() as usize + 1;
    let rows = n.div_ceil(columns);
    (columns, rows)
}

/// Tiles the given images into a single grid collage and writes it to
/// `output_file` (format inferred from the extension). Each image is
/// downscaled aspect-preserving into the thumbnail box; unreadable images
/// are logged and skipped. An empty input list, or one where every image
/// fails to load, produces no output file and no error.
pub fn create_collage(
    image_paths: &[PathBuf],
    output_file: impl AsRef<Path>,
    thumbnail_size: (u32, u32),
) -> Result<Option<PathBuf>> {
    let output_file = output_file.as_ref();
    let (thumb_w, thumb_h) = thumbnail_size;

    if image_paths.is_empty() {
        info!("No images to create a collage");
        return Ok(None);
    }

    let mut thumbnails = Vec::new();
    for path in image_paths {
        match image::open(path) {
            Ok(img) => {
                // Shrink only; images already inside the box keep their size.
                let thumb = if img.width() > thumb_w || img.height() > thumb_h {
                    img.thumbnail(thumb_w, thumb_h)
                } else {
                    img
                };
                thumbnails.push(thumb);
            }
            Err(e) => warn!("Error loading image {}: {}", path.display(), e),
        }
    }

    if thumbnails.is_empty() {
        info!("No valid images loaded, cannot create a collage");
        return Ok(None);
    }

    let (columns, rows) = grid_dimensions(thumbnails.len());
    let mut canvas = RgbImage::from_pixel(
        columns as u32 * thumb_w,
        rows as u32 * thumb_h,
        Rgb([255, 255, 255]),
    );

    // Row-major placement; each thumbnail sits at the top-left of its cell.
    for (i, thumb) in thumbnails.iter().enumerate() {
        let col = i % columns;
        let row = i / columns;
        image::imageops::replace(
            &mut canvas,
            &thumb.to_rgb8(),
            (col as u32 * thumb_w) as i64,
            (row as u32 * thumb_h) as i64,
        );
    }

    canvas
        .save(output_file)
        .with_context(|| format!("failed to save collage: {}", output_file.display()))?;
    info!("Collage saved as {}", output_file.display());

    Ok(Some(output_file.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scenefind-collage-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_test_image(path: &Path, w: u32, h: u32, level: u8) {
        RgbImage::from_pixel(w, h, Rgb([level, level, level]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_grid_dimensions() {
        assert_eq!(grid_dimensions(1), (2, 1));
        assert_eq!(grid_dimensions(3), (2, 2));
        assert_eq!(grid_dimensions(4), (3, 2));
        assert_eq!(grid_dimensions(9), (4, 3));
        assert_eq!(grid_dimensions(10), (4, 3));
    }

    #[test]
    fn test_collage_canvas_size_matches_grid() {
        let dir = temp_dir("size");
        let mut paths = Vec::new();
        for i in 0..5 {
            let path = dir.join(format!("img_{}.png", i));
            write_test_image(&path, 400, 300, 128);
            paths.push(path);
        }

        let output = dir.join("collage.png");
        let written = create_collage(&paths, &output, (100, 100)).unwrap();
        assert_eq!(written, Some(output.clone()));

        // 5 images: 3 columns, 2 rows.
        let collage = image::open(&output).unwrap();
        assert_eq!(collage.width(), 300);
        assert_eq!(collage.height(), 200);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_collage_skips_unreadable_images() {
        let dir = temp_dir("skip");
        let good = dir.join("good.png");
        write_test_image(&good, 200, 200, 40);
        let bad = dir.join("bad.png");
        std::fs::write(&bad, b"not an image").unwrap();

        let output = dir.join("collage.png");
        let written =
            create_collage(&[good, bad, dir.join("missing.png")], &output, (50, 50)).unwrap();
        assert!(written.is_some());
        assert!(output.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_collage_does_not_upscale_small_images() {
        let dir = temp_dir("noupscale");
        let path = dir.join("small.png");
        write_test_image(&path, 20, 20, 40);

        let output = dir.join("collage.png");
        create_collage(&[path], &output, (100, 100)).unwrap();

        // 1 image: 2 columns, 1 row; the cell keeps the 20x20 image as-is.
        let collage = image::open(&output).unwrap().to_rgb8();
        assert_eq!((collage.width(), collage.height()), (200, 100));
        assert_eq!(collage.get_pixel(10, 10), &Rgb([40, 40, 40]));
        assert_eq!(collage.get_pixel(60, 60), &Rgb([255, 255, 255]));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_collage_empty_and_all_invalid_inputs() {
        let dir = temp_dir("empty");
        let output = dir.join("collage.png");

        assert_eq!(create_collage(&[], &output, (50, 50)).unwrap(), None);
        assert!(!output.exists());

        let all_bad = vec![dir.join("nope_1.png"), dir.join("nope_2.png")];
        assert_eq!(create_collage(&all_bad, &output, (50, 50)).unwrap(), None);
        assert!(!output.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use tracing::info;

use crate::config::AppConfig;
use crate::error::{ComparisonError, Result};
use crate::internal::comparator::PixelRules;
use crate::internal::geometry::crop_to_be_same_size;

const DIFF_DIRECTORY: &str = "diff";
const LOGS_DIRECTORY: &str = "logs";
const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Writes failure artifacts below the error directory.
///
/// Nothing is written unless a caller asks for it, and the reference
/// directory is never touched.
#[derive(Debug, Clone)]
pub struct ErrorArtifacts {
    error_directory: PathBuf,
    debug: bool,
    rules: PixelRules,
}

impl ErrorArtifacts {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            error_directory: config.screenshot_error_directory.clone(),
            debug: config.debug,
            rules: PixelRules::new(config),
        }
    }

    pub fn error_directory(&self) -> &Path {
        &self.error_directory
    }

    pub fn diff_directory(&self) -> PathBuf {
        self.error_directory.join(DIFF_DIRECTORY)
    }

    pub fn logs_directory(&self) -> PathBuf {
        self.error_directory.join(LOGS_DIRECTORY)
    }

    /// Create the error directory, plus `diff/` and `logs/` in debug mode.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.error_directory)?;
        if self.debug {
            fs::create_dir_all(self.diff_directory())?;
            fs::create_dir_all(self.logs_directory())?;
        }
        Ok(())
    }

    /// Save a captured screenshot as `{error_dir}/{name}.png`.
    pub fn write_error_screenshot(&self, name: &str, image: &RgbaImage) -> Result<PathBuf> {
        self.ensure_directories()?;
        let path = self.error_directory.join(file_name(name));
        save(image, &path)?;
        info!(path = %path.display(), "wrote error screenshot");
        Ok(path)
    }

    /// Save a diff image as `{error_dir}/diff/{name}.png`. Returns `None`
    /// outside debug mode.
    pub fn write_diff_image(
        &self,
        name: &str,
        reference: &RgbaImage,
        captured: &RgbaImage,
    ) -> Result<Option<PathBuf>> {
        if !self.debug {
            return Ok(None);
        }
        self.ensure_directories()?;
        let path = self.diff_directory().join(file_name(name));
        save(&self.diff_image(reference, captured), &path)?;
        info!(path = %path.display(), "wrote diff image");
        Ok(Some(path))
    }

    /// Pixels the comparator counts as mismatches in red over a darkened
    /// copy of the reference.
    pub fn diff_image(&self, reference: &RgbaImage, captured: &RgbaImage) -> RgbaImage {
        let (reference, captured) = crop_to_be_same_size(reference, captured);
        RgbaImage::from_fn(reference.width(), reference.height(), |x, y| {
            let expected = reference.get_pixel(x, y);
            let actual = captured.get_pixel(x, y);
            if self.rules.is_mismatch(expected, actual) {
                HIGHLIGHT
            } else {
                Rgba([expected[0] / 4, expected[1] / 4, expected[2] / 4, 255])
            }
        })
    }
}

fn file_name(name: &str) -> String {
    format!("{}.png", name.strip_suffix(".png").unwrap_or(name))
}

fn save(image: &RgbaImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|source| ComparisonError::ImageWrite {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::comparator::ImageComparator;

    fn artifacts_in(dir: &Path, debug: bool) -> ErrorArtifacts {
        ErrorArtifacts::new(&AppConfig {
            screenshot_error_directory: dir.join("errors"),
            debug,
            ..AppConfig::default()
        })
    }

    #[test]
    fn test_debug_creates_subdirectories() {
        let dir = tempfile::tempdir().unwrap();

        artifacts_in(dir.path(), false).ensure_directories().unwrap();
        assert!(dir.path().join("errors").is_dir());
        assert!(!dir.path().join("errors/diff").exists());

        artifacts_in(dir.path(), true).ensure_directories().unwrap();
        assert!(dir.path().join("errors/diff").is_dir());
        assert!(dir.path().join("errors/logs").is_dir());
    }

    #[test]
    fn test_write_error_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));

        let path = artifacts_in(dir.path(), false)
            .write_error_screenshot("shot_linux_chrome_120.png", &image)
            .unwrap();

        assert_eq!(path, dir.path().join("errors/shot_linux_chrome_120.png"));
        assert_eq!(image::open(&path).unwrap().to_rgba8(), image);
    }

    #[test]
    fn test_diff_image_only_in_debug_mode() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));

        let written = artifacts_in(dir.path(), false)
            .write_diff_image("shot", &image, &image)
            .unwrap();
        assert!(written.is_none());

        let written = artifacts_in(dir.path(), true)
            .write_diff_image("shot", &image, &image)
            .unwrap();
        assert_eq!(written, Some(dir.path().join("errors/diff/shot.png")));
    }

    #[test]
    fn test_diff_highlights_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let reference = RgbaImage::from_pixel(2, 1, Rgba([200, 100, 40, 255]));
        let mut captured = reference.clone();
        captured.put_pixel(1, 0, Rgba([0, 0, 0, 255]));

        let diff = artifacts_in(dir.path(), true).diff_image(&reference, &captured);
        assert_eq!(*diff.get_pixel(0, 0), Rgba([50, 25, 10, 255]));
        assert_eq!(*diff.get_pixel(1, 0), HIGHLIGHT);
    }

    #[test]
    fn test_diff_skips_pixels_the_comparator_masks() {
        let dir = tempfile::tempdir().unwrap();
        let mut reference = RgbaImage::from_pixel(3, 1, Rgba([0, 0, 0, 255]));
        reference.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        reference.put_pixel(1, 0, Rgba([255, 0, 0, 255]));
        let captured = RgbaImage::from_pixel(3, 1, Rgba([255, 255, 255, 255]));

        let config = AppConfig {
            screenshot_error_directory: dir.path().join("errors"),
            debug: true,
            ..AppConfig::default()
        };
        let comparison = ImageComparator::new(&config).compare_images(&reference, &captured, 0.0);
        assert_eq!(comparison.masked_pixels, 2);
        assert_eq!(comparison.mismatched_pixels, 1);

        let diff = ErrorArtifacts::new(&config).diff_image(&reference, &captured);
        let highlighted = diff.pixels().filter(|p| **p == HIGHLIGHT).count() as u64;
        assert_eq!(highlighted, comparison.mismatched_pixels);
        assert_ne!(*diff.get_pixel(0, 0), HIGHLIGHT);
        assert_ne!(*diff.get_pixel(1, 0), HIGHLIGHT);
        assert_eq!(*diff.get_pixel(2, 0), HIGHLIGHT);
    }
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use image::RgbaImage;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{ComparisonError, Result};
use crate::internal::comparator::{ComparisonReport, ImageComparator};
use crate::internal::models::BrowserDescriptor;
use crate::internal::retry::{RetryOrchestrator, RetryPolicy};
use crate::utils::artifacts::ErrorArtifacts;

/// Source of screenshots, usually a live browser session.
pub trait ScreenshotProvider {
    /// Encoded image bytes (PNG from WebDriver sessions).
    fn capture_screenshot(&mut self) -> anyhow::Result<Vec<u8>>;

    fn capabilities(&self) -> BrowserDescriptor;
}

/// Serves a screenshot already saved to disk.
#[derive(Debug, Clone)]
pub struct FileScreenshotProvider {
    path: PathBuf,
    browser: BrowserDescriptor,
}

impl FileScreenshotProvider {
    pub fn new(path: impl Into<PathBuf>, browser: BrowserDescriptor) -> Self {
        Self {
            path: path.into(),
            browser,
        }
    }
}

impl ScreenshotProvider for FileScreenshotProvider {
    fn capture_screenshot(&mut self) -> anyhow::Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("failed to read screenshot {}", self.path.display()))
    }

    fn capabilities(&self) -> BrowserDescriptor {
        self.browser.clone()
    }
}

/// Captures screenshots and compares them to references, re-capturing a
/// few times when the page may still be settling.
#[derive(Debug, Clone)]
pub struct ScreenComparator {
    comparator: ImageComparator,
    tolerance: f64,
    max_captures: u32,
    retry_delay: Duration,
    artifacts: Option<ErrorArtifacts>,
}

impl ScreenComparator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            comparator: ImageComparator::new(config),
            tolerance: config.screenshot_comparison_tolerance,
            max_captures: config.max_screenshot_retries.max(1),
            retry_delay: config.screenshot_retry_delay(),
            artifacts: None,
        }
    }

    /// Write failure screenshots (and diff images in debug mode).
    pub fn with_artifacts(mut self, artifacts: ErrorArtifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn comparator(&self) -> &ImageComparator {
        &self.comparator
    }

    /// Compare the current screen with the reference derived from
    /// `reference_id` and the provider's browser.
    pub fn compare_screen<P>(&self, provider: &mut P, reference_id: &str) -> Result<ComparisonReport>
    where
        P: ScreenshotProvider + ?Sized,
    {
        let browser = provider.capabilities();
        let reference_name = self
            .comparator
            .name_generator()
            .generate_name(reference_id, &browser);

        let mut last_capture = None;
        let result = self.orchestrator().run_while(
            |_| {
                let captured = capture(provider)?;
                let result = self.comparator.compare_to_reference(
                    &captured,
                    &reference_name,
                    self.tolerance,
                    Some(&browser),
                );
                last_capture = Some(captured);
                result
            },
            ComparisonError::is_retryable,
        );

        if let Err(e) = &result
            && let Some(captured) = &last_capture
        {
            self.record_failure(&reference_name, e, captured, None);
        }
        result
    }

    /// Compare the current screen with a reference image held in memory.
    pub fn compare_screen_to<P>(
        &self,
        provider: &mut P,
        reference: &RgbaImage,
        reference_name: &str,
    ) -> Result<ComparisonReport>
    where
        P: ScreenshotProvider + ?Sized,
    {
        let mut last_capture = None;
        let result = self.orchestrator().run_while(
            |_| {
                let captured = capture(provider)?;
                let diff = self
                    .comparator
                    .compare_images(reference, &captured, self.tolerance);
                last_capture = Some(captured);
                if diff.matches {
                    Ok(ComparisonReport {
                        reference_name: reference_name.to_string(),
                        matched_candidate: reference_name.to_string(),
                        candidates_compared: 1,
                        tolerance: self.tolerance,
                        diff,
                    })
                } else {
                    Err(ComparisonError::Mismatch {
                        reference_name: reference_name.to_string(),
                        candidates: vec![reference_name.to_string()],
                        closest_candidate: reference_name.to_string(),
                        mismatch_ratio: diff.mismatch_ratio,
                        tolerance: self.tolerance,
                    })
                }
            },
            ComparisonError::is_retryable,
        );

        if let Err(e) = &result
            && let Some(captured) = &last_capture
        {
            self.record_failure(reference_name, e, captured, Some(reference));
        }
        result
    }

    fn orchestrator(&self) -> RetryOrchestrator {
        // max_captures is clamped to at least one in new()
        let policy = RetryPolicy::new(self.max_captures).unwrap_or_default();
        RetryOrchestrator::new(policy).with_delay(self.retry_delay)
    }

    fn record_failure(
        &self,
        reference_name: &str,
        failure: &ComparisonError,
        captured: &RgbaImage,
        reference: Option<&RgbaImage>,
    ) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };

        match failure {
            ComparisonError::NoReferenceAvailable { .. } => {
                match artifacts.write_error_screenshot(reference_name, captured) {
                    Ok(path) => info!(
                        "Screenshot for {} saved to {}, copy it to the reference directory to use it as the baseline",
                        reference_name,
                        path.display()
                    ),
                    Err(e) => error!("Failed to save screenshot for {}: {}", reference_name, e),
                }
            }
            ComparisonError::Mismatch {
                closest_candidate, ..
            } => {
                if let Err(e) = artifacts.write_error_screenshot(reference_name, captured) {
                    error!("Failed to save screenshot for {}: {}", reference_name, e);
                }
                let reference = match reference {
                    Some(reference) => Some(reference.clone()),
                    None => self
                        .comparator
                        .resolver()
                        .read_reference(closest_candidate)
                        .ok(),
                };
                if let Some(reference) = reference
                    && let Err(e) = artifacts.write_diff_image(reference_name, &reference, captured)
                {
                    warn!("Failed to write diff image for {}: {}", reference_name, e);
                }
            }
            _ => {}
        }
    }
}

fn capture<P>(provider: &mut P) -> Result<RgbaImage>
where
    P: ScreenshotProvider + ?Sized,
{
    let bytes = provider
        .capture_screenshot()
        .map_err(|e| ComparisonError::Capture(format!("{e:#}")))?;
    let image = image::load_from_memory(&bytes).map_err(ComparisonError::ScreenshotDecode)?;
    Ok(image.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::models::Platform;
    use image::{ImageFormat, Rgba};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::path::Path;

    struct ScriptedProvider {
        frames: VecDeque<anyhow::Result<RgbaImage>>,
        captures: u32,
    }

    impl ScriptedProvider {
        fn new(frames: Vec<anyhow::Result<RgbaImage>>) -> Self {
            Self {
                frames: frames.into(),
                captures: 0,
            }
        }
    }

    impl ScreenshotProvider for ScriptedProvider {
        fn capture_screenshot(&mut self) -> anyhow::Result<Vec<u8>> {
            self.captures += 1;
            let frame = self
                .frames
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no more frames")))?;
            let mut bytes = Vec::new();
            frame.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            Ok(bytes)
        }

        fn capabilities(&self) -> BrowserDescriptor {
            BrowserDescriptor::new("chrome", "120.0.6099.71", Platform::Linux)
        }
    }

    fn solid(color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba(color))
    }

    fn config_in(dir: &Path) -> AppConfig {
        AppConfig {
            screenshot_reference_directory: dir.join("refs"),
            screenshot_error_directory: dir.join("errors"),
            screenshot_retry_delay_ms: 0,
            max_screenshot_retries: 3,
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_recaptures_until_screen_settles() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.screenshot_reference_directory).unwrap();
        solid([0, 0, 0, 255])
            .save(config.screenshot_reference_directory.join("login_linux_chrome_120.png"))
            .unwrap();

        let mut provider = ScriptedProvider::new(vec![
            Ok(solid([255, 255, 255, 255])),
            Ok(solid([0, 0, 0, 255])),
        ]);
        let report = ScreenComparator::new(&config)
            .compare_screen(&mut provider, "login")
            .unwrap();

        assert_eq!(provider.captures, 2);
        assert_eq!(report.matched_candidate, "login_linux_chrome_120.png");
    }

    #[test]
    fn test_missing_reference_is_not_retried_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut provider = ScriptedProvider::new(vec![Ok(solid([9, 9, 9, 255]))]);

        let err = ScreenComparator::new(&config)
            .with_artifacts(ErrorArtifacts::new(&config))
            .compare_screen(&mut provider, "login")
            .unwrap_err();

        assert!(err.is_missing_reference());
        assert_eq!(provider.captures, 1);
        assert!(dir.path().join("errors/login_linux_chrome_120.png").is_file());
        assert!(!dir.path().join("refs").exists());
    }

    #[test]
    fn test_final_mismatch_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            debug: true,
            ..config_in(dir.path())
        };
        let mut provider = ScriptedProvider::new(vec![
            Ok(solid([255, 255, 255, 255])),
            Ok(solid([255, 255, 255, 255])),
            Ok(solid([255, 255, 255, 255])),
        ]);

        let err = ScreenComparator::new(&config)
            .with_artifacts(ErrorArtifacts::new(&config))
            .compare_screen_to(&mut provider, &solid([0, 0, 0, 255]), "banner")
            .unwrap_err();

        assert!(matches!(err, ComparisonError::Mismatch { mismatch_ratio, .. } if mismatch_ratio == 1.0));
        assert_eq!(provider.captures, 3);
        assert!(dir.path().join("errors/banner.png").is_file());
        assert!(dir.path().join("errors/diff/banner.png").is_file());
    }

    #[test]
    fn test_diff_image_uses_closest_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            debug: true,
            max_screenshot_retries: 1,
            ..config_in(dir.path())
        };
        let refs = &config.screenshot_reference_directory;
        std::fs::create_dir_all(refs).unwrap();
        solid([255, 255, 255, 255])
            .save(refs.join("login_linux_chrome_120.png"))
            .unwrap();
        let mut almost = solid([0, 0, 0, 255]);
        almost.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        almost.save(refs.join("login_linux_chrome_120_1.png")).unwrap();

        let mut provider = ScriptedProvider::new(vec![Ok(solid([0, 0, 0, 255]))]);
        let err = ScreenComparator::new(&config)
            .with_artifacts(ErrorArtifacts::new(&config))
            .compare_screen(&mut provider, "login")
            .unwrap_err();

        match err {
            ComparisonError::Mismatch {
                closest_candidate, ..
            } => assert_eq!(closest_candidate, "login_linux_chrome_120_1.png"),
            other => panic!("expected mismatch, got {other:?}"),
        }
        let diff = image::open(dir.path().join("errors/diff/login_linux_chrome_120.png"))
            .unwrap()
            .to_rgba8();
        assert_eq!(*diff.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*diff.get_pixel(1, 1), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_capture_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut provider = ScriptedProvider::new(vec![
            Err(anyhow::anyhow!("session not ready")),
            Ok(solid([0, 0, 0, 255])),
        ]);

        let report = ScreenComparator::new(&config)
            .compare_screen_to(&mut provider, &solid([0, 0, 0, 255]), "banner")
            .unwrap();
        assert_eq!(provider.captures, 2);
        assert!(report.diff.matches);
    }

    #[test]
    fn test_zero_retries_still_captures_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            max_screenshot_retries: 0,
            ..config_in(dir.path())
        };
        let mut provider = ScriptedProvider::new(vec![Ok(solid([1, 1, 1, 255]))]);

        let result = ScreenComparator::new(&config).compare_screen_to(
            &mut provider,
            &solid([200, 200, 200, 255]),
            "banner",
        );
        assert!(result.is_err());
        assert_eq!(provider.captures, 1);
    }
}

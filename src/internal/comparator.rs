use image::{Rgba, RgbaImage};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::cursor::CursorTracker;
use super::geometry::{crop_to_be_same_size, images_same_size};
use super::models::{BrowserDescriptor, MaskMarker};
use super::naming::ReferenceNameGenerator;
use super::resolver::ReferenceResolver;
use crate::config::AppConfig;
use crate::error::{ComparisonError, Result};

/// Pixel statistics of comparing one reference against a screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageDiff {
    /// Size of the compared (cropped) area.
    pub width: u32,
    pub height: u32,
    pub sizes_differ: bool,
    pub compared_pixels: u64,
    pub masked_pixels: u64,
    pub mismatched_pixels: u64,
    /// `mismatched_pixels / compared_pixels`, 0 when nothing was compared.
    pub mismatch_ratio: f64,
    /// The only difference was a text cursor and it was ignored.
    pub cursor_ignored: bool,
    pub matches: bool,
}

/// Outcome of a successful comparison against a reference on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub reference_name: String,
    pub matched_candidate: String,
    pub candidates_compared: usize,
    pub tolerance: f64,
    pub diff: ImageDiff,
}

/// Per-pixel masking and equality rules.
///
/// A pixel counts as different when any RGB channel differs by more than
/// `channel_slack`. Reference pixels equal to the mask marker (and, when
/// enabled, pixels that are not fully opaque) are left out of the
/// comparison entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRules {
    pub channel_slack: u8,
    pub mask_marker: MaskMarker,
    pub mask_transparent_pixels: bool,
}

impl PixelRules {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            channel_slack: config.channel_slack,
            mask_marker: config.mask_marker,
            mask_transparent_pixels: config.mask_transparent_pixels,
        }
    }

    #[inline]
    pub fn is_masked(&self, reference: &Rgba<u8>) -> bool {
        self.mask_marker.matches(reference) || (self.mask_transparent_pixels && reference[3] < 255)
    }

    #[inline]
    pub fn pixels_differ(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        (0..3).any(|c| a[c].abs_diff(b[c]) > self.channel_slack)
    }

    /// Unmasked reference pixel that differs from the captured one.
    #[inline]
    pub fn is_mismatch(&self, reference: &Rgba<u8>, captured: &Rgba<u8>) -> bool {
        !self.is_masked(reference) && self.pixels_differ(reference, captured)
    }
}

/// Compares screenshots against reference images using [`PixelRules`].
#[derive(Debug, Clone)]
pub struct ImageComparator {
    resolver: ReferenceResolver,
    names: ReferenceNameGenerator,
    rules: PixelRules,
    cursor_detection: bool,
}

impl ImageComparator {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            resolver: ReferenceResolver::new(config),
            names: ReferenceNameGenerator::new(),
            rules: PixelRules::new(config),
            cursor_detection: config.screenshot_comparison_cursor_detection,
        }
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn name_generator(&self) -> &ReferenceNameGenerator {
        &self.names
    }

    /// Compare against the reference named after `reference_id` and the
    /// browser that took the screenshot.
    pub fn compare_reference_id(
        &self,
        captured: &RgbaImage,
        reference_id: &str,
        browser: &BrowserDescriptor,
        tolerance: f64,
    ) -> Result<ComparisonReport> {
        let reference_name = self.names.generate_name(reference_id, browser);
        self.compare_to_reference(captured, &reference_name, tolerance, Some(browser))
    }

    /// `Ok(true)` on a match and `Ok(false)` on a pixel mismatch. Missing or
    /// broken references are errors so they can be told apart from a
    /// mismatch.
    pub fn image_equal_to_reference(
        &self,
        captured: &RgbaImage,
        reference_name: &str,
        tolerance: f64,
        browser: Option<&BrowserDescriptor>,
    ) -> Result<bool> {
        match self.compare_to_reference(captured, reference_name, tolerance, browser) {
            Ok(_) => Ok(true),
            Err(ComparisonError::Mismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Try every reference candidate in order; the first one within
    /// tolerance wins.
    #[tracing::instrument(level = "debug", skip(self, captured, browser))]
    pub fn compare_to_reference(
        &self,
        captured: &RgbaImage,
        reference_name: &str,
        tolerance: f64,
        browser: Option<&BrowserDescriptor>,
    ) -> Result<ComparisonReport> {
        let candidates = self.resolver.resolve_candidates(reference_name, browser);

        let mut compared = Vec::new();
        let mut closest: Option<(f64, String)> = None;
        let mut decode_error = None;

        for candidate in candidates.iter() {
            let reference = match self.resolver.read_reference(candidate) {
                Ok(reference) => reference,
                Err(ComparisonError::ReferenceNotFound { path }) => {
                    debug!(path = %path.display(), "reference candidate does not exist");
                    continue;
                }
                Err(e) => {
                    warn!(candidate, error = %e, "skipping unreadable reference candidate");
                    decode_error.get_or_insert(e);
                    continue;
                }
            };

            compared.push(candidate.to_string());
            let diff = self.compare_images(&reference, captured, tolerance);
            debug!(
                candidate,
                mismatch_ratio = diff.mismatch_ratio,
                matches = diff.matches,
                "compared reference candidate"
            );

            if diff.matches {
                info!(reference_name, candidate, "screenshot matched reference");
                return Ok(ComparisonReport {
                    reference_name: reference_name.to_string(),
                    matched_candidate: candidate.to_string(),
                    candidates_compared: compared.len(),
                    tolerance,
                    diff,
                });
            }
            if closest
                .as_ref()
                .is_none_or(|(ratio, _)| diff.mismatch_ratio < *ratio)
            {
                closest = Some((diff.mismatch_ratio, candidate.to_string()));
            }
        }

        match (closest, decode_error) {
            (Some((mismatch_ratio, closest_candidate)), _) => Err(ComparisonError::Mismatch {
                reference_name: reference_name.to_string(),
                candidates: compared,
                closest_candidate,
                mismatch_ratio,
                tolerance,
            }),
            (None, Some(e)) => Err(e),
            (None, None) => {
                error!(
                    "No reference found for {} in {}",
                    reference_name,
                    self.resolver.reference_directory().display()
                );
                Err(ComparisonError::NoReferenceAvailable {
                    reference_name: reference_name.to_string(),
                    directory: self.resolver.reference_directory().to_path_buf(),
                })
            }
        }
    }

    /// Compare against a reference image supplied directly.
    pub fn image_equal_to_image(
        &self,
        captured: &RgbaImage,
        reference: &RgbaImage,
        tolerance: f64,
    ) -> bool {
        self.compare_images(reference, captured, tolerance).matches
    }

    /// Pixel scan of `captured` against `reference` over their common area.
    pub fn compare_images(
        &self,
        reference: &RgbaImage,
        captured: &RgbaImage,
        tolerance: f64,
    ) -> ImageDiff {
        let sizes_differ = !images_same_size(reference, captured);
        let reference_empty = reference.width() == 0 || reference.height() == 0;
        let captured_empty = captured.width() == 0 || captured.height() == 0;
        if reference_empty != captured_empty {
            // An empty image only equals another empty image.
            return ImageDiff {
                width: 0,
                height: 0,
                sizes_differ,
                compared_pixels: 0,
                masked_pixels: 0,
                mismatched_pixels: 0,
                mismatch_ratio: 1.0,
                cursor_ignored: false,
                matches: false,
            };
        }

        let (reference, captured) = crop_to_be_same_size(reference, captured);
        let mut compared_pixels = 0u64;
        let mut masked_pixels = 0u64;
        let mut mismatched_pixels = 0u64;
        let mut cursor = CursorTracker::new();

        for (x, y, expected) in reference.enumerate_pixels() {
            if self.rules.is_masked(expected) {
                masked_pixels += 1;
                continue;
            }
            compared_pixels += 1;
            let actual = captured.get_pixel(x, y);
            if self.rules.pixels_differ(expected, actual) {
                mismatched_pixels += 1;
                if self.cursor_detection {
                    cursor.observe(x, y, expected, actual);
                }
            }
        }

        let mismatch_ratio = if compared_pixels == 0 {
            0.0
        } else {
            mismatched_pixels as f64 / compared_pixels as f64
        };
        let mut matches = mismatch_ratio <= tolerance;
        let mut cursor_ignored = false;
        if !matches && self.cursor_detection && cursor.is_cursor(reference.height()) {
            debug!(mismatched_pixels, "difference is a text cursor, ignoring it");
            matches = true;
            cursor_ignored = true;
        }

        ImageDiff {
            width: reference.width(),
            height: reference.height(),
            sizes_differ,
            compared_pixels,
            masked_pixels,
            mismatched_pixels,
            mismatch_ratio,
            cursor_ignored,
            matches,
        }
    }
}

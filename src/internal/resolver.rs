use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::debug;

use super::models::BrowserDescriptor;
use super::naming::ReferenceNameGenerator;
use crate::config::AppConfig;
use crate::error::{ComparisonError, Result};

const REFERENCE_EXTENSION: &str = ".png";

/// Ordered list of reference file names to compare against.
///
/// The primary candidate is always first, even if its file does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCandidates {
    names: Vec<String>,
}

impl ReferenceCandidates {
    fn new(primary: String) -> Self {
        Self {
            names: vec![primary],
        }
    }

    pub fn primary(&self) -> &str {
        &self.names[0]
    }

    pub fn alternates(&self) -> &[String] {
        &self.names[1..]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.names
    }

    fn push(&mut self, name: String) {
        if !self.names.contains(&name) {
            self.names.push(name);
        }
    }
}

/// Locates and reads reference screenshots below the reference directory.
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    reference_directory: PathBuf,
    max_alternates: u32,
    version_fallback_depth: u32,
}

impl ReferenceResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            reference_directory: config.screenshot_reference_directory.clone(),
            max_alternates: config.max_reference_alternates,
            version_fallback_depth: config.version_fallback_depth,
        }
    }

    pub fn reference_directory(&self) -> &Path {
        &self.reference_directory
    }

    pub fn reference_file(&self, file_name: &str) -> PathBuf {
        self.reference_directory.join(file_name)
    }

    /// Compute the candidate list for a reference name (without extension).
    ///
    /// When `browser` is given and `{reference_name}.png` is missing, the
    /// newest reference of an older browser version becomes the primary
    /// candidate. Numbered alternates are probed for both the requested and
    /// the resolved name.
    #[tracing::instrument(level = "debug", skip(self, browser))]
    pub fn resolve_candidates(
        &self,
        reference_name: &str,
        browser: Option<&BrowserDescriptor>,
    ) -> ReferenceCandidates {
        let requested = strip_extension(reference_name);
        let resolved = match browser {
            Some(browser) => self.find_actual_name(requested, browser),
            None => requested.to_string(),
        };

        let mut candidates = ReferenceCandidates::new(png(&resolved));

        for index in 1..=self.max_alternates {
            let original_alternative = png(&format!("{}_{}", requested, index));
            let actual_alternative = png(&format!("{}_{}", resolved, index));

            let original_found = self.exists(&original_alternative);
            let actual_found = self.exists(&actual_alternative);

            if original_found {
                candidates.push(original_alternative);
            }
            if actual_found {
                candidates.push(actual_alternative);
            }
            if !original_found && !actual_found {
                break;
            }
        }

        debug!(
            primary = candidates.primary(),
            alternates = candidates.alternates().len(),
            "resolved reference candidates"
        );
        candidates
    }

    /// Decode a reference image. Missing and undecodable files are reported
    /// as distinct errors.
    pub fn read_reference(&self, file_name: &str) -> Result<RgbaImage> {
        let path = self.reference_file(file_name);
        if !path.is_file() {
            return Err(ComparisonError::ReferenceNotFound { path });
        }
        match image::open(&path) {
            Ok(image) => Ok(image.to_rgba8()),
            Err(source) => Err(ComparisonError::ReferenceDecode { path, source }),
        }
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.reference_file(file_name).is_file()
    }

    fn find_actual_name(&self, requested: &str, browser: &BrowserDescriptor) -> String {
        if self.exists(&png(requested)) {
            return requested.to_string();
        }
        let Some(major) = ReferenceNameGenerator::major_version(browser) else {
            return requested.to_string();
        };
        self.find_old_reference(requested, browser, major)
            .unwrap_or_else(|| requested.to_string())
    }

    /// Search references made with older versions of the same browser,
    /// newest first.
    fn find_old_reference(
        &self,
        requested: &str,
        browser: &BrowserDescriptor,
        major: u32,
    ) -> Option<String> {
        let navigator_id = ReferenceNameGenerator::navigator_id(browser, major);
        let at = requested.rfind(&navigator_id)?;
        let (prefix, rest) = requested.split_at(at);
        let suffix = &rest[navigator_id.len()..];

        let lowest = major.saturating_sub(self.version_fallback_depth);
        (lowest..major).rev().find_map(|version| {
            let candidate = format!(
                "{}{}{}",
                prefix,
                ReferenceNameGenerator::navigator_id(browser, version),
                suffix
            );
            self.exists(&png(&candidate)).then(|| {
                debug!(requested, fallback = %candidate, "using reference of older browser version");
                candidate
            })
        })
    }
}

fn strip_extension(name: &str) -> &str {
    name.strip_suffix(REFERENCE_EXTENSION).unwrap_or(name)
}

fn png(stem: &str) -> String {
    format!("{}{}", stem, REFERENCE_EXTENSION)
}

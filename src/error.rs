use std::path::PathBuf;

use thiserror::Error;

/// Failures of a screenshot comparison.
#[derive(Error, Debug)]
pub enum ComparisonError {
    /// None of the candidate reference files exist. Callers may store the
    /// captured image as a new baseline instead of failing.
    #[error("no reference found for {reference_name} in {}", directory.display())]
    NoReferenceAvailable {
        reference_name: String,
        directory: PathBuf,
    },

    #[error("reference file {} does not exist", path.display())]
    ReferenceNotFound { path: PathBuf },

    #[error("failed to decode reference image {}", path.display())]
    ReferenceDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(
        "screenshot does not match reference {reference_name}: {:.4}% of pixels differ (tolerance {:.4}%), tried {}",
        mismatch_ratio * 100.0,
        tolerance * 100.0,
        candidates.join(", ")
    )]
    Mismatch {
        reference_name: String,
        candidates: Vec<String>,
        /// Candidate that produced `mismatch_ratio`.
        closest_candidate: String,
        mismatch_ratio: f64,
        tolerance: f64,
    },

    #[error("failed to decode captured screenshot")]
    ScreenshotDecode(#[source] image::ImageError),

    #[error("screenshot capture failed: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write image {}", path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl ComparisonError {
    /// Whether re-capturing the screenshot may change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::Capture(_))
    }

    pub fn is_missing_reference(&self) -> bool {
        matches!(self, Self::NoReferenceAvailable { .. })
    }
}

/// Invalid configuration values.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("screenshot comparison tolerance must be within [0, 1], got {0}")]
    ToleranceOutOfRange(f64),

    #[error("max attempts must be at least 1")]
    ZeroAttempts,

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ComparisonError>;

//! Visual regression comparison for browser screenshots.
//!
//! Screenshots are matched against reference images stored as
//! `{reference_dir}/{id}_{platform}_{browser}_{major}[_{n}].png`. See
//! [`capture::ScreenComparator`] for the usual entry point and
//! [`internal::retry::RetryOrchestrator`] for re-running flaky test bodies.

pub mod capture;
pub mod config;
pub mod error;
pub mod internal;
pub mod utils;

pub use capture::{ScreenComparator, ScreenshotProvider};
pub use config::AppConfig;
pub use error::{ComparisonError, ConfigError};
pub use internal::comparator::{ComparisonReport, ImageComparator, ImageDiff};
pub use internal::models::{BrowserDescriptor, Platform};
pub use internal::naming::ReferenceNameGenerator;
pub use internal::resolver::ReferenceResolver;
pub use internal::retry::{RetryOrchestrator, RetryPolicy};

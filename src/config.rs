use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};

use crate::error::ConfigError;
use crate::internal::models::MaskMarker;

const CONFIG_FILE_NAME: &str = "config.ron";
const ENV_PREFIX: &str = "SHOTDIFF_";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Directory for the daily rolling log file. Logs go to stderr when unset.
    pub log_directory: Option<String>,
    /// Per-module overrides, e.g. `{"shotdiff::internal::resolver": "debug"}`.
    pub module_levels: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Filter directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.level.to_string();
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort_by(|a, b| a.0.cmp(b.0));
        for (module, level) in modules {
            filter_str.push_str(&format!(",{}={}", module, level));
        }
        filter_str
    }
}

/// Settings for screenshot comparison and test retries.
///
/// Every component receives this explicitly; nothing reads it from global
/// state.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the approved reference screenshots.
    pub screenshot_reference_directory: PathBuf,
    /// Directory where failure artifacts are written.
    pub screenshot_error_directory: PathBuf,
    /// Allowed fraction of differing non-masked pixels (0 = exact, 1 = anything).
    pub screenshot_comparison_tolerance: f64,
    /// How many screenshots to capture and compare before giving up.
    pub max_screenshot_retries: u32,
    pub screenshot_retry_delay_ms: u64,
    /// Accept a blinking text cursor as the only difference.
    pub screenshot_comparison_cursor_detection: bool,
    /// Attempts per test body, including the first one.
    pub max_attempts: u32,
    /// Creates `diff/` and `logs/` below the error directory and writes diff images.
    pub debug: bool,
    /// Upper bound for numbered alternate references (`_1`, `_2`, ...).
    pub max_reference_alternates: u32,
    /// How many older browser versions are searched for a reference.
    pub version_fallback_depth: u32,
    /// Largest per-channel difference still treated as equal.
    pub channel_slack: u8,
    pub mask_marker: MaskMarker,
    /// Treat reference pixels with alpha below 255 as masked.
    pub mask_transparent_pixels: bool,
    pub logging: LoggingConfig,
}

pub const DEFAULT_TOLERANCE: f64 = 0.01;
pub const DEFAULT_CHANNEL_SLACK: u8 = 3;
pub const DEFAULT_MAX_ALTERNATES: u32 = 100;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            screenshot_reference_directory: PathBuf::from("reference-screenshots"),
            screenshot_error_directory: PathBuf::from("error-screenshots"),
            screenshot_comparison_tolerance: DEFAULT_TOLERANCE,
            max_screenshot_retries: 2,
            screenshot_retry_delay_ms: 500,
            screenshot_comparison_cursor_detection: false,
            max_attempts: 1,
            debug: false,
            max_reference_alternates: DEFAULT_MAX_ALTERNATES,
            version_fallback_depth: 100,
            channel_slack: DEFAULT_CHANNEL_SLACK,
            mask_marker: MaskMarker::default(),
            mask_transparent_pixels: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config.ron` from the usual places, falling back to defaults.
    pub fn load() -> Self {
        let mut candidates = Vec::new();

        // 1. Current working directory
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));

        // 2. Next to executable
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            candidates.push(dir.join(CONFIG_FILE_NAME));
        }

        // 3. User config directory
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("shotdiff").join(CONFIG_FILE_NAME));
        }

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to load config at {}: {:#}", path.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Self::default()
    }

    /// Load and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: AppConfig = ron::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let tolerance = self.screenshot_comparison_tolerance;
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(ConfigError::ToleranceOutOfRange(tolerance));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }

    /// Apply `SHOTDIFF_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> std::result::Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            })
        }

        if let Some(v) = lookup("REFERENCE_DIRECTORY") {
            self.screenshot_reference_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("ERROR_DIRECTORY") {
            self.screenshot_error_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOLERANCE") {
            self.screenshot_comparison_tolerance = parsed("TOLERANCE", v)?;
        }
        if let Some(v) = lookup("MAX_SCREENSHOT_RETRIES") {
            self.max_screenshot_retries = parsed("MAX_SCREENSHOT_RETRIES", v)?;
        }
        if let Some(v) = lookup("MAX_ATTEMPTS") {
            self.max_attempts = parsed("MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("DEBUG") {
            self.debug = parsed("DEBUG", v)?;
        }
        self.validate()
    }

    pub fn screenshot_retry_delay(&self) -> Duration {
        Duration::from_millis(self.screenshot_retry_delay_ms)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let pretty = ron::ser::PrettyConfig::default()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let content =
            ron::ser::to_string_pretty(self, pretty).context("failed to serialize config")?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Saved config to {}", path.display());
        Ok(())
    }
}

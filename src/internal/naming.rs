use serde::Serialize;

use super::models::{BrowserDescriptor, PlatformFamily};
use crate::utils::version;

/// Token used when the platform or version cannot be determined.
pub const UNKNOWN_TOKEN: &str = "unknown";

/// Browser names that several drivers report differently, mapped to the token
/// stored in reference file names. Lookup is case-insensitive.
const BROWSER_ALIASES: &[(&str, &str)] = &[
    ("edge", "MicrosoftEdge"),
    ("msedge", "MicrosoftEdge"),
    ("microsoft edge", "MicrosoftEdge"),
    ("googlechrome", "chrome"),
    ("google chrome", "chrome"),
    ("chromium", "chrome"),
    ("ff", "firefox"),
    ("mozilla firefox", "firefox"),
    ("safari technology preview", "safari"),
    ("webkit", "safari"),
];

/// How a reference name was put together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameDetails {
    pub reference_name: String,
    pub platform: String,
    pub platform_family: PlatformFamily,
    pub browser: String,
    pub major_version: Option<u32>,
}

/// Derives canonical reference names from a reference id and browser
/// capabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceNameGenerator;

impl ReferenceNameGenerator {
    pub fn new() -> Self {
        Self
    }

    /// `{reference_id}_{platform}_{browser}_{major_version}`
    pub fn generate_name(&self, reference_id: &str, browser: &BrowserDescriptor) -> String {
        let version = Self::major_version(browser)
            .map(|v| v.to_string())
            .unwrap_or_else(|| UNKNOWN_TOKEN.to_string());
        format!(
            "{}_{}_{}_{}",
            reference_id,
            browser.platform.token(),
            Self::browser_token(&browser.browser_name),
            version
        )
    }

    pub fn describe(&self, reference_id: &str, browser: &BrowserDescriptor) -> NameDetails {
        NameDetails {
            reference_name: self.generate_name(reference_id, browser),
            platform: browser.platform.token(),
            platform_family: browser.platform.family(),
            browser: Self::browser_token(&browser.browser_name),
            major_version: Self::major_version(browser),
        }
    }

    pub fn major_version(browser: &BrowserDescriptor) -> Option<u32> {
        version::major_version(browser.effective_version())
    }

    /// Canonical browser token; unrecognized names pass through verbatim.
    pub fn browser_token(browser_name: &str) -> String {
        let trimmed = browser_name.trim();
        if trimmed.is_empty() {
            return UNKNOWN_TOKEN.to_string();
        }
        BROWSER_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or_else(|| trimmed.to_string())
    }

    /// The `{browser}_{major}` part of a canonical name, used by the resolver
    /// when searching for references of older browser versions.
    pub fn navigator_id(browser: &BrowserDescriptor, major_version: u32) -> String {
        format!(
            "{}_{}",
            Self::browser_token(&browser.browser_name),
            major_version
        )
    }
}

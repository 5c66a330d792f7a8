use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// A decoded screenshot as produced by the screenshot provider.
pub type CapturedImage = RgbaImage;

/// Platform family used to group the many platform names a driver may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum PlatformFamily {
    Windows,
    Mac,
    Linux,
    Unknown,
}

/// Operating system reported by the browser session.
///
/// Variants mirror the platform names WebDriver implementations report. The
/// lower-cased variant name is the token used in reference file names, so
/// `Platform::Xp` produces `xp`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Platform {
    #[strum(to_string = "windows", serialize = "win")]
    Windows,
    #[strum(to_string = "xp", serialize = "windows xp")]
    Xp,
    #[strum(to_string = "vista", serialize = "windows vista")]
    Vista,
    #[strum(to_string = "win8", serialize = "windows 8")]
    Win8,
    #[strum(to_string = "win10", serialize = "windows 10")]
    Win10,
    #[strum(to_string = "win11", serialize = "windows 11")]
    Win11,
    #[strum(to_string = "mac", serialize = "mac os x", serialize = "macos", serialize = "darwin")]
    Mac,
    Mojave,
    Catalina,
    #[strum(to_string = "big_sur", serialize = "big sur")]
    BigSur,
    Monterey,
    Ventura,
    Sonoma,
    Linux,
    Unix,
    Android,
    Ios,
    #[default]
    #[strum(to_string = "unknown", serialize = "any")]
    Unknown,
}

impl Platform {
    /// Parse a driver supplied platform string. Anything unrecognized maps to
    /// [`Platform::Unknown`] instead of failing.
    pub fn from_driver_str(raw: &str) -> Self {
        raw.trim().parse().unwrap_or_default()
    }

    pub fn family(&self) -> PlatformFamily {
        match self {
            Self::Windows | Self::Xp | Self::Vista | Self::Win8 | Self::Win10 | Self::Win11 => {
                PlatformFamily::Windows
            }
            Self::Mac
            | Self::Mojave
            | Self::Catalina
            | Self::BigSur
            | Self::Monterey
            | Self::Ventura
            | Self::Sonoma
            | Self::Ios => PlatformFamily::Mac,
            Self::Linux | Self::Unix | Self::Android => PlatformFamily::Linux,
            Self::Unknown => PlatformFamily::Unknown,
        }
    }

    /// Token used inside reference file names.
    pub fn token(&self) -> String {
        self.to_string().to_lowercase()
    }
}

/// Browser capabilities relevant for naming reference screenshots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BrowserDescriptor {
    pub browser_name: String,
    /// Raw version string as reported by the driver, e.g. `"13.0.1"`.
    #[serde(default)]
    pub version: String,
    /// Vendor specific version capability, consulted when `version` is empty.
    #[serde(default)]
    pub fallback_version: Option<String>,
    #[serde(default)]
    pub platform: Platform,
}

impl BrowserDescriptor {
    pub fn new(
        browser_name: impl Into<String>,
        version: impl Into<String>,
        platform: Platform,
    ) -> Self {
        Self {
            browser_name: browser_name.into(),
            version: version.into(),
            fallback_version: None,
            platform,
        }
    }

    pub fn with_fallback_version(mut self, version: impl Into<String>) -> Self {
        self.fallback_version = Some(version.into());
        self
    }

    /// The version string to derive the major version from.
    pub fn effective_version(&self) -> &str {
        match (self.version.trim(), &self.fallback_version) {
            ("", Some(fallback)) => fallback.trim(),
            (version, _) => version,
        }
    }
}

/// Reference pixel color meaning "ignore this location".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskMarker(pub [u8; 3]);

impl MaskMarker {
    /// Fully saturated red.
    pub const RED: MaskMarker = MaskMarker([255, 0, 0]);

    #[inline]
    pub fn matches(&self, pixel: &Rgba<u8>) -> bool {
        pixel[0] == self.0[0] && pixel[1] == self.0[1] && pixel[2] == self.0[2]
    }
}

impl Default for MaskMarker {
    fn default() -> Self {
        Self::RED
    }
}

/// Luma of a pixel using the ITU-R BT.601 weights.
#[inline]
pub fn luminance(pixel: &Rgba<u8>) -> f64 {
    0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64
}

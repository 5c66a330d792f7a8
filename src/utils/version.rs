use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_NUMBER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Extract the major version from a browser version string.
///
/// Build metadata after the first `+` is discarded before looking for the
/// first run of digits, so `"phantomjs-1.8.1+ghostdriver-1.0.2"` yields `1`
/// and `"13.0.1"` yields `13`. Returns `None` when no number is present.
pub fn major_version(raw: &str) -> Option<u32> {
    let product = raw.split('+').next().unwrap_or_default();
    let product = product.split('.').next().unwrap_or_default();
    LEADING_NUMBER_REGEX
        .find(product)
        .or_else(|| LEADING_NUMBER_REGEX.find(raw.split('+').next().unwrap_or_default()))
        .and_then(|m| m.as_str().parse().ok())
}

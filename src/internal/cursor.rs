use image::Rgba;

use super::models::luminance;

/// Tallest vertical run still considered a text cursor.
pub const MAX_CURSOR_HEIGHT: u32 = 48;
/// Shorter runs are only accepted at the top or bottom edge, where the
/// cursor may be clipped.
pub const MIN_CURSOR_HEIGHT: u32 = 5;

const DARK_MAX_LUMINANCE: f64 = 80.0;
const BRIGHT_MIN_LUMINANCE: f64 = 150.0;

/// A cursor pixel is dark on one side and bright on the other.
pub fn is_cursor_pixel(a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
    let (la, lb) = (luminance(a), luminance(b));
    (la < DARK_MAX_LUMINANCE && lb > BRIGHT_MIN_LUMINANCE)
        || (la > BRIGHT_MIN_LUMINANCE && lb < DARK_MAX_LUMINANCE)
}

/// Tracks mismatching pixels during a scan to decide whether the only
/// difference between two images is a blinking text cursor.
#[derive(Debug, Default, Clone)]
pub struct CursorTracker {
    column: Option<u32>,
    top: u32,
    bottom: u32,
    count: u64,
    single_column: bool,
    all_contrast: bool,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self {
            single_column: true,
            all_contrast: true,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, x: u32, y: u32, reference: &Rgba<u8>, captured: &Rgba<u8>) {
        match self.column {
            None => {
                self.column = Some(x);
                self.top = y;
                self.bottom = y;
            }
            Some(column) => {
                if column != x {
                    self.single_column = false;
                }
                self.top = self.top.min(y);
                self.bottom = self.bottom.max(y);
            }
        }
        self.count += 1;
        if !is_cursor_pixel(reference, captured) {
            self.all_contrast = false;
        }
    }

    /// Whether all observed mismatches form one plausible cursor in an image
    /// of the given height.
    pub fn is_cursor(&self, image_height: u32) -> bool {
        if self.column.is_none() || !self.single_column || !self.all_contrast {
            return false;
        }
        let span = self.bottom - self.top + 1;
        if u64::from(span) != self.count || span > MAX_CURSOR_HEIGHT {
            return false;
        }
        let at_edge = self.top == 0 || self.bottom + 1 == image_height;
        span >= MIN_CURSOR_HEIGHT || at_edge
    }
}

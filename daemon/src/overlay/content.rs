//! Overlay inputs. A new bitmap is rasterized whenever the request changes.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

/// Light grey used for all text while ambient
pub const AMBIENT_TEXT: [u8; 3] = [0xcc, 0xcc, 0xcc];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayContent {
    pub time: String,
    pub date: String,
    pub title: String,
    pub artist: String,
    pub debug_lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub ambient: bool,
    /// Text color chosen from the background luminance
    pub text_color: [u8; 3],
    /// Burn-in offset in pixels
    pub offset: (f32, f32),
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            ambient: false,
            text_color: [255, 255, 255],
            offset: (0.0, 0.0),
        }
    }
}

impl OverlayStyle {
    pub fn effective_text_color(&self) -> [u8; 3] {
        if self.ambient {
            AMBIENT_TEXT
        } else {
            self.text_color
        }
    }
}

/// Everything one overlay bitmap depends on
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRequest {
    pub width: u32,
    pub height: u32,
    pub content: OverlayContent,
    pub style: OverlayStyle,
}

/// Black text on light backgrounds, white otherwise
pub fn text_color_for_luminance(luminance: f32) -> [u8; 3] {
    if luminance > 0.5 {
        [0, 0, 0]
    } else {
        [255, 255, 255]
    }
}

/// Whether `format` is a valid strftime string
pub fn is_valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Format `now`, substituting `fallback` for an invalid format string
pub fn format_time(now: &DateTime<Local>, format: &str, fallback: &str) -> String {
    let format = if is_valid_format(format) { format } else { fallback };
    now.format(format).to_string()
}

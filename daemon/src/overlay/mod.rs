//! Frame content builder: rasterizes the clock, date, media title and
//! debug lines into the overlay bitmap

mod content;
mod font;
mod raster;

pub use content::{
    AMBIENT_TEXT, OverlayContent, OverlayRequest, OverlayStyle, format_time, is_valid_format,
    text_color_for_luminance,
};
pub use font::Fonts;
pub use raster::OverlayBuilder;

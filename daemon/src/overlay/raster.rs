//! CPU rasterization of the clock/date/media overlay

use super::content::{OverlayContent, OverlayRequest, OverlayStyle};
use super::font::Fonts;
use crate::bitmap::Bitmap;
use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};

const CLOCK_SIZE: f32 = 120.0;
const AMBIENT_CLOCK_SIZE: f32 = 96.0;
const DATE_SIZE: f32 = 40.0;
const TITLE_SIZE: f32 = 56.0;
const ARTIST_SIZE: f32 = 32.0;
const DEBUG_SIZE: f32 = 14.0;

const CLOCK_TOP_MARGIN: f32 = 80.0;
const DATE_GAP: f32 = 12.0;
const BOTTOM_MARGIN: f32 = 150.0;
const TEXT_GAP: f32 = 16.0;
const SIDE_PADDING: f32 = 20.0;

const DEBUG_X: f32 = 20.0;
const DEBUG_Y: f32 = 50.0;
const DEBUG_BOTTOM_MARGIN: f32 = 100.0;
const DEBUG_LINE_SPACING: f32 = 4.0;

/// Share of the surface height covered by the bottom scrim
const SCRIM_FRACTION: f32 = 0.4;

const AMBIENT_CLOCK_ALPHA: u8 = 200;
const AMBIENT_DATE_ALPHA: u8 = 180;

pub struct OverlayBuilder {
    fonts: Option<Fonts>,
}

impl OverlayBuilder {
    pub fn new(fonts: Option<Fonts>) -> Self {
        if fonts.is_none() {
            log::warn!("No overlay font available, clock and media text disabled");
        }
        Self { fonts }
    }

    pub fn build(&self, request: &OverlayRequest) -> Bitmap {
        let mut bitmap = Bitmap::new(request.width, request.height);
        if bitmap.is_empty() {
            return bitmap;
        }

        let style = &request.style;
        if !style.ambient {
            draw_scrim(&mut bitmap);
        }

        let Some(fonts) = &self.fonts else {
            return bitmap;
        };

        let mut canvas = Canvas {
            bitmap: &mut bitmap,
            width: request.width as f32,
            height: request.height as f32,
        };
        canvas.draw_clock(fonts, &request.content, style);

        // Media and debug text are hidden in ambient to reduce burn-in
        if !style.ambient {
            canvas.draw_media(&fonts.regular, &request.content, style);
            canvas.draw_debug(&fonts.regular, &request.content.debug_lines);
        }

        bitmap
    }
}

/// Transparent to black over the bottom of the surface
fn draw_scrim(bitmap: &mut Bitmap) {
    let width = bitmap.width();
    let height = bitmap.height();
    let scrim = (height as f32 * SCRIM_FRACTION).round() as u32;
    if scrim == 0 {
        return;
    }
    let top = height - scrim;

    for y in top..height {
        let t = (y - top) as f32 / scrim.saturating_sub(1).max(1) as f32;
        let alpha = (t.clamp(0.0, 1.0) * 255.0).round() as u8;
        for x in 0..width {
            bitmap.blend_pixel(x as i32, y as i32, [0, 0, 0, alpha]);
        }
    }
}

struct Canvas<'a> {
    bitmap: &'a mut Bitmap,
    width: f32,
    height: f32,
}

impl Canvas<'_> {
    fn draw_clock(&mut self, fonts: &Fonts, content: &OverlayContent, style: &OverlayStyle) {
        let color = style.effective_text_color();
        let center_x = self.width / 2.0 + style.offset.0;

        let (clock_font, clock_size, clock_alpha, date_alpha) = if style.ambient {
            (
                &fonts.regular,
                AMBIENT_CLOCK_SIZE,
                AMBIENT_CLOCK_ALPHA,
                AMBIENT_DATE_ALPHA,
            )
        } else {
            (&fonts.bold, CLOCK_SIZE, 255, 255)
        };

        let clock_y = CLOCK_TOP_MARGIN + clock_size + style.offset.1;
        let scale = PxScale::from(clock_size);
        let clock_w = measure_text(&content.time, clock_font, scale);
        self.draw_text(
            clock_font,
            &content.time,
            rgba(color, clock_alpha),
            center_x - clock_w / 2.0,
            clock_y,
            scale,
        );

        let date_y = clock_y + DATE_SIZE + DATE_GAP;
        let scale = PxScale::from(DATE_SIZE);
        let date_w = measure_text(&content.date, &fonts.regular, scale);
        self.draw_text(
            &fonts.regular,
            &content.date,
            rgba(color, date_alpha),
            center_x - date_w / 2.0,
            date_y,
            scale,
        );
    }

    /// Title above artist, stacked upward from the bottom margin
    fn draw_media(&mut self, font: &FontArc, content: &OverlayContent, style: &OverlayStyle) {
        let title = content.title.trim();
        let artist = content.artist.trim();
        if title.is_empty() && artist.is_empty() {
            return;
        }

        let max_width = self.width - SIDE_PADDING * 2.0;
        if max_width <= 0.0 {
            return;
        }

        let color = rgba(style.effective_text_color(), 255);
        let center_x = self.width / 2.0 + style.offset.0;
        let mut bottom = self.height - BOTTOM_MARGIN;

        if !artist.is_empty() {
            bottom = self.draw_block_above(
                font,
                artist,
                ARTIST_SIZE,
                max_width,
                center_x,
                bottom,
                color,
            );
        }
        bottom -= TEXT_GAP;
        if !title.is_empty() {
            self.draw_block_above(font, title, TITLE_SIZE, max_width, center_x, bottom, color);
        }
    }

    /// Draw wrapped, centered `text` ending at `bottom`; returns its top edge
    #[allow(clippy::too_many_arguments)]
    fn draw_block_above(
        &mut self,
        font: &FontArc,
        text: &str,
        size: f32,
        max_width: f32,
        center_x: f32,
        bottom: f32,
        color: [u8; 4],
    ) -> f32 {
        let scale = PxScale::from(size);
        let metrics = LineMetrics::new(font, scale);
        let lines = wrap_text(text, font, scale, max_width);
        let top = bottom - metrics.height() * lines.len() as f32;

        for (i, line) in lines.iter().enumerate() {
            let baseline = top + metrics.height() * i as f32 + metrics.ascent;
            let w = measure_text(line, font, scale);
            self.draw_text(font, line, color, center_x - w / 2.0, baseline, scale);
        }
        top
    }

    /// Newest lines stay above the bottom margin; older ones scroll off
    fn draw_debug(&mut self, font: &FontArc, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let max_width = self.width - DEBUG_X * 2.0;
        if max_width <= 0.0 {
            return;
        }

        let scale = PxScale::from(DEBUG_SIZE);
        let metrics = LineMetrics::new(font, scale);
        let wrapped: Vec<Vec<String>> = lines
            .iter()
            .map(|line| wrap_text(line, font, scale, max_width))
            .collect();
        let total: f32 = wrapped
            .iter()
            .map(|block| block.len() as f32 * metrics.height() + DEBUG_LINE_SPACING)
            .sum();

        let available = self.height - DEBUG_Y - DEBUG_BOTTOM_MARGIN;
        let mut y = if total > available {
            DEBUG_Y + available - total
        } else {
            DEBUG_Y
        };

        let color = [0xcc, 0xcc, 0xcc, 255];
        for block in wrapped {
            let block_height = block.len() as f32 * metrics.height();
            if y + block_height > DEBUG_Y && y < self.height {
                for (i, line) in block.iter().enumerate() {
                    let baseline = y + metrics.height() * i as f32 + metrics.ascent;
                    self.draw_text(font, line, color, DEBUG_X, baseline, scale);
                }
            }
            y += block_height + DEBUG_LINE_SPACING;
        }
    }

    fn draw_text(
        &mut self,
        font: &FontArc,
        text: &str,
        color: [u8; 4],
        left: f32,
        baseline: f32,
        scale: PxScale,
    ) {
        let scaled = font.as_scaled(scale);
        let mut cursor_x = left;
        let mut previous = None;
        for ch in text.chars() {
            if ch.is_control() {
                continue;
            }
            let glyph = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                cursor_x += scaled.kern(prev, glyph);
            }
            let advance = scaled.h_advance(glyph);
            let mut positioned = scaled.scaled_glyph(ch);
            positioned.position = point(cursor_x, baseline);
            if let Some(outline) = font.outline_glyph(positioned) {
                let bounds = outline.px_bounds();
                let bitmap = &mut *self.bitmap;
                outline.draw(|x, y, coverage| {
                    let alpha = (color[3] as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
                    if alpha > 0 {
                        bitmap.blend_pixel(
                            bounds.min.x as i32 + x as i32,
                            bounds.min.y as i32 + y as i32,
                            [color[0], color[1], color[2], alpha],
                        );
                    }
                });
            }
            cursor_x += advance;
            previous = Some(glyph);
        }
    }
}

fn rgba(color: [u8; 3], alpha: u8) -> [u8; 4] {
    [color[0], color[1], color[2], alpha]
}

struct LineMetrics {
    ascent: f32,
    descent: f32,
    line_gap: f32,
}

impl LineMetrics {
    fn new(font: &FontArc, scale: PxScale) -> Self {
        let scaled = font.as_scaled(scale);
        Self {
            ascent: scaled.ascent(),
            descent: scaled.descent().abs(),
            line_gap: scaled.line_gap(),
        }
    }

    fn height(&self) -> f32 {
        self.ascent + self.descent + self.line_gap
    }
}

fn wrap_text(text: &str, font: &FontArc, scale: PxScale, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        let candidate = if current_line.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current_line, word)
        };

        if measure_text(&candidate, font, scale) <= max_width {
            current_line = candidate;
        } else {
            if !current_line.is_empty() {
                lines.push(std::mem::take(&mut current_line));
            }
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }
    lines
}

fn measure_text(text: &str, font: &FontArc, scale: PxScale) -> f32 {
    let scaled = font.as_scaled(scale);
    let mut width = 0.0f32;
    let mut previous = None;
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let glyph = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            width += scaled.kern(prev, glyph);
        }
        width += scaled.h_advance(glyph);
        previous = Some(glyph);
    }
    width.max(0.0)
}

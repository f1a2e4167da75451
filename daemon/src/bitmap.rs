//! CPU-side RGBA bitmaps: decoding, center-crop scaling and the generated
//! gradient fallback.

use anyhow::{Context, Result};
use std::path::Path;

/// Fallback gradient stops: #0F0C29, #302B63, #24243E
pub const DEFAULT_GRADIENT: [[u8; 3]; 3] = [[0x0f, 0x0c, 0x29], [0x30, 0x2b, 0x63], [0x24, 0x24, 0x3e]];

/// Straight-alpha RGBA8 bitmap with a top-left origin
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Bitmap {
    /// Fully transparent bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut bitmap = Self::new(width, height);
        for px in bitmap.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        bitmap
    }

    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Bitmap dimensions must be non-zero ({}x{})", width, height);
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            anyhow::bail!(
                "Invalid bitmap data size: expected {} bytes ({}x{} RGBA), got {} bytes",
                expected,
                width,
                height,
                pixels.len()
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Straight-alpha "source over" blend of one pixel
    pub fn blend_pixel(&mut self, x: i32, y: i32, rgba: [u8; 4]) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let dst = &mut self.pixels[i..i + 4];
        let sa = rgba[3] as f32 / 255.0;
        let da = dst[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            dst.copy_from_slice(&[0, 0, 0, 0]);
            return;
        }
        for c in 0..3 {
            let s = rgba[c] as f32 * sa;
            let d = dst[c] as f32 * da * (1.0 - sa);
            dst[c] = ((s + d) / out_a).round().clamp(0.0, 255.0) as u8;
        }
        dst[3] = (out_a * 255.0).round() as u8;
    }

    /// Decode an image file. SVG documents are rasterized at their
    /// intrinsic size.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_svg = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("svg"))
            .unwrap_or(false);

        if is_svg {
            return Self::load_svg(path);
        }

        log::info!("Loading image: {}", path.display());
        let image = image::open(path)
            .with_context(|| format!("Failed to load image: {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        log::info!("Loaded image: {}x{} ({})", width, height, path.display());

        Self::from_rgba(width, height, image.into_raw())
    }

    fn load_svg(path: &Path) -> Result<Self> {
        use resvg::{tiny_skia, usvg};

        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read SVG: {}", path.display()))?;
        let tree = usvg::Tree::from_data(&data, &usvg::Options::default())
            .with_context(|| format!("Failed to parse SVG: {}", path.display()))?;

        let size = tree.size().to_int_size();
        let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
            .context("SVG has an empty canvas")?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        // tiny-skia stores premultiplied pixels
        let mut pixels = Vec::with_capacity(pixmap.data().len());
        for px in pixmap.pixels() {
            let c = px.demultiply();
            pixels.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }

        Self::from_rgba(size.width(), size.height(), pixels)
    }

    /// Scale to fill `target_width` x `target_height` and crop the overflow
    /// evenly from both sides.
    pub fn center_crop(&self, target_width: u32, target_height: u32) -> Result<Self> {
        if target_width == 0 || target_height == 0 {
            anyhow::bail!("Invalid crop target {}x{}", target_width, target_height);
        }
        if self.width == target_width && self.height == target_height {
            return Ok(self.clone());
        }

        let target_ratio = target_width as f32 / target_height as f32;
        let img_ratio = self.width as f32 / self.height as f32;

        let (scale_width, scale_height) = if target_ratio > img_ratio {
            // Target is wider, scale to width
            let scale = target_width as f32 / self.width as f32;
            (target_width, ((self.height as f32 * scale).round() as u32).max(target_height))
        } else {
            // Target is taller, scale to height
            let scale = target_height as f32 / self.height as f32;
            (((self.width as f32 * scale).round() as u32).max(target_width), target_height)
        };

        let resized = self.resize(scale_width, scale_height)?;

        let x_offset = (scale_width - target_width) / 2;
        let y_offset = (scale_height - target_height) / 2;
        let mut out = Vec::with_capacity(target_width as usize * target_height as usize * 4);
        let stride = scale_width as usize * 4;
        for row in y_offset..y_offset + target_height {
            let start = row as usize * stride + x_offset as usize * 4;
            out.extend_from_slice(&resized.pixels[start..start + target_width as usize * 4]);
        }

        Self::from_rgba(target_width, target_height, out)
    }

    /// Fast resampling using fast_image_resize
    fn resize(&self, target_width: u32, target_height: u32) -> Result<Self> {
        use fast_image_resize as fr;

        let src = fr::images::Image::from_vec_u8(
            self.width,
            self.height,
            self.pixels.clone(),
            fr::PixelType::U8x4,
        )
        .context("Failed to create source image")?;

        let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)),
            )
            .context("Failed to resize image")?;

        Self::from_rgba(target_width, target_height, dst.into_vec())
    }

    /// Diagonal gradient from the top-left to the bottom-right corner
    pub fn gradient(width: u32, height: u32, stops: &[[u8; 3]]) -> Self {
        let stops = if stops.is_empty() {
            &DEFAULT_GRADIENT[..]
        } else {
            stops
        };
        let mut bitmap = Self::new(width, height);
        if bitmap.is_empty() {
            return bitmap;
        }

        let span = (width + height).saturating_sub(2).max(1) as f32;
        let segments = (stops.len() - 1).max(1) as f32;
        let w = width as usize;

        for (i, px) in bitmap.pixels.chunks_exact_mut(4).enumerate() {
            let x = (i % w) as f32;
            let y = (i / w) as f32;
            let t = (x + y) / span;

            let rgb = if stops.len() == 1 {
                stops[0]
            } else {
                let pos = t * segments;
                let idx = (pos.floor() as usize).min(stops.len() - 2);
                let local = pos - idx as f32;
                let (a, b) = (stops[idx], stops[idx + 1]);
                [
                    lerp(a[0], b[0], local),
                    lerp(a[1], b[1], local),
                    lerp(a[2], b[2], local),
                ]
            };
            px.copy_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        bitmap
    }

    /// Mean luminance (0..1) of the top `fraction` of the bitmap
    pub fn top_luminance(&self, fraction: f32) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let rows = ((self.height as f32 * fraction.clamp(0.0, 1.0)).ceil() as u32).max(1);
        let count = rows as usize * self.width as usize;
        let sum: f64 = self.pixels[..count * 4]
            .chunks_exact(4)
            .map(|px| 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64)
            .sum();
        (sum / count as f64 / 255.0) as f32
    }
}

fn lerp(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8
}

/// Parse a hex color string (e.g., "#FF5733" or "FF5733") to RGBA
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8, u8)> {
    let color = color.trim_start_matches('#');

    if (color.len() != 6 && color.len() != 8) || !color.is_ascii() {
        return None;
    }

    let r = u8::from_str_radix(&color[0..2], 16).ok()?;
    let g = u8::from_str_radix(&color[2..4], 16).ok()?;
    let b = u8::from_str_radix(&color[4..6], 16).ok()?;
    let a = if color.len() == 8 {
        u8::from_str_radix(&color[6..8], 16).ok()?
    } else {
        255
    };

    Some((r, g, b, a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF5733"), Some((255, 87, 51, 255)));
        assert_eq!(parse_hex_color("FF5733"), Some((255, 87, 51, 255)));
        assert_eq!(parse_hex_color("#FF573380"), Some((255, 87, 51, 128)));
        assert_eq!(parse_hex_color("0F0C29"), Some((0x0f, 0x0c, 0x29, 255)));
        assert_eq!(parse_hex_color("invalid"), None);
    }

    #[test]
    fn test_from_rgba_checks_size() {
        assert!(Bitmap::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(Bitmap::from_rgba(2, 2, vec![0; 15]).is_err());
        assert!(Bitmap::from_rgba(0, 2, vec![]).is_err());
    }

    #[test]
    fn test_center_crop_keeps_middle() {
        // 4x2 image: left half red, right half blue, with a green middle band
        let mut pixels = Vec::new();
        for _y in 0..2 {
            for x in 0..4 {
                let px = match x {
                    0 => [255, 0, 0, 255],
                    3 => [0, 0, 255, 255],
                    _ => [0, 255, 0, 255],
                };
                pixels.extend_from_slice(&px);
            }
        }
        let wide = Bitmap::from_rgba(4, 2, pixels).unwrap();

        let cropped = wide.center_crop(2, 2).unwrap();
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.height(), 2);
        // Only the green middle survives; the red/blue sides are cropped
        for y in 0..2 {
            for x in 0..2 {
                let px = cropped.pixel(x, y);
                assert!(px[1] > 200 && px[0] < 60 && px[2] < 60, "{:?}", px);
            }
        }
    }

    #[test]
    fn test_center_crop_upscales_to_fill() {
        let small = Bitmap::solid(3, 5, [10, 20, 30, 255]);
        let filled = small.center_crop(16, 9).unwrap();
        assert_eq!((filled.width(), filled.height()), (16, 9));
        for (x, y) in [(0, 0), (15, 8), (8, 4)] {
            let px = filled.pixel(x, y);
            assert!(px[0].abs_diff(10) <= 1 && px[1].abs_diff(20) <= 1 && px[2].abs_diff(30) <= 1);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_gradient_endpoints() {
        let g = Bitmap::gradient(10, 10, &DEFAULT_GRADIENT);
        assert_eq!(g.pixel(0, 0), [0x0f, 0x0c, 0x29, 255]);
        assert_eq!(g.pixel(9, 9), [0x24, 0x24, 0x3e, 255]);
        // The diagonal midpoint sits on the middle stop
        let mid = Bitmap::gradient(3, 3, &DEFAULT_GRADIENT).pixel(1, 1);
        assert_eq!(mid, [0x30, 0x2b, 0x63, 255]);
    }

    #[test]
    fn test_top_luminance() {
        let mut bitmap = Bitmap::solid(4, 10, [0, 0, 0, 255]);
        // Top two rows are white
        for px in bitmap.pixels_mut()[..4 * 2 * 4].chunks_exact_mut(4) {
            px.copy_from_slice(&[255, 255, 255, 255]);
        }
        assert!(bitmap.top_luminance(0.2) > 0.99);
        assert!(bitmap.top_luminance(1.0) < 0.25);
    }

    #[test]
    fn test_blend_pixel() {
        let mut bitmap = Bitmap::solid(1, 1, [0, 0, 0, 255]);
        bitmap.blend_pixel(0, 0, [255, 255, 255, 128]);
        let px = bitmap.pixel(0, 0);
        assert!((126..=130).contains(&px[0]));
        assert_eq!(px[3], 255);

        // Out of bounds writes are ignored
        bitmap.blend_pixel(-1, 3, [255, 0, 0, 255]);
    }
}

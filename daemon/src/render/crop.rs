//! Quad transforms: center-crop model matrices and texture-coordinate flips.
//!
//! Matrices are column-major `[f32; 16]`, matching what the WGSL shaders
//! receive. The unit quad spans `[-1, 1]` in both axes and its texture
//! coordinates follow a bottom-left origin, so every top-left origin raster
//! needs [`Y_FLIP`] as its texture transform.

/// 4x4 column-major matrix
pub type Mat4 = [f32; 16];

/// 16:9, used for video before the decoder reports its size
pub const DEFAULT_VIDEO_RATIO: f32 = 16.0 / 9.0;

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Maps `(s, t)` to `(s, 1 - t)`
pub const Y_FLIP: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 1.0,
];

pub fn scale(sx: f32, sy: f32) -> Mat4 {
    let mut m = IDENTITY;
    m[0] = sx;
    m[5] = sy;
    m
}

/// Per-axis quad scale that center-crops `content_ratio` into `screen_ratio`.
///
/// The relatively longer axis of the content is stretched past the surface
/// edge; the other axis stays at exactly 1 so it fills the surface with no
/// border.
pub fn crop_scale(content_ratio: f32, screen_ratio: f32) -> (f32, f32) {
    if !(content_ratio.is_finite() && screen_ratio.is_finite())
        || content_ratio <= 0.0
        || screen_ratio <= 0.0
    {
        return (1.0, 1.0);
    }

    if content_ratio > screen_ratio {
        (content_ratio / screen_ratio, 1.0)
    } else {
        (1.0, screen_ratio / content_ratio)
    }
}

/// Model matrix for drawing `content_w x content_h` center-cropped onto a
/// `surface_w x surface_h` surface.
pub fn center_crop(content_w: u32, content_h: u32, surface_w: u32, surface_h: u32) -> Mat4 {
    if content_h == 0 || surface_h == 0 {
        return IDENTITY;
    }
    center_crop_ratio(
        content_w as f32 / content_h as f32,
        surface_w as f32 / surface_h as f32,
    )
}

pub fn center_crop_ratio(content_ratio: f32, screen_ratio: f32) -> Mat4 {
    let (sx, sy) = crop_scale(content_ratio, screen_ratio);
    scale(sx, sy)
}

/// Column-major matrix times `(x, y, 0, 1)`
pub fn transform_point(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[4] * y + m[12], m[1] * x + m[5] * y + m[13])
}

/// Inverse of the 2D affine part of `m`, or `None` when it is singular
pub fn invert_affine_2d(m: &Mat4) -> Option<Mat4> {
    let (a, b, c, d) = (m[0], m[1], m[4], m[5]);
    let (tx, ty) = (m[12], m[13]);
    let det = a * d - b * c;
    if det.abs() < f32::EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let ia = d * inv_det;
    let ib = -b * inv_det;
    let ic = -c * inv_det;
    let id = a * inv_det;

    let mut out = IDENTITY;
    out[0] = ia;
    out[1] = ib;
    out[4] = ic;
    out[5] = id;
    out[12] = -(ia * tx + ic * ty);
    out[13] = -(ib * tx + id * ty);
    Some(out)
}

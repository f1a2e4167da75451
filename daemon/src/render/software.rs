//! CPU compositing backend.
//!
//! Implements the same quad/matrix/blend contract as the wgpu backend with
//! nearest-neighbour sampling. Used when the `gpu` feature is off, when no
//! adapter is available, and by the renderer tests.

use super::backend::{
    Blend, GraphicsBackend, PresentedFrame, Program, RenderError, TextureId, TextureKind,
    VideoFrame,
};
use super::crop::{Mat4, invert_affine_2d, transform_point};
use crate::bitmap::Bitmap;
use rayon::prelude::*;
use std::collections::HashMap;

struct SoftTexture {
    kind: TextureKind,
    width: u32,
    height: u32,
    /// RGBA8
    pixels: Vec<u8>,
}

struct SoftContext {
    width: u32,
    height: u32,
    /// RGBA8, row 0 is the top of the surface
    target: Vec<u8>,
    textures: HashMap<TextureId, SoftTexture>,
}

#[derive(Default)]
pub struct SoftwareBackend {
    context: Option<SoftContext>,
    next_texture: u32,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn context_mut(&mut self) -> Result<&mut SoftContext, RenderError> {
        self.context.as_mut().ok_or(RenderError::NoContext)
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn create_context(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Context(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }
        self.context = Some(SoftContext {
            width,
            height,
            target: vec![0; width as usize * height as usize * 4],
            textures: HashMap::new(),
        });
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.context = None;
    }

    fn has_context(&self) -> bool {
        self.context.is_some()
    }

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureId, RenderError> {
        self.next_texture += 1;
        let id = TextureId(self.next_texture);
        self.context_mut()?.textures.insert(
            id,
            SoftTexture {
                kind,
                width: 0,
                height: 0,
                pixels: Vec::new(),
            },
        );
        Ok(id)
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.textures.remove(&id);
        }
    }

    fn upload_bitmap(&mut self, id: TextureId, bitmap: &Bitmap) -> Result<(), RenderError> {
        if bitmap.is_empty() {
            return Err(RenderError::Upload("empty bitmap".to_string()));
        }
        let tex = self
            .context_mut()?
            .textures
            .get_mut(&id)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", id)))?;
        tex.width = bitmap.width();
        tex.height = bitmap.height();
        tex.pixels.clear();
        tex.pixels.extend_from_slice(bitmap.pixels());
        Ok(())
    }

    fn upload_video_frame(&mut self, id: TextureId, frame: &VideoFrame) -> Result<(), RenderError> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
            return Err(RenderError::Upload(format!(
                "video frame {}x{} has {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }
        let tex = self
            .context_mut()?
            .textures
            .get_mut(&id)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", id)))?;
        tex.width = frame.width;
        tex.height = frame.height;
        tex.pixels.resize(expected, 0);
        // BGRA -> RGBA
        for (dst, src) in tex
            .pixels
            .chunks_exact_mut(4)
            .zip(frame.data.chunks_exact(4))
        {
            dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
        }
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        if ctx.width != width || ctx.height != height {
            ctx.width = width;
            ctx.height = height;
            ctx.target = vec![0; width as usize * height as usize * 4];
        }
        Ok(())
    }

    fn clear(&mut self, color: [f32; 4]) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        let px = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        for dst in ctx.target.chunks_exact_mut(4) {
            dst.copy_from_slice(&px);
        }
        Ok(())
    }

    fn draw_quad(
        &mut self,
        program: Program,
        texture: TextureId,
        mvp: &Mat4,
        st: &Mat4,
        blend: Blend,
    ) -> Result<(), RenderError> {
        let ctx = self.context_mut()?;
        let SoftContext {
            width,
            height,
            target,
            textures,
        } = ctx;

        let tex = textures
            .get(&texture)
            .ok_or_else(|| RenderError::Upload(format!("unknown texture {:?}", texture)))?;
        if tex.kind != program.texture_kind() {
            return Err(RenderError::Shader(format!(
                "{:?} program cannot sample a {:?} texture",
                program, tex.kind
            )));
        }
        if tex.width == 0 || tex.height == 0 {
            return Ok(());
        }
        let inverse = invert_affine_2d(mvp)
            .ok_or_else(|| RenderError::Shader("singular model matrix".to_string()))?;

        let (w, h) = (*width, *height);
        let (tw, th) = (tex.width as i64, tex.height as i64);
        let opaque_output = program == Program::External;

        target
            .par_chunks_mut(w as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let ndc_y = 1.0 - 2.0 * (y as f32 + 0.5) / h as f32;
                for x in 0..w as usize {
                    let ndc_x = 2.0 * (x as f32 + 0.5) / w as f32 - 1.0;
                    let (qx, qy) = transform_point(&inverse, ndc_x, ndc_y);
                    if !(-1.0..=1.0).contains(&qx) || !(-1.0..=1.0).contains(&qy) {
                        continue;
                    }

                    let (s, t) = transform_point(st, (qx + 1.0) * 0.5, (qy + 1.0) * 0.5);
                    // Clamp to edge, row 0 of the texture is t = 0
                    let sx = ((s * tw as f32).floor() as i64).clamp(0, tw - 1);
                    let sy = ((t * th as f32).floor() as i64).clamp(0, th - 1);
                    let i = ((sy * tw + sx) * 4) as usize;
                    let mut src = [
                        tex.pixels[i],
                        tex.pixels[i + 1],
                        tex.pixels[i + 2],
                        tex.pixels[i + 3],
                    ];
                    if opaque_output {
                        src[3] = 255;
                    }

                    let dst = &mut row[x * 4..x * 4 + 4];
                    match blend {
                        Blend::Opaque => dst.copy_from_slice(&src),
                        Blend::StraightAlpha => blend_straight(dst, src),
                    }
                }
            });

        Ok(())
    }

    fn read_frame(&mut self) -> Result<PresentedFrame, RenderError> {
        let ctx = self.context_mut()?;
        let mut argb = vec![0u8; ctx.target.len()];
        for (dst, src) in argb.chunks_exact_mut(4).zip(ctx.target.chunks_exact(4)) {
            // The surface is opaque
            dst.copy_from_slice(&[src[2], src[1], src[0], 255]);
        }
        Ok(PresentedFrame {
            width: ctx.width,
            height: ctx.height,
            argb,
        })
    }
}

/// Color: `SrcAlpha, OneMinusSrcAlpha`; alpha: `One, OneMinusSrcAlpha`
fn blend_straight(dst: &mut [u8], src: [u8; 4]) {
    let a = src[3] as f32 / 255.0;
    for c in 0..3 {
        let v = src[c] as f32 * a + dst[c] as f32 * (1.0 - a);
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    let out_a = src[3] as f32 + dst[3] as f32 * (1.0 - a);
    dst[3] = out_a.round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::crop::{IDENTITY, Y_FLIP, scale};

    fn backend(w: u32, h: u32) -> SoftwareBackend {
        let mut b = SoftwareBackend::new();
        b.create_context(w, h).unwrap();
        b
    }

    /// 1x2 bitmap: red on top, blue below
    fn red_over_blue() -> Bitmap {
        Bitmap::from_rgba(1, 2, vec![255, 0, 0, 255, 0, 0, 255, 255]).unwrap()
    }

    #[test]
    fn test_y_flip_keeps_bitmap_upright() {
        let mut b = backend(2, 2);
        let tex = b.create_texture(TextureKind::Static2D).unwrap();
        b.upload_bitmap(tex, &red_over_blue()).unwrap();
        b.draw_quad(Program::Standard2D, tex, &IDENTITY, &Y_FLIP, Blend::Opaque)
            .unwrap();
        let frame = b.read_frame().unwrap();
        assert_eq!(frame.rgba(0, 0), [255, 0, 0, 255]);
        assert_eq!(frame.rgba(1, 1), [0, 0, 255, 255]);

        // Without the flip the raster lands upside down
        b.draw_quad(Program::Standard2D, tex, &IDENTITY, &IDENTITY, Blend::Opaque)
            .unwrap();
        let frame = b.read_frame().unwrap();
        assert_eq!(frame.rgba(0, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn test_program_texture_kind_mismatch() {
        let mut b = backend(2, 2);
        let video = b.create_texture(TextureKind::ExternalVideo).unwrap();
        let err = b
            .draw_quad(Program::Standard2D, video, &IDENTITY, &Y_FLIP, Blend::Opaque)
            .unwrap_err();
        assert!(matches!(err, RenderError::Shader(_)));
    }

    #[test]
    fn test_straight_alpha_blend() {
        let mut b = backend(1, 1);
        b.clear([0.0, 0.0, 1.0, 1.0]).unwrap();
        let tex = b.create_texture(TextureKind::Static2D).unwrap();
        b.upload_bitmap(tex, &Bitmap::solid(1, 1, [255, 0, 0, 0])).unwrap();
        b.draw_quad(Program::Standard2D, tex, &IDENTITY, &Y_FLIP, Blend::StraightAlpha)
            .unwrap();
        // Fully transparent overlay leaves the background untouched
        assert_eq!(b.read_frame().unwrap().rgba(0, 0), [0, 0, 255, 255]);

        b.upload_bitmap(tex, &Bitmap::solid(1, 1, [255, 0, 0, 255])).unwrap();
        b.draw_quad(Program::Standard2D, tex, &IDENTITY, &Y_FLIP, Blend::StraightAlpha)
            .unwrap();
        assert_eq!(b.read_frame().unwrap().rgba(0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_video_frame_is_bgra() {
        let mut b = backend(1, 1);
        let tex = b.create_texture(TextureKind::ExternalVideo).unwrap();
        let frame = VideoFrame {
            width: 1,
            height: 1,
            data: vec![10, 20, 30, 0],
            transform: Y_FLIP,
            generation: 1,
        };
        b.upload_video_frame(tex, &frame).unwrap();
        b.draw_quad(Program::External, tex, &IDENTITY, &frame.transform, Blend::Opaque)
            .unwrap();
        assert_eq!(b.read_frame().unwrap().rgba(0, 0), [30, 20, 10, 255]);
    }

    #[test]
    fn test_scaled_quad_crops_sides() {
        // 3x1 content stretched 3x horizontally on a 1x1 surface shows the middle
        let mut b = backend(1, 1);
        let tex = b.create_texture(TextureKind::Static2D).unwrap();
        let content = Bitmap::from_rgba(
            3,
            1,
            vec![255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255],
        )
        .unwrap();
        b.upload_bitmap(tex, &content).unwrap();
        b.draw_quad(Program::Standard2D, tex, &scale(3.0, 1.0), &Y_FLIP, Blend::Opaque)
            .unwrap();
        assert_eq!(b.read_frame().unwrap().rgba(0, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn test_requires_context() {
        let mut b = SoftwareBackend::new();
        assert_eq!(b.clear([0.0; 4]), Err(RenderError::NoContext));
        assert!(b.create_texture(TextureKind::Static2D).is_err());
        assert!(b.create_context(0, 10).is_err());
    }
}

//! The graphics API seam.
//!
//! The renderer only talks to a [`GraphicsBackend`]. The wgpu
//! implementation renders offscreen and reads the result back; the software
//! implementation composites on the CPU with the same matrix and blending
//! rules.

use super::crop::Mat4;
use crate::bitmap::Bitmap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("graphics context error: {0}")]
    Context(String),

    #[error("shader error: {0}")]
    Shader(String),

    #[error("texture upload failed: {0}")]
    Upload(String),

    #[error("presentation failed: {0}")]
    Present(String),

    #[error("no graphics context")]
    NoContext,
}

/// Opaque texture handle handed out by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Written by the video decoder, sampled by [`Program::External`]
    ExternalVideo,
    /// Uploaded from CPU bitmaps, sampled by [`Program::Standard2D`]
    Static2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    External,
    Standard2D,
}

impl Program {
    /// The texture kind this program samples
    pub fn texture_kind(self) -> TextureKind {
        match self {
            Program::External => TextureKind::ExternalVideo,
            Program::Standard2D => TextureKind::Static2D,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    Opaque,
    /// `src * a + dst * (1 - a)`
    StraightAlpha,
}

/// A decoded video frame in BGRA8 byte order
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Texture transform supplied by the decoder for this frame
    pub transform: Mat4,
    /// `setSource` generation that produced the frame
    pub generation: u64,
}

/// A finished frame in ARGB8888 (little-endian BGRA bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub argb: Vec<u8>,
}

impl PresentedFrame {
    /// Pixel at `(x, y)` as RGBA
    pub fn rgba(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.argb[i + 2],
            self.argb[i + 1],
            self.argb[i],
            self.argb[i + 3],
        ]
    }
}

/// The on-screen drawable a context presents into
pub trait Presenter: Send + Sync {
    fn present(&self, frame: PresentedFrame) -> Result<(), RenderError>;
}

/// Surface handle given to `on_context_create`
pub type SurfaceHandle = Arc<dyn Presenter>;

/// Low-level drawing operations. Only ever called from the render thread.
pub trait GraphicsBackend {
    /// Human readable backend name for logs
    fn name(&self) -> &'static str;

    /// Create the device connection and compile both programs
    fn create_context(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    fn destroy_context(&mut self);

    fn has_context(&self) -> bool;

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureId, RenderError>;

    fn delete_texture(&mut self, id: TextureId);

    fn upload_bitmap(&mut self, id: TextureId, bitmap: &Bitmap) -> Result<(), RenderError>;

    fn upload_video_frame(&mut self, id: TextureId, frame: &VideoFrame) -> Result<(), RenderError>;

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    fn clear(&mut self, color: [f32; 4]) -> Result<(), RenderError>;

    fn draw_quad(
        &mut self,
        program: Program,
        texture: TextureId,
        mvp: &Mat4,
        st: &Mat4,
        blend: Blend,
    ) -> Result<(), RenderError>;

    /// Finish the frame and hand back its pixels
    fn read_frame(&mut self) -> Result<PresentedFrame, RenderError>;
}

impl<B: GraphicsBackend + ?Sized> GraphicsBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn create_context(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        (**self).create_context(width, height)
    }

    fn destroy_context(&mut self) {
        (**self).destroy_context()
    }

    fn has_context(&self) -> bool {
        (**self).has_context()
    }

    fn create_texture(&mut self, kind: TextureKind) -> Result<TextureId, RenderError> {
        (**self).create_texture(kind)
    }

    fn delete_texture(&mut self, id: TextureId) {
        (**self).delete_texture(id)
    }

    fn upload_bitmap(&mut self, id: TextureId, bitmap: &Bitmap) -> Result<(), RenderError> {
        (**self).upload_bitmap(id, bitmap)
    }

    fn upload_video_frame(&mut self, id: TextureId, frame: &VideoFrame) -> Result<(), RenderError> {
        (**self).upload_video_frame(id, frame)
    }

    fn set_viewport(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        (**self).set_viewport(width, height)
    }

    fn clear(&mut self, color: [f32; 4]) -> Result<(), RenderError> {
        (**self).clear(color)
    }

    fn draw_quad(
        &mut self,
        program: Program,
        texture: TextureId,
        mvp: &Mat4,
        st: &Mat4,
        blend: Blend,
    ) -> Result<(), RenderError> {
        (**self).draw_quad(program, texture, mvp, st, blend)
    }

    fn read_frame(&mut self) -> Result<PresentedFrame, RenderError> {
        (**self).read_frame()
    }
}

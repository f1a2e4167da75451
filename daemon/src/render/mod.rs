//! Compositing renderer and the render thread that owns it
//!
//! - `backend`: the [`GraphicsBackend`] seam and shared frame types
//! - `crop`: center-crop and texture-flip matrices
//! - `renderer`: texture slots and the per-frame draw order
//! - `software`: CPU backend
//! - `thread`: the dedicated render thread and its message queue

pub mod backend;
pub mod crop;
mod renderer;
mod software;
mod thread;

pub use backend::{
    Blend, GraphicsBackend, PresentedFrame, Presenter, Program, RenderError, SurfaceHandle,
    TextureId, TextureKind, VideoFrame,
};
pub use renderer::{DrawOutcome, NoVideo, Primary, Renderer, VideoFeed};
pub use software::SoftwareBackend;
pub use thread::{ChannelPresenter, RenderHandle, RenderMessage, RenderSnapshot, RenderStats};

#[cfg(test)]
pub(crate) use renderer::tests::RecordingPresenter;

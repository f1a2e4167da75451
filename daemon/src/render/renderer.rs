//! Compositing renderer: owns the graphics context and the three texture
//! slots, and composites video or static content plus the overlay layer.

use super::backend::{
    Blend, GraphicsBackend, Program, RenderError, SurfaceHandle, TextureId, TextureKind,
    VideoFrame,
};
use super::crop::{self, DEFAULT_VIDEO_RATIO, IDENTITY, Mat4, Y_FLIP};
use crate::bitmap::Bitmap;
use std::sync::Arc;

/// Clear color for the "no content" path
pub const NEUTRAL_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// The video source as seen from the render thread
pub trait VideoFeed {
    /// Take the newest unconsumed frame of the current source
    fn take_frame(&mut self) -> Option<VideoFrame>;

    /// The current source has produced at least one frame
    fn is_ready(&self) -> bool;

    /// Native width / height of the current source
    fn aspect_ratio(&self) -> f32;

    /// Detach the decoder from the video texture before it is deleted
    fn release_binding(&mut self);
}

/// What was drawn as the primary layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primary {
    Video,
    Static,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawOutcome {
    pub primary: Primary,
    pub overlay: bool,
}

struct Textures {
    video: TextureId,
    background: TextureId,
    overlay: TextureId,
}

/// Device connection, drawable and per-context texture handles
struct GraphicsContext {
    surface: SurfaceHandle,
    width: u32,
    height: u32,
    textures: Textures,
}

/// A CPU bitmap waiting to be uploaded into a texture slot
#[derive(Default)]
struct Slot {
    bitmap: Option<Arc<Bitmap>>,
    dirty: bool,
    /// The texture holds `bitmap` and can be sampled
    resident: bool,
}

impl Slot {
    fn set(&mut self, bitmap: Option<Arc<Bitmap>>) {
        let same = match (&self.bitmap, &bitmap) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.bitmap = bitmap;
            self.dirty = true;
        }
    }

    fn sync<B: GraphicsBackend>(&mut self, backend: &mut B, texture: TextureId, name: &str) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        self.resident = match &self.bitmap {
            Some(bitmap) => match backend.upload_bitmap(texture, bitmap) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to upload {} bitmap: {}", name, e);
                    false
                }
            },
            None => false,
        };
    }
}

pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    context: Option<GraphicsContext>,
    background: Slot,
    overlay: Slot,
    screen_ratio: f32,
    video_transform: Mat4,
    video_resident: bool,
    frames_drawn: u64,
}

impl<B: GraphicsBackend> Renderer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            context: None,
            background: Slot::default(),
            overlay: Slot::default(),
            screen_ratio: 1.0,
            video_transform: Y_FLIP,
            video_resident: false,
            frames_drawn: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.context.as_ref().map(|ctx| (ctx.width, ctx.height))
    }

    /// Allocate the context, the three textures and both programs.
    ///
    /// Safe to call again after [`Self::on_context_destroy`] or while a
    /// context exists; everything is reallocated, and a live context is torn
    /// down in destroy order first. On failure nothing is retained and
    /// drawing stays disabled until the next call.
    pub fn on_context_create(
        &mut self,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
        video: &mut dyn VideoFeed,
    ) -> Result<(), RenderError> {
        if self.context.is_some() {
            log::warn!("Graphics context already exists, recreating");
            self.on_context_destroy(video);
        }

        log::info!(
            "Creating {} graphics context ({}x{})",
            self.backend.name(),
            width,
            height
        );

        let textures = match self.allocate(width, height) {
            Ok(textures) => textures,
            Err(e) => {
                self.backend.destroy_context();
                return Err(e);
            }
        };

        self.context = Some(GraphicsContext {
            surface,
            width,
            height,
            textures,
        });
        self.screen_ratio = width as f32 / height.max(1) as f32;

        // New textures are empty: re-populate from the CPU copies
        self.background.dirty = true;
        self.overlay.dirty = true;
        self.background.resident = false;
        self.overlay.resident = false;
        self.video_resident = false;

        Ok(())
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<Textures, RenderError> {
        self.backend.create_context(width, height)?;
        Ok(Textures {
            video: self.backend.create_texture(TextureKind::ExternalVideo)?,
            background: self.backend.create_texture(TextureKind::Static2D)?,
            overlay: self.backend.create_texture(TextureKind::Static2D)?,
        })
    }

    /// Release decoder bindings, textures and the context, in that order
    pub fn on_context_destroy(&mut self, video: &mut dyn VideoFeed) {
        if self.context.is_none() {
            return;
        }
        video.release_binding();
        self.drop_context();
        log::info!("Graphics context destroyed");
    }

    fn drop_context(&mut self) {
        if let Some(ctx) = self.context.take() {
            self.backend.delete_texture(ctx.textures.video);
            self.backend.delete_texture(ctx.textures.background);
            self.backend.delete_texture(ctx.textures.overlay);
        }
        self.backend.destroy_context();
        self.background.resident = false;
        self.overlay.resident = false;
        self.video_resident = false;
    }

    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        let ctx = self.context.as_mut().ok_or(RenderError::NoContext)?;
        if width == 0 || height == 0 {
            return Err(RenderError::Context(format!(
                "invalid surface size {}x{}",
                width, height
            )));
        }
        self.backend.set_viewport(width, height)?;
        ctx.width = width;
        ctx.height = height;
        self.screen_ratio = width as f32 / height as f32;
        log::debug!("Viewport resized to {}x{}", width, height);
        Ok(())
    }

    /// Mark the background texture dirty; uploaded on the next draw
    pub fn set_background(&mut self, bitmap: Option<Arc<Bitmap>>) {
        self.background.set(bitmap);
    }

    /// Mark the overlay texture dirty; uploaded on the next draw
    pub fn update_overlay(&mut self, bitmap: Option<Arc<Bitmap>>) {
        self.overlay.set(bitmap);
    }

    /// Composite one frame and present it.
    ///
    /// `present_video` is the lifecycle's decision; the video is only drawn
    /// once its source is ready, the static background is used otherwise.
    pub fn draw(
        &mut self,
        present_video: bool,
        video: &mut dyn VideoFeed,
    ) -> Result<DrawOutcome, RenderError> {
        let ctx = self.context.as_ref().ok_or(RenderError::NoContext)?;
        let (width, height) = (ctx.width, ctx.height);
        let video_tex = ctx.textures.video;
        let background_tex = ctx.textures.background;
        let overlay_tex = ctx.textures.overlay;

        // (a) pull the newest decoder frame
        if let Some(frame) = video.take_frame() {
            match self.backend.upload_video_frame(video_tex, &frame) {
                Ok(()) => {
                    self.video_transform = frame.transform;
                    self.video_resident = true;
                }
                Err(e) => log::warn!("Failed to upload video frame: {}", e),
            }
        }

        self.background
            .sync(&mut self.backend, background_tex, "background");
        self.overlay.sync(&mut self.backend, overlay_tex, "overlay");

        // (b)
        self.backend.clear(NEUTRAL_CLEAR)?;

        // (c) / (d) / (e)
        let primary = if present_video && video.is_ready() && self.video_resident {
            let mvp = crop::center_crop_ratio(video.aspect_ratio(), self.screen_ratio);
            self.backend.draw_quad(
                Program::External,
                video_tex,
                &mvp,
                &self.video_transform,
                Blend::Opaque,
            )?;
            Primary::Video
        } else if let (true, Some(bitmap)) = (self.background.resident, &self.background.bitmap) {
            let mvp = crop::center_crop(bitmap.width(), bitmap.height(), width, height);
            self.backend.draw_quad(
                Program::Standard2D,
                background_tex,
                &mvp,
                &Y_FLIP,
                Blend::Opaque,
            )?;
            Primary::Static
        } else {
            Primary::Neutral
        };

        // (f)
        let overlay = self.overlay.resident;
        if overlay {
            self.backend.draw_quad(
                Program::Standard2D,
                overlay_tex,
                &IDENTITY,
                &Y_FLIP,
                Blend::StraightAlpha,
            )?;
        }

        // (g)
        let frame = self.backend.read_frame()?;
        if let Some(ctx) = self.context.as_ref() {
            ctx.surface.present(frame)?;
        }
        self.frames_drawn += 1;

        Ok(DrawOutcome { primary, overlay })
    }
}

/// A feed with no video
pub struct NoVideo;

impl VideoFeed for NoVideo {
    fn take_frame(&mut self) -> Option<VideoFrame> {
        None
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn aspect_ratio(&self) -> f32 {
        DEFAULT_VIDEO_RATIO
    }

    fn release_binding(&mut self) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::render::backend::{PresentedFrame, Presenter};
    use crate::render::software::SoftwareBackend;
    use std::sync::Mutex;

    /// Presenter that keeps every frame it receives
    #[derive(Default)]
    pub(crate) struct RecordingPresenter {
        pub frames: Mutex<Vec<PresentedFrame>>,
    }

    impl RecordingPresenter {
        pub fn last(&self) -> Option<PresentedFrame> {
            self.frames.lock().unwrap().last().cloned()
        }

        pub fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl Presenter for RecordingPresenter {
        fn present(&self, frame: PresentedFrame) -> Result<(), RenderError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    /// Video feed driven directly by the test
    #[derive(Default)]
    struct ScriptedVideo {
        pending: Option<VideoFrame>,
        ready: bool,
        ratio: Option<f32>,
        released: bool,
        calls: Option<CallLog>,
    }

    impl VideoFeed for ScriptedVideo {
        fn take_frame(&mut self) -> Option<VideoFrame> {
            let frame = self.pending.take();
            if frame.is_some() {
                self.ready = true;
            }
            frame
        }
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn aspect_ratio(&self) -> f32 {
            self.ratio.unwrap_or(DEFAULT_VIDEO_RATIO)
        }
        fn release_binding(&mut self) {
            self.released = true;
            self.ready = false;
            if let Some(calls) = &self.calls {
                calls.lock().unwrap().push("release_binding");
            }
        }
    }

    /// Shared record of calls across a backend and a feed
    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    /// Backend wrapper that can be told to fail context creation
    struct FlakyBackend {
        inner: SoftwareBackend,
        fail_next_context: bool,
        uploads: usize,
        calls: Option<CallLog>,
    }

    impl FlakyBackend {
        fn record(&self, call: &'static str) {
            if let Some(calls) = &self.calls {
                calls.lock().unwrap().push(call);
            }
        }
    }

    impl GraphicsBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn create_context(&mut self, w: u32, h: u32) -> Result<(), RenderError> {
            if std::mem::take(&mut self.fail_next_context) {
                return Err(RenderError::Shader("link failed".to_string()));
            }
            self.record("create_context");
            self.inner.create_context(w, h)
        }
        fn destroy_context(&mut self) {
            self.record("destroy_context");
            self.inner.destroy_context()
        }
        fn has_context(&self) -> bool {
            self.inner.has_context()
        }
        fn create_texture(&mut self, kind: TextureKind) -> Result<TextureId, RenderError> {
            self.inner.create_texture(kind)
        }
        fn delete_texture(&mut self, id: TextureId) {
            self.record("delete_texture");
            self.inner.delete_texture(id)
        }
        fn upload_bitmap(&mut self, id: TextureId, bitmap: &Bitmap) -> Result<(), RenderError> {
            self.uploads += 1;
            self.inner.upload_bitmap(id, bitmap)
        }
        fn upload_video_frame(&mut self, id: TextureId, f: &VideoFrame) -> Result<(), RenderError> {
            self.inner.upload_video_frame(id, f)
        }
        fn set_viewport(&mut self, w: u32, h: u32) -> Result<(), RenderError> {
            self.inner.set_viewport(w, h)
        }
        fn clear(&mut self, color: [f32; 4]) -> Result<(), RenderError> {
            self.inner.clear(color)
        }
        fn draw_quad(
            &mut self,
            program: Program,
            texture: TextureId,
            mvp: &Mat4,
            st: &Mat4,
            blend: Blend,
        ) -> Result<(), RenderError> {
            self.inner.draw_quad(program, texture, mvp, st, blend)
        }
        fn read_frame(&mut self) -> Result<PresentedFrame, RenderError> {
            self.inner.read_frame()
        }
    }

    fn flaky() -> FlakyBackend {
        FlakyBackend {
            inner: SoftwareBackend::new(),
            fail_next_context: false,
            uploads: 0,
            calls: None,
        }
    }

    fn renderer(w: u32, h: u32) -> (Renderer<SoftwareBackend>, Arc<RecordingPresenter>) {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut renderer = Renderer::new(SoftwareBackend::new());
        renderer
            .on_context_create(presenter.clone(), w, h, &mut NoVideo)
            .unwrap();
        (renderer, presenter)
    }

    fn video_frame(rgba: [u8; 4], generation: u64) -> VideoFrame {
        VideoFrame {
            width: 2,
            height: 2,
            data: [rgba[2], rgba[1], rgba[0], rgba[3]].repeat(4),
            transform: Y_FLIP,
            generation,
        }
    }

    #[test]
    fn test_draw_without_context_fails() {
        let mut renderer = Renderer::new(SoftwareBackend::new());
        assert_eq!(
            renderer.draw(false, &mut NoVideo).unwrap_err(),
            RenderError::NoContext
        );
    }

    #[test]
    fn test_neutral_clear_without_content() {
        let (mut renderer, presenter) = renderer(4, 4);
        let outcome = renderer.draw(false, &mut NoVideo).unwrap();
        assert_eq!(outcome.primary, Primary::Neutral);
        assert!(!outcome.overlay);
        assert_eq!(presenter.last().unwrap().rgba(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn test_background_with_blended_overlay() {
        let (mut renderer, presenter) = renderer(4, 4);
        renderer.set_background(Some(Arc::new(Bitmap::solid(8, 8, [0, 0, 200, 255]))));

        // Overlay only covers the top row
        let mut overlay = Bitmap::new(4, 4);
        for x in 0..4 {
            overlay.blend_pixel(x, 0, [255, 255, 255, 255]);
        }
        renderer.update_overlay(Some(Arc::new(overlay)));

        let outcome = renderer.draw(false, &mut NoVideo).unwrap();
        assert_eq!(outcome.primary, Primary::Static);
        assert!(outcome.overlay);

        let frame = presenter.last().unwrap();
        assert_eq!(frame.rgba(1, 0), [255, 255, 255, 255]);
        assert_eq!(frame.rgba(1, 3), [0, 0, 200, 255]);
    }

    #[test]
    fn test_uploads_are_lazy() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut renderer = Renderer::new(flaky());
        renderer
            .on_context_create(presenter, 2, 2, &mut NoVideo)
            .unwrap();

        let first = Arc::new(Bitmap::solid(2, 2, [1, 2, 3, 255]));
        let second = Arc::new(Bitmap::solid(2, 2, [4, 5, 6, 255]));
        renderer.set_background(Some(first));
        renderer.set_background(Some(second.clone()));
        assert_eq!(renderer.backend().uploads, 0);

        renderer.draw(false, &mut NoVideo).unwrap();
        assert_eq!(renderer.backend().uploads, 1);

        // Same bitmap again is not a change
        renderer.set_background(Some(second));
        renderer.draw(false, &mut NoVideo).unwrap();
        assert_eq!(renderer.backend().uploads, 1);
    }

    #[test]
    fn test_video_waits_for_first_frame() {
        let (mut renderer, presenter) = renderer(2, 2);
        renderer.set_background(Some(Arc::new(Bitmap::solid(2, 2, [0, 255, 0, 255]))));
        let mut video = ScriptedVideo::default();

        let outcome = renderer.draw(true, &mut video).unwrap();
        assert_eq!(outcome.primary, Primary::Static);
        assert_eq!(presenter.last().unwrap().rgba(0, 0), [0, 255, 0, 255]);

        video.pending = Some(video_frame([255, 0, 0, 255], 1));
        let outcome = renderer.draw(true, &mut video).unwrap();
        assert_eq!(outcome.primary, Primary::Video);
        assert_eq!(presenter.last().unwrap().rgba(0, 0), [255, 0, 0, 255]);

        // The lifecycle can still pick the static layer while video is ready
        let outcome = renderer.draw(false, &mut video).unwrap();
        assert_eq!(outcome.primary, Primary::Static);
    }

    #[test]
    fn test_video_is_center_cropped() {
        // 2x2 surface, 3x1 video: left/right thirds must be cropped away
        let (mut renderer, presenter) = renderer(2, 2);
        let mut video = ScriptedVideo {
            ratio: Some(3.0),
            ..Default::default()
        };
        let mut data = Vec::new();
        for bgra in [[0, 0, 255, 255], [0, 255, 0, 255], [255, 0, 0, 255]] {
            data.extend_from_slice(&bgra);
        }
        video.pending = Some(VideoFrame {
            width: 3,
            height: 1,
            data,
            transform: Y_FLIP,
            generation: 1,
        });

        renderer.draw(true, &mut video).unwrap();
        let frame = presenter.last().unwrap();
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(frame.rgba(x, y), [0, 255, 0, 255]);
        }
    }

    #[test]
    fn test_context_failure_retains_nothing() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut backend = flaky();
        backend.fail_next_context = true;
        let mut renderer = Renderer::new(backend);

        assert!(
            renderer
                .on_context_create(presenter.clone(), 2, 2, &mut NoVideo)
                .is_err()
        );
        assert!(!renderer.has_context());
        assert!(!renderer.backend().has_context());
        assert!(renderer.draw(false, &mut NoVideo).is_err());

        // Next surface-create recovers
        renderer
            .on_context_create(presenter, 2, 2, &mut NoVideo)
            .unwrap();
        assert!(renderer.draw(false, &mut NoVideo).is_ok());
    }

    #[test]
    fn test_destroy_then_create_matches_fresh_instance() {
        let background = Arc::new(Bitmap::gradient(6, 3, &crate::bitmap::DEFAULT_GRADIENT));
        let overlay = Arc::new(Bitmap::solid(4, 4, [255, 255, 255, 90]));

        let (mut fresh, fresh_presenter) = renderer(4, 4);
        fresh.set_background(Some(background.clone()));
        fresh.update_overlay(Some(overlay.clone()));
        fresh.draw(false, &mut NoVideo).unwrap();

        let (mut reused, reused_presenter) = renderer(4, 4);
        reused.set_background(Some(background));
        reused.update_overlay(Some(overlay));
        reused.draw(false, &mut NoVideo).unwrap();

        let mut video = ScriptedVideo::default();
        reused.on_context_destroy(&mut video);
        assert!(video.released);
        assert!(!reused.has_context());

        reused
            .on_context_create(reused_presenter.clone(), 4, 4, &mut video)
            .unwrap();
        reused.draw(false, &mut video).unwrap();

        assert_eq!(reused_presenter.last(), fresh_presenter.last());
    }

    #[test]
    fn test_recreate_releases_binding_before_textures() {
        let calls = CallLog::default();
        let mut backend = flaky();
        backend.calls = Some(calls.clone());
        let mut renderer = Renderer::new(backend);
        let mut video = ScriptedVideo {
            calls: Some(calls.clone()),
            ..Default::default()
        };
        let presenter = Arc::new(RecordingPresenter::default());

        renderer
            .on_context_create(presenter.clone(), 2, 2, &mut video)
            .unwrap();
        assert!(!video.released);
        calls.lock().unwrap().clear();

        renderer.on_context_create(presenter, 4, 4, &mut video).unwrap();
        assert!(video.released);

        let calls = calls.lock().unwrap();
        let position = |name| calls.iter().position(|c| *c == name).unwrap();
        assert_eq!(calls.first(), Some(&"release_binding"));
        assert!(position("release_binding") < position("delete_texture"));
        assert!(position("delete_texture") < position("create_context"));
        assert_eq!(renderer.surface_size(), Some((4, 4)));
    }

    #[test]
    fn test_resize_updates_viewport() {
        let (mut renderer, presenter) = renderer(4, 4);
        renderer.on_resize(8, 2).unwrap();
        renderer.draw(false, &mut NoVideo).unwrap();
        let frame = presenter.last().unwrap();
        assert_eq!((frame.width, frame.height), (8, 2));
        assert!(renderer.on_resize(0, 2).is_err());
    }

    #[test]
    fn test_upload_failure_falls_back_to_neutral() {
        let (mut renderer, presenter) = renderer(2, 2);
        renderer.set_background(Some(Arc::new(Bitmap::new(0, 0))));
        let outcome = renderer.draw(false, &mut NoVideo).unwrap();
        assert_eq!(outcome.primary, Primary::Neutral);
        assert_eq!(presenter.count(), 1);
    }
}

//! The render thread.
//!
//! All graphics calls happen here. The lifecycle posts [`RenderMessage`]s;
//! between messages the thread polls the video decoder for asynchronous
//! notifications.

use super::backend::{GraphicsBackend, PresentedFrame, Presenter, RenderError, SurfaceHandle};
use super::renderer::{Primary, Renderer};
use crate::bitmap::Bitmap;
use crate::diagnostics::DiagnosticLog;
use crate::video::VideoController;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often decoder notifications are drained while idle
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub enum RenderMessage {
    SurfaceCreated {
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    },
    SurfaceResized {
        width: u32,
        height: u32,
    },
    SurfaceDestroyed,
    SetBackground(Option<Arc<Bitmap>>),
    UpdateOverlay(Option<Arc<Bitmap>>),
    /// Draw one frame; `present_video` is the lifecycle's snapshot decision
    Draw {
        present_video: bool,
    },
    SetVideoSource(Option<PathBuf>),
    StopVideo,
    ResumeVideo,
    ResetVideo,
    Shutdown,
}

impl std::fmt::Debug for RenderMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SurfaceCreated { width, height, .. } => {
                write!(f, "SurfaceCreated({}x{})", width, height)
            }
            Self::SurfaceResized { width, height } => {
                write!(f, "SurfaceResized({}x{})", width, height)
            }
            Self::SurfaceDestroyed => write!(f, "SurfaceDestroyed"),
            Self::SetBackground(b) => write!(f, "SetBackground({:?})", b),
            Self::UpdateOverlay(b) => write!(f, "UpdateOverlay({:?})", b),
            Self::Draw { present_video } => write!(f, "Draw(video: {})", present_video),
            Self::SetVideoSource(p) => write!(f, "SetVideoSource({:?})", p),
            Self::StopVideo => write!(f, "StopVideo"),
            Self::ResumeVideo => write!(f, "ResumeVideo"),
            Self::ResetVideo => write!(f, "ResetVideo"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Counters published by the render thread for status queries
#[derive(Debug, Default)]
pub struct RenderStats {
    frames_drawn: AtomicU64,
    video_ready: AtomicBool,
    has_context: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
    primary: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSnapshot {
    pub frames_drawn: u64,
    pub video_ready: bool,
    pub surface: Option<(u32, u32)>,
    pub last_primary: Option<Primary>,
}

impl RenderStats {
    pub fn snapshot(&self) -> RenderSnapshot {
        let surface = self
            .has_context
            .load(Ordering::Acquire)
            .then(|| {
                (
                    self.width.load(Ordering::Relaxed),
                    self.height.load(Ordering::Relaxed),
                )
            });
        let last_primary = match self.primary.load(Ordering::Relaxed) {
            1 => Some(Primary::Video),
            2 => Some(Primary::Static),
            3 => Some(Primary::Neutral),
            _ => None,
        };
        RenderSnapshot {
            frames_drawn: self.frames_drawn.load(Ordering::Relaxed),
            video_ready: self.video_ready.load(Ordering::Acquire),
            surface,
            last_primary,
        }
    }

    fn publish<B: GraphicsBackend>(&self, renderer: &Renderer<B>, video: &VideoController) {
        use super::renderer::VideoFeed;

        self.frames_drawn
            .store(renderer.frames_drawn(), Ordering::Relaxed);
        self.video_ready.store(video.is_ready(), Ordering::Release);
        match renderer.surface_size() {
            Some((w, h)) => {
                self.width.store(w, Ordering::Relaxed);
                self.height.store(h, Ordering::Relaxed);
                self.has_context.store(true, Ordering::Release);
            }
            None => self.has_context.store(false, Ordering::Release),
        }
    }

    fn record_primary(&self, primary: Primary) {
        let code = match primary {
            Primary::Video => 1,
            Primary::Static => 2,
            Primary::Neutral => 3,
        };
        self.primary.store(code, Ordering::Relaxed);
    }
}

/// Render-thread state: the renderer plus the video controller it samples
pub(crate) struct RenderWorker<B: GraphicsBackend> {
    renderer: Renderer<B>,
    video: VideoController,
    stats: Arc<RenderStats>,
    diagnostics: Arc<DiagnosticLog>,
}

impl<B: GraphicsBackend> RenderWorker<B> {
    pub(crate) fn new(
        backend: B,
        video: VideoController,
        stats: Arc<RenderStats>,
        diagnostics: Arc<DiagnosticLog>,
    ) -> Self {
        Self {
            renderer: Renderer::new(backend),
            video,
            stats,
            diagnostics,
        }
    }

    /// Process one message; `false` means shut down
    pub(crate) fn handle(&mut self, message: RenderMessage) -> bool {
        log::trace!("Render message: {:?}", message);

        match message {
            RenderMessage::SurfaceCreated {
                surface,
                width,
                height,
            } => match self
                .renderer
                .on_context_create(surface, width, height, &mut self.video)
            {
                Ok(()) => self.video.on_context_created(),
                Err(e) => self
                    .diagnostics
                    .record("render", format!("Context creation failed: {}", e)),
            },
            RenderMessage::SurfaceResized { width, height } => {
                crate::log_and_continue!(self.renderer.on_resize(width, height), "resize viewport");
            }
            RenderMessage::SurfaceDestroyed => self.renderer.on_context_destroy(&mut self.video),
            RenderMessage::SetBackground(bitmap) => self.renderer.set_background(bitmap),
            RenderMessage::UpdateOverlay(bitmap) => self.renderer.update_overlay(bitmap),
            RenderMessage::Draw { present_video } => self.draw(present_video),
            RenderMessage::SetVideoSource(path) => {
                // Failures are already in the diagnostic log
                if let Err(e) = self.video.set_source(path) {
                    log::debug!("Video source not armed: {}", e);
                }
            }
            RenderMessage::StopVideo => self.video.stop(),
            RenderMessage::ResumeVideo => self.video.resume(),
            RenderMessage::ResetVideo => self.video.reset(),
            RenderMessage::Shutdown => {
                self.renderer.on_context_destroy(&mut self.video);
                self.stats.publish(&self.renderer, &self.video);
                return false;
            }
        }

        self.stats.publish(&self.renderer, &self.video);
        true
    }

    fn draw(&mut self, present_video: bool) {
        if !self.renderer.has_context() {
            log::debug!("Draw requested without a graphics context");
            return;
        }

        #[cfg(feature = "profiling")]
        let start = std::time::Instant::now();

        match self.renderer.draw(present_video, &mut self.video) {
            Ok(outcome) => {
                self.stats.record_primary(outcome.primary);

                #[cfg(feature = "profiling")]
                if self.renderer.frames_drawn().is_multiple_of(60) {
                    log::info!(
                        "[PROFILE] draw #{}: {:?} in {:.2}ms",
                        self.renderer.frames_drawn(),
                        outcome.primary,
                        start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => log::error!("Failed to draw frame: {}", e),
        }
    }

    /// Drain decoder notifications
    pub(crate) fn poll(&mut self) {
        let was_ready = self.stats.snapshot().video_ready;
        self.video.poll();
        if was_ready != crate::render::VideoFeed::is_ready(&self.video) {
            self.stats.publish(&self.renderer, &self.video);
        }
    }

    pub(crate) fn run(mut self, receiver: Receiver<RenderMessage>) {
        log::info!("Render thread started ({})", self.renderer.backend().name());

        loop {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(message) => {
                    if !self.handle(message) {
                        break;
                    }
                    // Coalesce a backlog before polling again
                    while let Ok(message) = receiver.try_recv() {
                        if !self.handle(message) {
                            log::info!("Render thread stopped");
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Render queue closed");
                    self.renderer.on_context_destroy(&mut self.video);
                    break;
                }
            }
            self.poll();
        }

        log::info!("Render thread stopped");
    }
}

/// Sending half of the render thread plus its published stats
pub struct RenderHandle {
    sender: Sender<RenderMessage>,
    stats: Arc<RenderStats>,
    thread: Option<JoinHandle<()>>,
}

impl RenderHandle {
    pub fn spawn<B>(
        backend: B,
        video: VideoController,
        diagnostics: Arc<DiagnosticLog>,
    ) -> Result<Self>
    where
        B: GraphicsBackend + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let stats = Arc::new(RenderStats::default());
        let worker = RenderWorker::new(backend, video, Arc::clone(&stats), diagnostics);

        let thread = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || worker.run(receiver))
            .context("Failed to spawn render thread")?;

        Ok(Self {
            sender,
            stats,
            thread: Some(thread),
        })
    }

    pub fn send(&self, message: RenderMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| anyhow::anyhow!("render thread is not running"))
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    /// Send `Shutdown` and wait for the thread to exit
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(RenderMessage::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Render thread panicked");
        }
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Presents by posting frames to the Wayland thread.
///
/// Uses a small bounded queue; when the display side falls behind the
/// newest frames are dropped rather than blocking the render thread.
pub struct ChannelPresenter {
    sender: Sender<PresentedFrame>,
}

impl ChannelPresenter {
    pub fn new(sender: Sender<PresentedFrame>) -> Self {
        Self { sender }
    }
}

impl Presenter for ChannelPresenter {
    fn present(&self, frame: PresentedFrame) -> Result<(), RenderError> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::trace!("Presentation queue full, frame dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(RenderError::Present("display thread is gone".to_string()))
            }
        }
    }
}

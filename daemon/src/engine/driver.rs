//! Runs the lifecycle on the tokio runtime.
//!
//! Events arrive from IPC and the Wayland thread through an [`EngineHandle`].
//! Effects are executed here: render messages go to the render thread,
//! timers become deadlines in the select loop, and slow work (image
//! decoding, overlay rasterization, config reads) runs on the blocking pool
//! and comes back as another event.

use super::fetch::{VideoResolver, load_static_images, resolve_media};
use super::lifecycle::{Effect, Lifecycle, LifecycleEvent};
use crate::config::Config;
use crate::diagnostics::DiagnosticLog;
use crate::overlay::{Fonts, OverlayBuilder};
use crate::render::RenderHandle;
use anyhow::Result;
use chrono::Local;
use common::{EngineError, EngineStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub enum EngineInput {
    Event(LifecycleEvent),
    Query(oneshot::Sender<EngineStatus>),
    /// Rasterizer rebuilt for a new font family
    Overlay {
        builder: Arc<OverlayBuilder>,
        family: Option<String>,
    },
}

/// Cloneable entry point into the engine
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::UnboundedSender<EngineInput>,
}

impl EngineHandle {
    pub fn send(&self, event: LifecycleEvent) -> Result<(), EngineError> {
        self.sender
            .send(EngineInput::Event(event))
            .map_err(|_| EngineError::Unavailable("engine stopped".to_string()))
    }

    pub async fn query(&self) -> Result<EngineStatus, EngineError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(EngineInput::Query(reply))
            .map_err(|_| EngineError::Unavailable("engine stopped".to_string()))?;
        response
            .await
            .map_err(|_| EngineError::Unavailable("engine stopped".to_string()))
    }
}

/// Overlay rasterizer for `family`, without text if no font can be loaded
pub fn overlay_builder(family: Option<&str>) -> OverlayBuilder {
    match Fonts::load(family) {
        Ok(fonts) => OverlayBuilder::new(Some(fonts)),
        Err(e) => {
            log::warn!("Overlay text disabled: {:#}", e);
            OverlayBuilder::new(None)
        }
    }
}

enum Wake {
    Input(Option<EngineInput>),
    Draw,
    Reset,
}

pub struct Driver {
    lifecycle: Lifecycle,
    render: RenderHandle,
    overlay: Arc<OverlayBuilder>,
    font_family: Option<String>,
    resolver: Arc<dyn VideoResolver>,
    diagnostics: Arc<DiagnosticLog>,
    config_path: PathBuf,
    sender: mpsc::UnboundedSender<EngineInput>,
    receiver: mpsc::UnboundedReceiver<EngineInput>,
    draw_at: Option<Instant>,
    reset_at: Option<Instant>,
    started: Instant,
}

impl Driver {
    pub fn new(
        config: Config,
        config_path: PathBuf,
        render: RenderHandle,
        resolver: Arc<dyn VideoResolver>,
        diagnostics: Arc<DiagnosticLog>,
    ) -> (Self, EngineHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let font_family = config.overlay.font_family.clone();
        let overlay = Arc::new(overlay_builder(font_family.as_deref()));
        let handle = EngineHandle {
            sender: sender.clone(),
        };

        let driver = Self {
            lifecycle: Lifecycle::new(config, Arc::clone(&diagnostics)),
            render,
            overlay,
            font_family,
            resolver,
            diagnostics,
            config_path,
            sender,
            receiver,
            draw_at: None,
            reset_at: None,
            started: Instant::now(),
        };
        (driver, handle)
    }

    /// Use a prepared rasterizer instead of loading system fonts
    pub fn with_overlay(mut self, builder: OverlayBuilder) -> Self {
        self.overlay = Arc::new(builder);
        self
    }

    pub async fn run(mut self) -> Result<()> {
        log::info!("Engine started");

        loop {
            let (draw_at, reset_at) = (self.draw_at, self.reset_at);
            let wake = tokio::select! {
                input = self.receiver.recv() => Wake::Input(input),
                _ = sleep_until(draw_at) => Wake::Draw,
                _ = sleep_until(reset_at) => Wake::Reset,
            };

            let event = match wake {
                Wake::Input(Some(EngineInput::Event(event))) => event,
                Wake::Input(Some(EngineInput::Query(reply))) => {
                    let status = self
                        .lifecycle
                        .status(self.render.stats().snapshot(), self.started.elapsed());
                    let _ = reply.send(status);
                    continue;
                }
                Wake::Input(Some(EngineInput::Overlay { builder, family })) => {
                    log::info!("Overlay font family: {}", family.as_deref().unwrap_or("default"));
                    self.overlay = builder;
                    self.font_family = family;
                    continue;
                }
                Wake::Input(None) => LifecycleEvent::Shutdown,
                Wake::Draw => {
                    self.draw_at = None;
                    LifecycleEvent::Tick
                }
                Wake::Reset => {
                    self.reset_at = None;
                    LifecycleEvent::HiddenTimeout
                }
            };

            let effects = self.lifecycle.handle(event, Local::now());
            if !self.apply(effects) {
                break;
            }
        }

        log::info!("Engine stopped");
        Ok(())
    }

    /// Execute effects in order. Returns false once the engine should exit.
    fn apply(&mut self, effects: Vec<Effect>) -> bool {
        for effect in effects {
            log::trace!("Effect: {:?}", effect);
            match effect {
                Effect::Render(message) => {
                    if let Err(e) = self.render.send(message) {
                        log::error!("{:#}", e);
                    }
                }
                Effect::ScheduleDraw(delay) => self.draw_at = Some(Instant::now() + delay),
                Effect::CancelDraw => self.draw_at = None,
                Effect::ScheduleReset(delay) => self.reset_at = Some(Instant::now() + delay),
                Effect::CancelReset => self.reset_at = None,
                Effect::ResolveMedia { token, media, size } => {
                    let resolver = Arc::clone(&self.resolver);
                    self.spawn_job(move || {
                        let media = resolve_media(&media, resolver.as_ref(), size);
                        vec![EngineInput::Event(LifecycleEvent::MediaResolved {
                            token,
                            media,
                        })]
                    });
                }
                Effect::LoadImages {
                    size,
                    wallpaper,
                    subject,
                    gradient,
                } => {
                    self.spawn_job(move || {
                        let images = load_static_images(
                            size,
                            wallpaper.as_deref(),
                            subject.as_deref(),
                            &gradient,
                        );
                        vec![EngineInput::Event(LifecycleEvent::ImagesLoaded {
                            size,
                            images,
                        })]
                    });
                }
                Effect::BuildOverlay { token, request } => {
                    let builder = Arc::clone(&self.overlay);
                    self.spawn_job(move || {
                        let bitmap = Arc::new(builder.build(&request));
                        vec![EngineInput::Event(LifecycleEvent::OverlayBuilt {
                            token,
                            bitmap,
                        })]
                    });
                }
                Effect::ReloadConfig => self.reload_config(),
                Effect::Exit => return false,
            }
        }
        true
    }

    fn reload_config(&self) {
        let path = self.config_path.clone();
        let family = self.font_family.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        self.spawn_job(move || match Config::load_from_path(&path) {
            Ok(config) => {
                let mut inputs = Vec::new();
                if config.overlay.font_family != family {
                    let family = config.overlay.font_family.clone();
                    let builder = Arc::new(overlay_builder(family.as_deref()));
                    inputs.push(EngineInput::Overlay { builder, family });
                }
                inputs.push(EngineInput::Event(LifecycleEvent::ConfigReloaded(
                    Box::new(config),
                )));
                inputs
            }
            Err(e) => {
                diagnostics.record("config", format!("Reload failed: {:#}", e));
                Vec::new()
            }
        });
    }

    fn spawn_job<F>(&self, job: F)
    where
        F: FnOnce() -> Vec<EngineInput> + Send + 'static,
    {
        let sender = self.sender.clone();
        tokio::task::spawn_blocking(move || {
            for input in job() {
                // Only fails once the driver is gone
                let _ = sender.send(input);
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fetch::LocalFileResolver;
    use crate::render::{RecordingPresenter, SoftwareBackend};
    use crate::video::{UnavailableDecoderFactory, VideoController};
    use std::time::Duration;

    struct Harness {
        handle: EngineHandle,
        presenter: Arc<RecordingPresenter>,
        task: tokio::task::JoinHandle<Result<()>>,
        config_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn start() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let diagnostics = Arc::new(DiagnosticLog::new());
        let video = VideoController::new(Box::new(UnavailableDecoderFactory), diagnostics.clone());
        let render = RenderHandle::spawn(SoftwareBackend::new(), video, diagnostics.clone()).unwrap();

        let (driver, handle) = Driver::new(
            Config::default(),
            config_path.clone(),
            render,
            Arc::new(LocalFileResolver),
            diagnostics,
        );
        let driver = driver.with_overlay(OverlayBuilder::new(None));
        let task = tokio::spawn(driver.run());

        Harness {
            handle,
            presenter: Arc::new(RecordingPresenter::default()),
            task,
            config_path,
            _dir: dir,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    impl Harness {
        fn create_surface(&self, width: u32, height: u32) {
            self.handle
                .send(LifecycleEvent::SurfaceCreated {
                    surface: self.presenter.clone(),
                    width,
                    height,
                })
                .unwrap();
        }

        async fn stop(self) {
            self.handle.send(LifecycleEvent::Shutdown).unwrap();
            self.task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_locked_screen_redraws_continuously() {
        let harness = start();
        harness.create_surface(64, 32);
        harness.handle.send(LifecycleEvent::SetLocked(true)).unwrap();

        let presenter = harness.presenter.clone();
        wait_until(|| presenter.count() >= 5).await;

        let status = harness.handle.query().await.unwrap();
        assert!(status.locked);
        assert_eq!(status.surface, Some((64, 32)));
        assert_eq!(status.cadence, "every 33ms");

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_hidden_surface_stops_drawing() {
        let harness = start();
        harness.create_surface(32, 32);
        harness.handle.send(LifecycleEvent::SetLocked(true)).unwrap();
        let presenter = harness.presenter.clone();
        wait_until(|| presenter.count() >= 2).await;

        harness.handle.send(LifecycleEvent::SetVisible(false)).unwrap();
        let status = harness.handle.query().await.unwrap();
        assert!(!status.visible);
        assert_eq!(status.cadence, "stopped");

        // Let draws already queued on the render thread drain
        tokio::time::sleep(Duration::from_millis(100)).await;
        let frozen = presenter.count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(presenter.count(), frozen);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_failed_reload_is_recorded() {
        let harness = start();
        std::fs::write(&harness.config_path, "[engine\nbroken").unwrap();
        harness.handle.send(LifecycleEvent::Reload).unwrap();

        let mut recorded = false;
        for _ in 0..200 {
            let status = harness.handle.query().await.unwrap();
            if status.diagnostics.iter().any(|l| l.contains("[config]")) {
                recorded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(recorded);

        harness.stop().await;
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_engine() {
        let harness = start();
        let handle = harness.handle.clone();
        harness.stop().await;

        assert!(matches!(
            handle.send(LifecycleEvent::Tick),
            Err(EngineError::Unavailable(_))
        ));
    }
}

//! The engine lifecycle.
//!
//! A synchronous state machine: every [`LifecycleEvent`] mutates
//! [`EngineState`] and yields the [`Effect`]s that the driver executes
//! (render-thread messages, timers, background jobs). Nothing here blocks or
//! touches graphics objects.

use super::burn_in::BurnIn;
use super::fetch::ResolvedMedia;
use super::policy::{Cadence, ContentSource, DrawPolicy, OverlayMode, Timing, derive_policy};
use super::state::{EngineState, StaticImages};
use crate::bitmap::Bitmap;
use crate::config::Config;
use crate::diagnostics::DiagnosticLog;
use crate::overlay::{
    OverlayContent, OverlayRequest, OverlayStyle, format_time, text_color_for_luminance,
};
use crate::render::{RenderMessage, RenderSnapshot, SurfaceHandle};
use chrono::{DateTime, Local};
use common::{ContentKind, EngineStatus, MediaInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Debug lines shown in the overlay
const DEBUG_OVERLAY_LINES: usize = 20;
/// Diagnostic lines returned in a status reply
const STATUS_DIAGNOSTIC_LINES: usize = 10;

pub enum LifecycleEvent {
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
    SetVisible(bool),
    SetLocked(bool),
    SetAmbient(bool),
    SetPowerSave(bool),
    MediaChanged(Option<MediaInfo>),
    MediaResolved {
        token: u64,
        media: ResolvedMedia,
    },
    SetWallpaper(Option<PathBuf>),
    SetSubject(Option<PathBuf>),
    ImagesLoaded {
        size: (u32, u32),
        images: StaticImages,
    },
    OverlayBuilt {
        token: u64,
        bitmap: Arc<Bitmap>,
    },
    Reload,
    ConfigReloaded(Box<Config>),
    /// The scheduled draw deadline elapsed
    Tick,
    /// Invisible for `hidden_reset_secs`
    HiddenTimeout,
    Shutdown,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::SurfaceCreated { .. } => "surface-created",
            Self::SurfaceResized { .. } => "surface-resized",
            Self::SurfaceDestroyed => "surface-destroyed",
            Self::SetVisible(_) => "visible",
            Self::SetLocked(_) => "locked",
            Self::SetAmbient(_) => "ambient",
            Self::SetPowerSave(_) => "power-save",
            Self::MediaChanged(_) => "media-changed",
            Self::MediaResolved { .. } => "media-resolved",
            Self::SetWallpaper(_) => "wallpaper",
            Self::SetSubject(_) => "subject",
            Self::ImagesLoaded { .. } => "images-loaded",
            Self::OverlayBuilt { .. } => "overlay-built",
            Self::Reload => "reload",
            Self::ConfigReloaded(_) => "config-reloaded",
            Self::Tick => "tick",
            Self::HiddenTimeout => "hidden-timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub enum Effect {
    Render(RenderMessage),
    /// Replace any pending draw timer
    ScheduleDraw(Duration),
    CancelDraw,
    ScheduleReset(Duration),
    CancelReset,
    ResolveMedia {
        token: u64,
        media: MediaInfo,
        size: Option<(u32, u32)>,
    },
    LoadImages {
        size: (u32, u32),
        wallpaper: Option<PathBuf>,
        subject: Option<PathBuf>,
        gradient: Vec<[u8; 3]>,
    },
    BuildOverlay {
        token: u64,
        request: OverlayRequest,
    },
    ReloadConfig,
    Exit,
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Render(msg) => write!(f, "Render({:?})", msg),
            Self::ScheduleDraw(d) => write!(f, "ScheduleDraw({:?})", d),
            Self::CancelDraw => write!(f, "CancelDraw"),
            Self::ScheduleReset(d) => write!(f, "ScheduleReset({:?})", d),
            Self::CancelReset => write!(f, "CancelReset"),
            Self::ResolveMedia { token, .. } => write!(f, "ResolveMedia(#{})", token),
            Self::LoadImages { size, .. } => write!(f, "LoadImages({:?})", size),
            Self::BuildOverlay { token, .. } => write!(f, "BuildOverlay(#{})", token),
            Self::ReloadConfig => write!(f, "ReloadConfig"),
            Self::Exit => write!(f, "Exit"),
        }
    }
}

/// What the render thread was last told about the video
#[derive(Debug, Default)]
struct VideoCommands {
    source: Option<PathBuf>,
    /// `StopVideo` sent and not yet followed by `ResumeVideo`
    stopped: bool,
    /// `ResetVideo` sent; the source must be re-armed
    reset: bool,
}

pub struct Lifecycle {
    state: EngineState,
    config: Config,
    burn_in: BurnIn,
    diagnostics: Arc<DiagnosticLog>,
    media_token: u64,
    overlay_token: u64,
    /// Request for the overlay currently built or being built
    overlay_request: Option<OverlayRequest>,
    text_color: [u8; 3],
    video: VideoCommands,
    debug_lines: (u64, Vec<String>),
    wallpaper: Option<PathBuf>,
    subject: Option<PathBuf>,
    /// Last derived policy, for status replies
    policy: Option<DrawPolicy>,
    draws: u64,
}

impl Lifecycle {
    pub fn new(config: Config, diagnostics: Arc<DiagnosticLog>) -> Self {
        let burn_in = BurnIn::new(config.overlay.burn_in_max_offset);
        Self {
            state: EngineState::new(config.settings()),
            wallpaper: config.wallpaper_path(),
            subject: config.subject_path(),
            config,
            burn_in,
            diagnostics,
            media_token: 0,
            overlay_token: 0,
            overlay_request: None,
            text_color: [255, 255, 255],
            video: VideoCommands::default(),
            debug_lines: (u64::MAX, Vec::new()),
            policy: None,
            draws: 0,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Draw requests issued so far
    pub fn draws(&self) -> u64 {
        self.draws
    }

    fn timing(&self) -> Timing {
        Timing {
            frame_interval: self.config.frame_interval(),
            power_save_interval: self.config.power_save_interval(),
        }
    }

    pub fn handle(&mut self, event: LifecycleEvent, now: DateTime<Local>) -> Vec<Effect> {
        log::debug!("Lifecycle event: {}", event.name());
        let mut effects = Vec::new();

        match event {
            LifecycleEvent::SurfaceCreated {
                surface,
                width,
                height,
            } => {
                self.state.surface = Some((width, height));
                self.overlay_request = None;
                effects.push(Effect::Render(RenderMessage::SurfaceCreated {
                    surface,
                    width,
                    height,
                }));
                self.push_load_images(&mut effects);
            }
            LifecycleEvent::SurfaceResized { width, height } => {
                if self.state.surface == Some((width, height)) {
                    return effects;
                }
                self.state.surface = Some((width, height));
                effects.push(Effect::Render(RenderMessage::SurfaceResized { width, height }));
                self.push_load_images(&mut effects);
            }
            LifecycleEvent::SurfaceDestroyed => {
                self.state.surface = None;
                self.overlay_request = None;
                effects.push(Effect::CancelDraw);
                effects.push(Effect::Render(RenderMessage::SurfaceDestroyed));
                return effects;
            }
            LifecycleEvent::SetVisible(visible) => {
                if visible == self.state.visible {
                    return effects;
                }
                self.state.visible = visible;
                if visible {
                    effects.push(Effect::CancelReset);
                    effects.push(Effect::ReloadConfig);
                } else {
                    effects.push(Effect::ScheduleReset(self.config.hidden_reset()));
                }
            }
            LifecycleEvent::SetLocked(locked) => {
                if locked == self.state.locked {
                    return effects;
                }
                self.state.locked = locked;
            }
            LifecycleEvent::SetAmbient(ambient) => {
                if ambient == self.state.ambient {
                    return effects;
                }
                self.state.ambient = ambient;
                if !ambient {
                    self.burn_in.reset();
                }
            }
            LifecycleEvent::SetPowerSave(power_save) => {
                if power_save == self.state.power_save {
                    return effects;
                }
                self.state.power_save = power_save;
            }
            LifecycleEvent::MediaChanged(media) => {
                if !self.on_media_changed(media, &mut effects) {
                    return effects;
                }
            }
            LifecycleEvent::MediaResolved { token, media } => {
                if token != self.media_token {
                    log::debug!("Dropping stale media resolution #{}", token);
                    return effects;
                }
                self.state.media_art = media.art;
                self.state.video_file = media.video;
                self.update_text_color();
            }
            LifecycleEvent::SetWallpaper(path) => {
                self.wallpaper = path;
                self.push_load_images(&mut effects);
            }
            LifecycleEvent::SetSubject(path) => {
                self.subject = path;
                self.push_load_images(&mut effects);
            }
            LifecycleEvent::ImagesLoaded { size, images } => {
                if self.state.surface != Some(size) {
                    log::debug!("Dropping images prepared for stale size {:?}", size);
                    return effects;
                }
                self.state.images = Some(images);
                self.update_text_color();
            }
            LifecycleEvent::OverlayBuilt { token, bitmap } => {
                if token != self.overlay_token {
                    log::debug!("Dropping stale overlay #{}", token);
                    return effects;
                }
                self.state.overlay_bitmap = Some(Arc::clone(&bitmap));
                effects.push(Effect::Render(RenderMessage::UpdateOverlay(Some(bitmap))));
            }
            LifecycleEvent::Reload => {
                effects.push(Effect::ReloadConfig);
                return effects;
            }
            LifecycleEvent::ConfigReloaded(config) => self.apply_config(*config, &mut effects),
            LifecycleEvent::Tick => {}
            LifecycleEvent::HiddenTimeout => {
                if self.state.visible {
                    return effects;
                }
                log::info!("Hidden for {:?}, releasing video", self.config.hidden_reset());
                effects.push(Effect::Render(RenderMessage::ResetVideo));
                self.video.source = None;
                self.video.reset = true;
                return effects;
            }
            LifecycleEvent::Shutdown => {
                effects.push(Effect::CancelDraw);
                effects.push(Effect::CancelReset);
                effects.push(Effect::Render(RenderMessage::Shutdown));
                effects.push(Effect::Exit);
                return effects;
            }
        }

        self.refresh(now, &mut effects);
        effects
    }

    /// Returns whether the media identity or its art/video files changed
    fn on_media_changed(&mut self, media: Option<MediaInfo>, effects: &mut Vec<Effect>) -> bool {
        let (same_identity, same_files) = match (&self.state.media, &media) {
            (Some(current), Some(next)) => (
                current.identity() == next.identity(),
                current.art_path == next.art_path && current.video_path == next.video_path,
            ),
            (None, None) => (true, true),
            _ => (false, false),
        };
        if same_identity && same_files {
            // Album and other metadata only
            self.state.media = media;
            return false;
        }

        // Invalidates any in-flight resolution for the previous media
        self.media_token += 1;
        self.state.media_art = None;
        self.state.video_file = None;
        self.update_text_color();

        if let Some(media) = &media {
            let message = if same_identity {
                format!("Media files updated: {} - {}", media.artist, media.title)
            } else {
                format!("Now playing: {} - {}", media.artist, media.title)
            };
            self.diagnostics.record("media", message);
            if media.art_path.is_some() || media.video_path.is_some() {
                effects.push(Effect::ResolveMedia {
                    token: self.media_token,
                    media: media.clone(),
                    size: self.state.surface,
                });
            }
        }
        self.state.media = media;
        true
    }

    fn apply_config(&mut self, config: Config, effects: &mut Vec<Effect>) {
        let images_changed = config.wallpaper != self.config.wallpaper;
        self.state.settings = config.settings();
        self.burn_in.set_max_offset(config.overlay.burn_in_max_offset);
        if images_changed {
            self.wallpaper = config.wallpaper_path();
            self.subject = config.subject_path();
        }
        self.config = config;
        if images_changed {
            self.push_load_images(effects);
        }
    }

    fn push_load_images(&self, effects: &mut Vec<Effect>) {
        if let Some(size) = self.state.surface {
            effects.push(Effect::LoadImages {
                size,
                wallpaper: self.wallpaper.clone(),
                subject: self.subject.clone(),
                gradient: self.config.gradient_stops(),
            });
        }
    }

    fn update_text_color(&mut self) {
        let luminance = self.state.lock_image().map_or(0.0, |image| image.luminance);
        self.text_color = text_color_for_luminance(luminance);
    }

    /// Bring video, textures and timers in line with the current state and
    /// request one draw
    fn refresh(&mut self, now: DateTime<Local>, effects: &mut Vec<Effect>) {
        let policy = derive_policy(&self.state, &self.timing());
        self.policy = Some(policy);

        self.sync_video(&policy, effects);

        if !self.state.visible || self.state.surface.is_none() {
            effects.push(Effect::CancelDraw);
            return;
        }

        if policy.overlay == OverlayMode::Dimmed {
            self.burn_in.on_draw(&now);
        }

        self.sync_background(&policy, effects);
        self.sync_overlay(&policy, &now, effects);

        effects.push(Effect::Render(RenderMessage::Draw {
            present_video: policy.content == ContentSource::Video,
        }));
        self.draws += 1;

        match policy.cadence.delay(&now) {
            Some(delay) => effects.push(Effect::ScheduleDraw(delay)),
            None => effects.push(Effect::CancelDraw),
        }
    }

    fn sync_video(&mut self, policy: &DrawPolicy, effects: &mut Vec<Effect>) {
        // Stop before arming so a new source never starts while disallowed
        if !policy.play_video && !self.video.stopped {
            effects.push(Effect::Render(RenderMessage::StopVideo));
            self.video.stopped = true;
        }

        let desired = self.state.desired_video().cloned();
        // Released while hidden stays released until visible again
        let held = self.video.reset && !self.state.visible;
        if !held && (self.video.reset || desired != self.video.source) {
            effects.push(Effect::Render(RenderMessage::SetVideoSource(desired.clone())));
            self.video.source = desired;
            self.video.reset = false;
        }

        if policy.play_video && self.video.stopped {
            effects.push(Effect::Render(RenderMessage::ResumeVideo));
            self.video.stopped = false;
        }
    }

    fn sync_background(&mut self, policy: &DrawPolicy, effects: &mut Vec<Effect>) {
        let image = match policy.content {
            ContentSource::Video | ContentSource::Static => self.state.lock_image(),
            ContentSource::Home => self.state.home_image(),
            ContentSource::Blank => None,
        };
        let bitmap = image.map(|image| Arc::clone(&image.bitmap));

        let same = match (&self.state.background_bitmap, &bitmap) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            self.state.background_bitmap = bitmap.clone();
            effects.push(Effect::Render(RenderMessage::SetBackground(bitmap)));
        }
    }

    fn sync_overlay(&mut self, policy: &DrawPolicy, now: &DateTime<Local>, effects: &mut Vec<Effect>) {
        let Some((width, height)) = self.state.surface else {
            return;
        };

        if policy.overlay == OverlayMode::Hidden {
            let had_request = self.overlay_request.take().is_some();
            if self.state.overlay_bitmap.take().is_some() || had_request {
                // Invalidate a build still in flight
                self.overlay_token += 1;
                effects.push(Effect::Render(RenderMessage::UpdateOverlay(None)));
            }
            return;
        }

        let request = OverlayRequest {
            width,
            height,
            content: self.overlay_content(policy, now),
            style: self.overlay_style(policy),
        };
        if self.overlay_request.as_ref() == Some(&request) {
            return;
        }

        self.overlay_token += 1;
        self.overlay_request = Some(request.clone());
        effects.push(Effect::BuildOverlay {
            token: self.overlay_token,
            request,
        });
    }

    fn overlay_content(&mut self, policy: &DrawPolicy, now: &DateTime<Local>) -> OverlayContent {
        let overlay = &self.config.overlay;
        let dimmed = policy.overlay == OverlayMode::Dimmed;
        let time = if dimmed {
            format_time(now, &overlay.ambient_time_format, "%H:%M")
        } else {
            format_time(now, &overlay.time_format, "%H:%M:%S")
        };
        let date = format_time(now, &overlay.date_format, "%A, %B %-d");

        let (title, artist) = match (&self.state.media, dimmed) {
            (Some(media), false) => (media.title.clone(), media.artist.clone()),
            _ => (String::new(), String::new()),
        };

        let debug_lines = if self.state.settings.show_debug_overlay && !dimmed {
            let revision = self.diagnostics.revision();
            if self.debug_lines.0 != revision {
                self.debug_lines = (revision, self.diagnostics.tail(DEBUG_OVERLAY_LINES));
            }
            self.debug_lines.1.clone()
        } else {
            Vec::new()
        };

        OverlayContent {
            time,
            date,
            title,
            artist,
            debug_lines,
        }
    }

    fn overlay_style(&self, policy: &DrawPolicy) -> OverlayStyle {
        let dimmed = policy.overlay == OverlayMode::Dimmed;
        OverlayStyle {
            ambient: dimmed,
            text_color: self.text_color,
            offset: if dimmed {
                self.burn_in.offset()
            } else {
                (0.0, 0.0)
            },
        }
    }

    fn content_kind(&self, render: &RenderSnapshot) -> ContentKind {
        let Some(policy) = self.policy else {
            return ContentKind::Blank;
        };
        if policy.content == ContentSource::Video && render.video_ready {
            return ContentKind::Video;
        }
        let image = match policy.content {
            ContentSource::Blank => return ContentKind::Blank,
            ContentSource::Home => self.state.home_image(),
            ContentSource::Video | ContentSource::Static => self.state.lock_image(),
        };
        match (image, &self.state.media_art, &self.state.images) {
            (None, _, _) => ContentKind::Blank,
            (Some(image), Some(art), _) if Arc::ptr_eq(&image.bitmap, &art.bitmap) => {
                ContentKind::MediaArt
            }
            (Some(image), _, Some(images)) if Arc::ptr_eq(&image.bitmap, &images.gradient.bitmap) => {
                ContentKind::Gradient
            }
            _ => ContentKind::Wallpaper,
        }
    }

    pub fn status(&self, render: RenderSnapshot, uptime: Duration) -> EngineStatus {
        let cadence = self
            .policy
            .map(|policy| policy.cadence)
            .unwrap_or(Cadence::Stopped);

        EngineStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime.as_secs(),
            visible: self.state.visible,
            locked: self.state.locked,
            ambient: self.state.ambient,
            power_save: self.state.power_save,
            media: self
                .state
                .media_id()
                .map(|(title, artist)| (title.to_string(), artist.to_string())),
            video_file: self
                .state
                .video_file
                .as_ref()
                .map(|p| p.display().to_string()),
            video_ready: render.video_ready,
            content: self.content_kind(&render),
            cadence: cadence.to_string(),
            surface: render.surface.or(self.state.surface),
            diagnostics: self.diagnostics.tail(STATUS_DIAGNOSTIC_LINES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::StaticImage;
    use crate::render::RecordingPresenter;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, 21, 15, 30).unwrap()
    }

    fn lifecycle() -> Lifecycle {
        Lifecycle::new(Config::default(), Arc::new(DiagnosticLog::new()))
    }

    /// Visible, locked, with a 1920x1080 surface and images loaded
    fn locked_with_surface() -> Lifecycle {
        let mut lc = lifecycle();
        lc.handle(LifecycleEvent::SetLocked(true), now());
        lc.handle(
            LifecycleEvent::SurfaceCreated {
                surface: Arc::new(RecordingPresenter::default()),
                width: 1920,
                height: 1080,
            },
            now(),
        );
        lc.handle(
            LifecycleEvent::ImagesLoaded {
                size: (1920, 1080),
                images: images(1920, 1080),
            },
            now(),
        );
        lc
    }

    fn images(width: u32, height: u32) -> StaticImages {
        StaticImages {
            wallpaper: Some(StaticImage::new(Bitmap::solid(width, height, [200, 200, 200, 255]))),
            home: None,
            gradient: StaticImage::new(Bitmap::gradient(
                width,
                height,
                &crate::bitmap::DEFAULT_GRADIENT,
            )),
        }
    }

    fn media(title: &str, video: Option<&str>) -> MediaInfo {
        MediaInfo {
            title: title.to_string(),
            artist: "Artist".to_string(),
            album: None,
            art_path: None,
            video_path: video.map(str::to_string),
        }
    }

    fn draws(effects: &[Effect]) -> Vec<bool> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Render(RenderMessage::Draw { present_video }) => Some(*present_video),
                _ => None,
            })
            .collect()
    }

    fn scheduled(effects: &[Effect]) -> Option<Duration> {
        effects.iter().rev().find_map(|e| match e {
            Effect::ScheduleDraw(d) => Some(*d),
            _ => None,
        })
    }

    fn video_messages(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Render(
                    msg @ (RenderMessage::SetVideoSource(_)
                    | RenderMessage::StopVideo
                    | RenderMessage::ResumeVideo
                    | RenderMessage::ResetVideo),
                ) => Some(format!("{:?}", msg)),
                _ => None,
            })
            .collect()
    }

    fn overlay_build(effects: &[Effect]) -> Option<(u64, OverlayRequest)> {
        effects.iter().find_map(|e| match e {
            Effect::BuildOverlay { token, request } => Some((*token, request.clone())),
            _ => None,
        })
    }

    fn background(effects: &[Effect]) -> Option<Option<Arc<Bitmap>>> {
        effects.iter().find_map(|e| match e {
            Effect::Render(RenderMessage::SetBackground(b)) => Some(b.clone()),
            _ => None,
        })
    }

    fn resolve_video(lc: &mut Lifecycle, title: &str, path: &str) -> Vec<Effect> {
        let effects = lc.handle(
            LifecycleEvent::MediaChanged(Some(media(title, Some(path)))),
            now(),
        );
        let token = effects
            .iter()
            .find_map(|e| match e {
                Effect::ResolveMedia { token, .. } => Some(*token),
                _ => None,
            })
            .unwrap();
        lc.handle(
            LifecycleEvent::MediaResolved {
                token,
                media: ResolvedMedia {
                    art: None,
                    video: Some(PathBuf::from(path)),
                },
            },
            now(),
        )
    }

    #[test]
    fn test_locked_wallpaper_with_overlay_every_frame() {
        let mut lc = lifecycle();
        lc.handle(LifecycleEvent::SetLocked(true), now());
        let created = lc.handle(
            LifecycleEvent::SurfaceCreated {
                surface: Arc::new(RecordingPresenter::default()),
                width: 1920,
                height: 1080,
            },
            now(),
        );
        assert!(created.iter().any(|e| matches!(e, Effect::LoadImages { size: (1920, 1080), .. })));

        let effects = lc.handle(
            LifecycleEvent::ImagesLoaded {
                size: (1920, 1080),
                images: images(1920, 1080),
            },
            now(),
        );
        let bg = background(&effects).unwrap().unwrap();
        assert_eq!(bg.pixel(0, 0), [200, 200, 200, 255]);
        assert_eq!(draws(&effects), vec![false]);
        assert_eq!(scheduled(&effects), Some(Duration::from_millis(33)));

        // Light wallpaper: dark clock, rebuilt for the new color
        let (token, request) = overlay_build(&effects).unwrap();
        assert_eq!(request.content.time, "21:15:30");
        assert_eq!(request.style.text_color, [0, 0, 0]);

        let built = lc.handle(
            LifecycleEvent::OverlayBuilt {
                token,
                bitmap: Arc::new(Bitmap::new(1920, 1080)),
            },
            now(),
        );
        assert!(built.iter().any(|e| matches!(
            e,
            Effect::Render(RenderMessage::UpdateOverlay(Some(_)))
        )));
        assert_eq!(draws(&built).len(), 1);
    }

    #[test]
    fn test_invisible_never_draws() {
        let mut lc = locked_with_surface();
        let before = lc.draws();

        let effects = lc.handle(LifecycleEvent::SetVisible(false), now());
        assert!(effects.iter().any(|e| matches!(e, Effect::ScheduleReset(_))));
        assert!(effects.iter().any(|e| matches!(e, Effect::CancelDraw)));

        let mut all = Vec::new();
        for event in [
            LifecycleEvent::Tick,
            LifecycleEvent::SetAmbient(true),
            LifecycleEvent::SetAmbient(false),
            LifecycleEvent::SetPowerSave(true),
            LifecycleEvent::MediaChanged(Some(media("Song", None))),
            LifecycleEvent::SurfaceResized {
                width: 1280,
                height: 720,
            },
            LifecycleEvent::Tick,
        ] {
            all.extend(lc.handle(event, now()));
        }
        assert!(draws(&all).is_empty());
        assert_eq!(lc.draws(), before);

        let shown = lc.handle(LifecycleEvent::SetVisible(true), now());
        assert!(shown.iter().any(|e| matches!(e, Effect::ReloadConfig)));
        assert!(shown.iter().any(|e| matches!(e, Effect::CancelReset)));
        assert_eq!(draws(&shown).len(), 1);
    }

    #[test]
    fn test_video_source_follows_media() {
        let mut lc = locked_with_surface();
        let effects = resolve_video(&mut lc, "Song", "/clips/a.mp4");

        assert_eq!(
            video_messages(&effects),
            vec![r#"SetVideoSource(Some("/clips/a.mp4"))"#, "ResumeVideo"]
        );
        assert_eq!(draws(&effects), vec![true]);
        assert_eq!(scheduled(&effects), Some(Duration::from_millis(33)));

        // New identity tears down the current source before the next
        let changed = lc.handle(
            LifecycleEvent::MediaChanged(Some(media("Other", Some("/clips/b.mp4")))),
            now(),
        );
        assert_eq!(video_messages(&changed), vec!["StopVideo", "SetVideoSource(None)"]);
        assert_eq!(draws(&changed), vec![false]);
    }

    #[test]
    fn test_stale_media_resolution_is_ignored() {
        let mut lc = locked_with_surface();
        let first = lc.handle(
            LifecycleEvent::MediaChanged(Some(media("First", Some("/a.mp4")))),
            now(),
        );
        let stale_token = first
            .iter()
            .find_map(|e| match e {
                Effect::ResolveMedia { token, .. } => Some(*token),
                _ => None,
            })
            .unwrap();
        lc.handle(
            LifecycleEvent::MediaChanged(Some(media("Second", None))),
            now(),
        );

        let effects = lc.handle(
            LifecycleEvent::MediaResolved {
                token: stale_token,
                media: ResolvedMedia {
                    art: None,
                    video: Some(PathBuf::from("/a.mp4")),
                },
            },
            now(),
        );
        assert!(effects.is_empty());
        assert!(lc.state().video_file.is_none());
    }

    #[test]
    fn test_same_identity_is_not_a_change() {
        let mut lc = locked_with_surface();
        resolve_video(&mut lc, "Song", "/a.mp4");
        let effects = lc.handle(
            LifecycleEvent::MediaChanged(Some(media("Song", Some("/a.mp4")))),
            now(),
        );
        assert!(effects.is_empty());
        assert!(lc.state().video_file.is_some());
    }

    #[test]
    fn test_new_video_for_same_identity_swaps_source() {
        let mut lc = locked_with_surface();
        resolve_video(&mut lc, "Song", "/a.mp4");

        let changed = lc.handle(
            LifecycleEvent::MediaChanged(Some(media("Song", Some("/b.mp4")))),
            now(),
        );
        let token = changed
            .iter()
            .find_map(|e| match e {
                Effect::ResolveMedia { token, media, .. } => {
                    assert_eq!(media.video_path.as_deref(), Some("/b.mp4"));
                    Some(*token)
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(video_messages(&changed), vec!["StopVideo", "SetVideoSource(None)"]);

        let resolved = lc.handle(
            LifecycleEvent::MediaResolved {
                token,
                media: ResolvedMedia {
                    art: None,
                    video: Some(PathBuf::from("/b.mp4")),
                },
            },
            now(),
        );
        assert_eq!(
            video_messages(&resolved),
            vec![r#"SetVideoSource(Some("/b.mp4"))"#, "ResumeVideo"]
        );
    }

    #[test]
    fn test_art_arriving_later_is_resolved() {
        let mut lc = locked_with_surface();
        let first = lc.handle(LifecycleEvent::MediaChanged(Some(media("Song", None))), now());
        assert!(!first.iter().any(|e| matches!(e, Effect::ResolveMedia { .. })));

        let mut with_art = media("Song", None);
        with_art.art_path = Some("/covers/song.png".to_string());
        let second = lc.handle(LifecycleEvent::MediaChanged(Some(with_art)), now());
        assert!(second.iter().any(|e| matches!(
            e,
            Effect::ResolveMedia { media, .. } if media.art_path.as_deref() == Some("/covers/song.png")
        )));
    }

    #[test]
    fn test_ambient_stops_video_and_restarts_same_source_from_beginning() {
        let mut lc = locked_with_surface();
        resolve_video(&mut lc, "Song", "/a.mp4");

        let ambient = lc.handle(LifecycleEvent::SetAmbient(true), now());
        assert_eq!(video_messages(&ambient), vec!["StopVideo"]);
        assert_eq!(draws(&ambient), vec![false]);
        assert_eq!(background(&ambient), Some(None));
        let (_, request) = overlay_build(&ambient).unwrap();
        assert!(request.style.ambient);
        assert_eq!(request.content.time, "21:15");
        assert!(request.content.title.is_empty());
        assert_eq!(scheduled(&ambient), Some(Duration::from_secs(30)));

        // Ticks in ambient never resume playback
        let tick = lc.handle(LifecycleEvent::Tick, now());
        assert!(video_messages(&tick).is_empty());

        let back = lc.handle(LifecycleEvent::SetAmbient(false), now());
        // Same decoder, no teardown; stop() rewound it to the start
        assert_eq!(video_messages(&back), vec!["ResumeVideo"]);
        let (_, request) = overlay_build(&back).unwrap();
        assert_eq!(request.style.offset, (0.0, 0.0));
        assert!(!request.style.ambient);
    }

    #[test]
    fn test_ambient_burn_in_offset_is_bounded() {
        let mut lc = locked_with_surface();
        let effects = lc.handle(LifecycleEvent::SetAmbient(true), now());
        let (_, request) = overlay_build(&effects).unwrap();
        let (x, y) = request.style.offset;
        let max = lc.config.overlay.burn_in_max_offset;
        assert!(x.abs() <= max && y.abs() <= max);
    }

    #[test]
    fn test_power_save_throttles_and_stops_video() {
        let mut lc = locked_with_surface();
        resolve_video(&mut lc, "Song", "/a.mp4");

        let effects = lc.handle(LifecycleEvent::SetPowerSave(true), now());
        assert_eq!(video_messages(&effects), vec!["StopVideo"]);
        assert_eq!(draws(&effects), vec![false]);
        assert!(scheduled(&effects).unwrap() >= Duration::from_millis(1000));
    }

    #[test]
    fn test_unlocked_home_screen_is_on_demand() {
        let mut lc = locked_with_surface();
        let effects = lc.handle(LifecycleEvent::SetLocked(false), now());
        assert_eq!(draws(&effects).len(), 1);
        assert_eq!(scheduled(&effects), None);
        assert!(effects.iter().any(|e| matches!(e, Effect::CancelDraw)));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Render(RenderMessage::UpdateOverlay(None))
        )));
    }

    #[test]
    fn test_stale_overlay_and_image_sizes_dropped() {
        let mut lc = locked_with_surface();
        let effects = lc.handle(
            LifecycleEvent::SurfaceResized {
                width: 1280,
                height: 720,
            },
            now(),
        );
        let (token, request) = overlay_build(&effects).unwrap();
        assert_eq!((request.width, request.height), (1280, 720));

        let stale = lc.handle(
            LifecycleEvent::ImagesLoaded {
                size: (1920, 1080),
                images: images(1920, 1080),
            },
            now(),
        );
        assert!(stale.is_empty());

        let old = lc.handle(
            LifecycleEvent::OverlayBuilt {
                token: token - 1,
                bitmap: Arc::new(Bitmap::new(1920, 1080)),
            },
            now(),
        );
        assert!(old.is_empty());
    }

    #[test]
    fn test_hidden_timeout_resets_and_rearms() {
        let mut lc = locked_with_surface();
        resolve_video(&mut lc, "Song", "/a.mp4");
        lc.handle(LifecycleEvent::SetVisible(false), now());

        let reset = lc.handle(LifecycleEvent::HiddenTimeout, now());
        assert_eq!(video_messages(&reset), vec!["ResetVideo"]);

        let shown = lc.handle(LifecycleEvent::SetVisible(true), now());
        assert_eq!(
            video_messages(&shown),
            vec![r#"SetVideoSource(Some("/a.mp4"))"#, "ResumeVideo"]
        );
    }

    #[test]
    fn test_hidden_timeout_ignored_when_visible() {
        let mut lc = locked_with_surface();
        assert!(lc.handle(LifecycleEvent::HiddenTimeout, now()).is_empty());
    }

    #[test]
    fn test_shutdown() {
        let mut lc = locked_with_surface();
        let effects = lc.handle(LifecycleEvent::Shutdown, now());
        assert!(matches!(effects.last(), Some(Effect::Exit)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Render(RenderMessage::Shutdown))));
    }

    #[test]
    fn test_status() {
        let mut lc = locked_with_surface();
        lc.handle(LifecycleEvent::MediaChanged(Some(media("Song", None))), now());
        let status = lc.status(
            RenderSnapshot {
                frames_drawn: 3,
                video_ready: false,
                surface: Some((1920, 1080)),
                last_primary: None,
            },
            Duration::from_secs(5),
        );
        assert!(status.locked);
        assert_eq!(status.media, Some(("Song".to_string(), "Artist".to_string())));
        assert_eq!(status.content, ContentKind::Wallpaper);
        assert_eq!(status.cadence, "every 33ms");
        assert_eq!(status.uptime_secs, 5);
        assert!(status.diagnostics[0].contains("Now playing"));
    }
}

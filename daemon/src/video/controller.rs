//! Video source controller: at most one live decoder bound to the `video`
//! texture.

use super::binding::FrameBinding;
use super::decoder::{Decoder, DecoderError, DecoderEvent, DecoderFactory, validate_source};
use crate::diagnostics::DiagnosticLog;
use crate::render::crop::DEFAULT_VIDEO_RATIO;
use crate::render::{VideoFeed, VideoFrame};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct VideoController {
    factory: Box<dyn DecoderFactory>,
    decoder: Option<Box<dyn Decoder>>,
    binding: Option<FrameBinding>,
    /// Requested source; kept while no context exists
    path: Option<PathBuf>,
    generation: u64,
    aspect_ratio: f32,
    prepared: bool,
    playing: bool,
    looping: bool,
    /// Cleared by `stop()`, set again by `resume()`
    playback_allowed: bool,
    context_available: bool,
    diagnostics: Arc<DiagnosticLog>,
}

impl VideoController {
    pub fn new(factory: Box<dyn DecoderFactory>, diagnostics: Arc<DiagnosticLog>) -> Self {
        log::info!("Video decoder backend: {}", factory.name());
        Self {
            factory,
            decoder: None,
            binding: None,
            path: None,
            generation: 0,
            aspect_ratio: DEFAULT_VIDEO_RATIO,
            prepared: false,
            playing: false,
            looping: false,
            playback_allowed: true,
            context_available: false,
            diagnostics,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Replace the current source.
    ///
    /// The previous decoder is stopped and released and its binding is
    /// dropped before anything new is created. `None` only tears down.
    pub fn set_source(&mut self, path: Option<PathBuf>) -> Result<(), DecoderError> {
        if self.path == path && self.decoder.is_some() {
            log::debug!("Video source unchanged");
            return Ok(());
        }

        self.teardown();
        self.path = path;

        if self.path.is_none() {
            return Ok(());
        }
        if !self.context_available {
            log::debug!("No graphics context yet, video source will be armed on create");
            return Ok(());
        }
        self.arm()
    }

    fn arm(&mut self) -> Result<(), DecoderError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        if let Err(e) = validate_source(&path) {
            self.diagnostics.record("video", format!("Rejected source: {}", e));
            return Err(e);
        }

        self.generation += 1;
        self.aspect_ratio = DEFAULT_VIDEO_RATIO;
        let binding = FrameBinding::new(self.generation);

        let mut decoder = match self.factory.create(&path, binding.sink()) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.diagnostics
                    .record("video", format!("Decoder creation failed: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = decoder.prepare() {
            self.diagnostics.record("video", format!("Prepare failed: {}", e));
            decoder.release();
            return Err(e);
        }

        log::info!(
            "Armed video source {} (generation {})",
            path.display(),
            self.generation
        );
        self.binding = Some(binding);
        self.decoder = Some(decoder);
        Ok(())
    }

    /// Stop, release and unbind the current decoder, in that order
    fn teardown(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            if self.playing
                && let Err(e) = decoder.pause()
            {
                log::warn!("Failed to pause decoder during teardown: {}", e);
            }
            decoder.release();
        }
        if let Some(binding) = self.binding.take() {
            let (delivered, dropped) = binding.counters();
            log::debug!(
                "Released video binding {} (delivered: {}, dropped: {})",
                binding.generation(),
                delivered,
                dropped
            );
        }
        self.prepared = false;
        self.playing = false;
        self.looping = false;
    }

    /// Drain decoder notifications; call once per render-thread iteration
    pub fn poll(&mut self) {
        let events = match self.decoder.as_mut() {
            Some(decoder) => decoder.poll_events(),
            None => return,
        };

        for event in events {
            match event {
                DecoderEvent::Prepared { width, height } => self.on_prepared(width, height),
                DecoderEvent::Error(message) => {
                    self.diagnostics.record("video", format!("Decoder error: {}", message));
                    self.teardown();
                    return;
                }
                DecoderEvent::EndOfStream => self.on_end_of_stream(),
            }
        }
    }

    fn on_prepared(&mut self, width: u32, height: u32) {
        self.prepared = true;
        self.looping = true;
        if width > 0 && height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
        log::info!(
            "Video prepared: {}x{} (ratio {:.3})",
            width,
            height,
            self.aspect_ratio
        );

        if self.playback_allowed {
            self.start_decoder();
        }
    }

    fn on_end_of_stream(&mut self) {
        if !self.looping {
            log::info!("Video playback finished");
            self.playing = false;
            return;
        }
        log::debug!("Video reached EOS, looping");
        if let Some(decoder) = self.decoder.as_mut()
            && let Err(e) = decoder.seek_to_start()
        {
            self.diagnostics.record("video", format!("Loop seek failed: {}", e));
        }
    }

    fn start_decoder(&mut self) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        match decoder.start() {
            Ok(()) => self.playing = true,
            Err(e) => {
                self.diagnostics.record("video", format!("Start failed: {}", e));
                self.teardown();
            }
        }
    }

    /// Pause and rewind, keeping the decoder
    pub fn stop(&mut self) {
        self.playback_allowed = false;
        if !self.prepared {
            return;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        if self.playing {
            crate::log_and_continue!(decoder.pause(), "pause video");
            self.playing = false;
        }
        crate::log_and_continue!(decoder.seek_to_start(), "rewind video");
    }

    /// Allow playback again and start a prepared decoder
    pub fn resume(&mut self) {
        self.playback_allowed = true;
        if self.prepared && !self.playing {
            self.start_decoder();
        }
    }

    /// Full stop and release; the source is forgotten
    pub fn reset(&mut self) {
        self.teardown();
        self.path = None;
        self.aspect_ratio = DEFAULT_VIDEO_RATIO;
    }

    /// Arm a remembered source once a context exists
    pub fn on_context_created(&mut self) {
        self.context_available = true;
        if self.path.is_some() && self.decoder.is_none() {
            crate::log_and_continue!(self.arm(), "arm pending video source");
        }
    }
}

impl VideoFeed for VideoController {
    fn take_frame(&mut self) -> Option<VideoFrame> {
        let binding = self.binding.as_ref()?;
        let frame = binding.take()?;
        (frame.generation == self.generation).then_some(frame)
    }

    fn is_ready(&self) -> bool {
        self.binding.as_ref().is_some_and(FrameBinding::is_ready)
    }

    fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    /// Called before the video texture is deleted. The source is kept and
    /// re-armed by the next [`VideoController::on_context_created`].
    fn release_binding(&mut self) {
        self.teardown();
        self.context_available = false;
    }
}

impl Drop for VideoController {
    fn drop(&mut self) {
        self.teardown();
    }
}

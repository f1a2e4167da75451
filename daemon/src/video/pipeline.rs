//! GStreamer decoder
//!
//! Decoded frames are delivered as BGRA through an `AppSink`; its
//! `new_sample` callback is the frame-arrival callback and runs on a
//! GStreamer streaming thread.

use super::binding::FrameSink;
use super::decoder::{Decoder, DecoderError, DecoderEvent, DecoderFactory};
use crate::render::crop::Y_FLIP;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::Path;
use std::sync::OnceLock;

/// Initialize GStreamer once per process
pub fn initialize_gstreamer() -> Result<(), DecoderError> {
    static GSTREAMER_INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

    GSTREAMER_INITIALIZED
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(DecoderError::Pipeline)
}

/// Build the decode pipeline for `path`
///
/// The generic chain goes through `decodebin`; with `hardware` the VA-API
/// H.264 decoder and post-processor are used instead.
pub fn build_pipeline(
    path: &Path,
    hardware: bool,
) -> Result<(gst::Pipeline, gst_app::AppSink), DecoderError> {
    let pipeline_str = if hardware {
        "filesrc name=src ! qtdemux ! h264parse ! vah264dec ! vapostproc ! video/x-raw,format=BGRA ! appsink name=sink"
    } else {
        "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=BGRA ! appsink name=sink"
    };
    log::debug!("GStreamer pipeline: {}", pipeline_str);

    let pipeline = gst::parse::launch(pipeline_str)
        .map_err(|e| DecoderError::Pipeline(format!("failed to create pipeline: {}", e)))?
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| DecoderError::Pipeline("pipeline is not a gst::Pipeline".to_string()))?;

    let location = path
        .to_str()
        .ok_or_else(|| DecoderError::File(format!("{}: path is not UTF-8", path.display())))?;
    pipeline
        .by_name("src")
        .ok_or_else(|| DecoderError::Pipeline("filesrc missing".to_string()))?
        .set_property("location", location);

    let app_sink = pipeline
        .by_name("sink")
        .ok_or_else(|| DecoderError::Pipeline("appsink missing".to_string()))?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| DecoderError::Pipeline("sink is not an AppSink".to_string()))?;

    Ok((pipeline, app_sink))
}

/// Configure AppSink for low-latency video delivery
///
/// - `sync=true`: frames are paced by their timestamps
/// - `max-buffers=1` + `drop=true`: only the newest frame is kept
pub fn configure_app_sink(app_sink: &gst_app::AppSink) {
    app_sink.set_property("emit-signals", true);
    app_sink.set_property("sync", true);
    app_sink.set_property("max-buffers", 1u32);
    app_sink.set_property("drop", true);
}

/// Copy each decoded sample, row by row, into the frame sink
pub fn setup_frame_callback(app_sink: &gst_app::AppSink, sink: FrameSink) {
    app_sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |appsink| {
                let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let caps = sample.caps().ok_or(gst::FlowError::NotNegotiated)?;
                let info = gst_video::VideoInfo::from_caps(caps)
                    .map_err(|_| gst::FlowError::NotNegotiated)?;
                let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

                let width = info.width();
                let height = info.height();
                let row_bytes = width as usize * 4;
                let stride = info.stride()[0] as usize;
                let src = map.as_slice();

                let mut data = Vec::with_capacity(row_bytes * height as usize);
                for row in 0..height as usize {
                    let start = row * stride;
                    let line = src
                        .get(start..start + row_bytes)
                        .ok_or(gst::FlowError::Error)?;
                    data.extend_from_slice(line);
                }

                // Samples are top-left origin
                if !sink.deliver(width, height, data, Y_FLIP) {
                    return Err(gst::FlowError::Flushing);
                }
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
}

pub struct GstDecoder {
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    prepared: bool,
    released: bool,
}

impl GstDecoder {
    fn set_state(&self, state: gst::State) -> Result<(), DecoderError> {
        self.pipeline
            .set_state(state)
            .map(|_| ())
            .map_err(|e| DecoderError::State(format!("{:?}: {}", state, e)))
    }

    fn negotiated_size(&self) -> Option<(u32, u32)> {
        let caps = self.app_sink.static_pad("sink")?.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        Some((info.width(), info.height()))
    }
}

impl Decoder for GstDecoder {
    fn prepare(&mut self) -> Result<(), DecoderError> {
        // Preroll; completion is reported as AsyncDone on the bus
        self.set_state(gst::State::Paused)
    }

    fn poll_events(&mut self) -> Vec<DecoderEvent> {
        let mut events = Vec::new();
        let Some(bus) = self.pipeline.bus() else {
            return events;
        };

        // Drain everything so the bus does not grow
        while let Some(msg) = bus.pop() {
            match msg.view() {
                gst::MessageView::AsyncDone(_) if !self.prepared => {
                    self.prepared = true;
                    let (width, height) = self.negotiated_size().unwrap_or((0, 0));
                    events.push(DecoderEvent::Prepared { width, height });
                }
                gst::MessageView::Eos(_) => events.push(DecoderEvent::EndOfStream),
                gst::MessageView::Error(err) => {
                    events.push(DecoderEvent::Error(format!(
                        "{} (debug: {:?})",
                        err.error(),
                        err.debug()
                    )));
                }
                _ => {}
            }
        }
        events
    }

    fn start(&mut self) -> Result<(), DecoderError> {
        log::info!("Starting video playback");
        self.set_state(gst::State::Playing)
    }

    fn pause(&mut self) -> Result<(), DecoderError> {
        log::info!("Pausing video playback");
        self.set_state(gst::State::Paused)
    }

    fn seek_to_start(&mut self) -> Result<(), DecoderError> {
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::ZERO,
            )
            .map_err(|e| DecoderError::State(format!("seek failed: {}", e)))
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }

        // Clear callbacks first to prevent new frames
        self.app_sink
            .set_callbacks(gst_app::AppSinkCallbacks::builder().build());

        match self.pipeline.set_state(gst::State::Null) {
            Ok(_) => {
                let (result, current, pending) =
                    self.pipeline.state(Some(gst::ClockTime::from_seconds(2)));
                if let Err(e) = result {
                    log::warn!("Failed to get pipeline final state: {:?}", e);
                } else {
                    log::debug!(
                        "Pipeline final state: current={:?}, pending={:?}",
                        current,
                        pending
                    );
                }
            }
            Err(e) => log::warn!("Failed to set pipeline state to Null: {}", e),
        }

        if let Some(bus) = self.pipeline.bus() {
            let mut drained = 0;
            while bus.pop().is_some() {
                drained += 1;
            }
            if drained > 0 {
                log::debug!("Drained {} pending messages from bus", drained);
            }
        }
    }
}

impl Drop for GstDecoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Default)]
pub struct GstDecoderFactory {
    hardware: bool,
}

impl GstDecoderFactory {
    pub fn new(hardware: bool) -> Self {
        Self { hardware }
    }
}

impl DecoderFactory for GstDecoderFactory {
    fn name(&self) -> &'static str {
        if self.hardware {
            "gstreamer (va-api)"
        } else {
            "gstreamer"
        }
    }

    fn create(&self, path: &Path, sink: FrameSink) -> Result<Box<dyn Decoder>, DecoderError> {
        initialize_gstreamer()?;
        log::info!("Creating GStreamer pipeline for: {}", path.display());

        let (pipeline, app_sink) = build_pipeline(path, self.hardware)?;
        configure_app_sink(&app_sink);
        setup_frame_callback(&app_sink, sink);

        Ok(Box::new(GstDecoder {
            pipeline,
            app_sink,
            prepared: false,
            released: false,
        }))
    }
}

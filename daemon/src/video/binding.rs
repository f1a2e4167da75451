//! The hand-off between decoder output and the `video` texture.
//!
//! A [`FrameBinding`] is created for every armed source and replaced, never
//! reused, when the decoder is replaced. Any sink of an older binding keeps
//! writing into its own orphaned slot, so its frames can never reach the
//! renderer.

use crate::render::VideoFrame;
use crate::render::crop::Mat4;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct FrameSlot {
    /// A frame arrived since the last `take`
    frame_available: bool,
    /// At least one frame arrived for this binding
    ready: bool,
    released: bool,
    frame: Option<VideoFrame>,
    delivered: u64,
    dropped: u64,
}

/// Render-thread end of the binding
#[derive(Debug)]
pub struct FrameBinding {
    slot: Arc<Mutex<FrameSlot>>,
    generation: u64,
}

/// Decoder end of the binding, moved into the frame-arrival callback
#[derive(Debug, Clone)]
pub struct FrameSink {
    slot: Arc<Mutex<FrameSlot>>,
    generation: u64,
}

impl FrameBinding {
    pub fn new(generation: u64) -> Self {
        Self {
            slot: Arc::new(Mutex::new(FrameSlot::default())),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink {
            slot: Arc::clone(&self.slot),
            generation: self.generation,
        }
    }

    /// Read and clear the frame-available flag, returning the newest frame
    pub fn take(&self) -> Option<VideoFrame> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !std::mem::take(&mut slot.frame_available) {
            return None;
        }
        slot.frame.take()
    }

    pub fn is_ready(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ready
    }

    /// `(delivered, dropped)` frame counts
    pub fn counters(&self) -> (u64, u64) {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        (slot.delivered, slot.dropped)
    }

    /// Detach the sink side; later deliveries are discarded
    pub fn release(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.released = true;
        slot.ready = false;
        slot.frame_available = false;
        slot.frame = None;
    }
}

impl Drop for FrameBinding {
    fn drop(&mut self) {
        self.release();
    }
}

impl FrameSink {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Frame-arrival callback body. Returns `false` once the binding is gone.
    pub fn deliver(&self, width: u32, height: u32, data: Vec<u8>, transform: Mat4) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.released {
            return false;
        }

        if slot.frame_available {
            slot.dropped += 1;
            log::trace!("Video frame dropped (previous frame not consumed in time)");
        }

        slot.frame = Some(VideoFrame {
            width,
            height,
            data,
            transform,
            generation: self.generation,
        });
        slot.frame_available = true;
        slot.ready = true;
        slot.delivered += 1;
        true
    }
}

//! Video source support
//!
//! - `binding`: frame hand-off from the decoder thread to the render thread
//! - `decoder`: the decoder traits and source validation
//! - `controller`: the single-decoder source controller
//! - `pipeline`: the GStreamer decoder (`video` feature)

mod binding;
mod controller;
mod decoder;
#[cfg(feature = "video")]
mod pipeline;

pub use binding::{FrameBinding, FrameSink};
pub use controller::VideoController;
pub use decoder::{
    Decoder, DecoderError, DecoderEvent, DecoderFactory, UnavailableDecoderFactory,
    validate_source,
};

#[cfg(test)]
pub(crate) use controller::tests as fake;

/// The decoder factory compiled into this build
pub fn default_factory(hardware_decode: bool) -> Box<dyn DecoderFactory> {
    #[cfg(feature = "video")]
    {
        Box::new(pipeline::GstDecoderFactory::new(hardware_decode))
    }

    #[cfg(not(feature = "video"))]
    {
        let _ = hardware_decode;
        log::info!("Video support not compiled in");
        Box::new(UnavailableDecoderFactory)
    }
}

//! Decoder seam between the controller and a media framework

use super::binding::FrameSink;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecoderError {
    #[error("video decoding is not available")]
    Unavailable,

    #[error("invalid video file: {0}")]
    File(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("state change failed: {0}")]
    State(String),
}

/// Asynchronous notifications drained by [`Decoder::poll_events`]
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    Prepared { width: u32, height: u32 },
    Error(String),
    EndOfStream,
}

/// One decoder instance bound to one source file
pub trait Decoder: Send {
    /// Begin asynchronous preparation; completion arrives as
    /// [`DecoderEvent::Prepared`]
    fn prepare(&mut self) -> Result<(), DecoderError>;

    fn poll_events(&mut self) -> Vec<DecoderEvent>;

    fn start(&mut self) -> Result<(), DecoderError>;

    fn pause(&mut self) -> Result<(), DecoderError>;

    fn seek_to_start(&mut self) -> Result<(), DecoderError>;

    /// Stop producing frames and free decoder resources
    fn release(&mut self);
}

pub trait DecoderFactory: Send {
    fn name(&self) -> &'static str;

    /// Build a decoder whose frame-arrival callback writes into `sink`
    fn create(&self, path: &Path, sink: FrameSink) -> Result<Box<dyn Decoder>, DecoderError>;
}

/// Factory used when no media framework is compiled in
#[derive(Debug, Default)]
pub struct UnavailableDecoderFactory;

impl DecoderFactory for UnavailableDecoderFactory {
    fn name(&self) -> &'static str {
        "none"
    }

    fn create(&self, _path: &Path, _sink: FrameSink) -> Result<Box<dyn Decoder>, DecoderError> {
        Err(DecoderError::Unavailable)
    }
}

/// Reject a source that is missing, unreadable or empty
pub fn validate_source(path: &Path) -> Result<(), DecoderError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| DecoderError::File(format!("{}: {}", path.display(), e)))?;

    if !metadata.is_file() {
        return Err(DecoderError::File(format!(
            "{}: not a regular file",
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(DecoderError::File(format!("{}: empty file", path.display())));
    }

    std::fs::File::open(path)
        .map_err(|e| DecoderError::File(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_source() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.mp4");
        assert!(matches!(
            validate_source(&missing),
            Err(DecoderError::File(_))
        ));

        let empty = dir.path().join("empty.mp4");
        std::fs::File::create(&empty).unwrap();
        assert!(validate_source(&empty).is_err());

        assert!(validate_source(dir.path()).is_err());

        let clip = dir.path().join("clip.mp4");
        std::fs::File::create(&clip)
            .unwrap()
            .write_all(b"\0\0\0\x18ftypmp42")
            .unwrap();
        assert!(validate_source(&clip).is_ok());
    }

    #[test]
    fn test_unavailable_factory() {
        let binding = super::super::binding::FrameBinding::new(1);
        let result = UnavailableDecoderFactory.create(Path::new("a.mp4"), binding.sink());
        assert!(matches!(result, Err(DecoderError::Unavailable)));
    }
}

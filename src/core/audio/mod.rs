//! Bidirectional audio streaming.
//!
//! Capture flows from the [`AudioDevice`] to the network through
//! [`AudioPipeline`]; provider audio flows back through a bounded
//! [`PlaybackBuffer`] drained at the sink's pace.

mod chunk;
mod device;
mod pipeline;
mod playback;
mod resample;
mod wav_device;

use thiserror::Error;

pub use chunk::{AudioChunk, ChunkSequencer, le_bytes_to_samples, samples_to_le_bytes};
pub use device::{AudioDevice, AudioDeviceInfo, AudioErrorCallback, CaptureCallback, DeviceKind};
pub use pipeline::{AudioPipeline, AudioPipelineConfig, AudioUplink, PipelineStats};
pub use playback::{DEFAULT_CROSSFADE_SAMPLES, PlaybackBuffer, PlaybackFrame, PlaybackStats};
pub use resample::{resample, resample_chunk};
pub use wav_device::{WavFileDevice, WavFileDeviceConfig};

/// Audio hardware and format errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("Audio I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::Io(err.to_string())
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => AudioError::Io(e.to_string()),
            other => AudioError::InvalidFormat(other.to_string()),
        }
    }
}

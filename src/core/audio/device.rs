//! Contract for the audio hardware collaborator.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::{AudioChunk, AudioError};

/// Called from the capture source's own timing context for every captured
/// chunk. Implementations must not block.
pub type CaptureCallback = Arc<dyn Fn(AudioChunk) + Send + Sync>;

/// Receives hardware faults raised while capture or playback runs.
pub type AudioErrorCallback = Arc<dyn Fn(AudioError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Input => write!(f, "input"),
            DeviceKind::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
}

/// Physical (or virtual) microphone and speaker access.
///
/// The engine never touches platform audio APIs itself; everything goes
/// through this trait. Methods are synchronous and must return promptly.
pub trait AudioDevice: Send + Sync {
    /// Prepare the device for use. Called before capture starts.
    fn init(&self) -> Result<(), AudioError>;

    /// Begin delivering captured chunks to `on_chunk`. Returns `false` if
    /// capture could not be started.
    fn start_capture(&self, on_chunk: CaptureCallback) -> bool;

    fn stop_capture(&self);

    /// Queue a chunk for output. Returns `false` on a playback failure.
    fn play(&self, chunk: &AudioChunk) -> bool;

    /// Drop any audio already handed to the output but not yet heard.
    fn clear_playback_queue(&self);

    fn list_devices(&self) -> Vec<AudioDeviceInfo>;

    /// Switch the active input device. Returns `false` for an unknown id.
    fn select_device(&self, id: &str) -> bool;

    /// Rate of chunks delivered to the capture callback.
    fn capture_sample_rate(&self) -> u32;

    /// Rate expected by [`AudioDevice::play`].
    fn playback_sample_rate(&self) -> u32;

    /// Register a sink for asynchronous hardware faults.
    fn set_error_callback(&self, _callback: AudioErrorCallback) {}
}

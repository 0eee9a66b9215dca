//! PCM audio chunks and their wire encoding.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::AudioError;

/// A block of mono 16-bit PCM samples.
///
/// Chunks move between pipeline stages by value; each stage owns the chunk it
/// currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Monotonic per-stream sequence number
    pub sequence: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Little-endian byte representation.
    pub fn to_le_bytes(&self) -> Bytes {
        samples_to_le_bytes(&self.samples)
    }

    /// Build a chunk from little-endian PCM16 bytes.
    pub fn from_le_bytes(bytes: Bytes, sample_rate: u32, sequence: u64) -> Result<Self, AudioError> {
        let samples = le_bytes_to_samples(&bytes)?;
        Ok(Self::new(samples, sample_rate, sequence))
    }

    /// Base64 of the little-endian PCM bytes, as carried on the wire.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_le_bytes())
    }

    /// Decode a base64 PCM16 payload.
    pub fn from_base64(
        payload: &str,
        sample_rate: u32,
        sequence: u64,
    ) -> Result<Self, AudioError> {
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| AudioError::InvalidFormat(format!("invalid base64 audio: {e}")))?;
        Self::from_le_bytes(Bytes::from(bytes), sample_rate, sequence)
    }
}

pub fn samples_to_le_bytes(samples: &[i16]) -> Bytes {
    let mut bytes = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.put_i16_le(sample);
    }
    bytes.freeze()
}

/// Convert little-endian PCM16 bytes to samples. An odd byte count is rejected.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::InvalidFormat(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    let mut buf = bytes;
    let mut samples = Vec::with_capacity(buf.len() / 2);
    while buf.has_remaining() {
        samples.push(buf.get_i16_le());
    }
    Ok(samples)
}

/// Hands out monotonically increasing sequence numbers for one stream.
#[derive(Debug, Default)]
pub struct ChunkSequencer {
    next: AtomicU64,
}

impl ChunkSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Wrap samples into a chunk stamped with the next sequence number.
    pub fn chunk(&self, samples: Vec<i16>, sample_rate: u32) -> AudioChunk {
        AudioChunk::new(samples, sample_rate, self.next())
    }
}

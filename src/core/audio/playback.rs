//! Bounded playback ring buffer with underrun and crossfade handling.
//!
//! The network receive path is the single producer and the drain task is the
//! single consumer. Both ends sit on an `rtrb` SPSC ring; each end is wrapped
//! in a `parking_lot::Mutex` so the buffer can be shared through an `Arc` and
//! so [`PlaybackBuffer::clear`] can hold both ends at once.
//!
//! Policies:
//! - overflow: the incoming chunk is dropped whole and a warning is logged
//! - underrun: the drain receives a frame of silence and a warning is logged
//!   once per underrun episode
//! - resume after a gap: the first `crossfade_len` samples are blended with
//!   the tail of the previously played audio, or faded in from silence

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, warn};

use super::AudioChunk;

/// Default crossfade length in samples (5 ms at 48 kHz)
pub const DEFAULT_CROSSFADE_SAMPLES: usize = 240;

/// One frame produced by the drain side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackFrame {
    /// Buffered audio, zero-padded to the frame length if the buffer ran short
    Audio(Vec<i16>),
    /// Buffer empty while a response is still streaming
    Silence(Vec<i16>),
    /// Buffer empty and no response is streaming
    Idle,
}

/// Counters reported through pipeline statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub chunks_accepted: u64,
    pub chunks_dropped: u64,
    pub samples_played: u64,
    pub underruns: u64,
    pub clears: u64,
}

struct DrainState {
    consumer: Consumer<i16>,
    /// Last samples handed to the sink, oldest first
    tail: Vec<i16>,
    /// Next audio frame follows a gap and needs a crossfade
    resuming: bool,
    in_underrun: bool,
}

pub struct PlaybackBuffer {
    producer: Mutex<Producer<i16>>,
    drain: Mutex<DrainState>,
    capacity: usize,
    crossfade_len: usize,
    stream_open: AtomicBool,
    chunks_accepted: AtomicU64,
    chunks_dropped: AtomicU64,
    samples_played: AtomicU64,
    underruns: AtomicU64,
    clears: AtomicU64,
}

impl PlaybackBuffer {
    /// Create a buffer holding up to `capacity` samples.
    pub fn new(capacity: usize, crossfade_len: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            producer: Mutex::new(producer),
            drain: Mutex::new(DrainState {
                consumer,
                tail: Vec::with_capacity(crossfade_len),
                resuming: true,
                in_underrun: false,
            }),
            capacity,
            crossfade_len,
            stream_open: AtomicBool::new(false),
            chunks_accepted: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            samples_played: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    /// Buffer sized for `capacity_ms` of audio at `sample_rate`.
    pub fn with_duration(capacity_ms: u32, sample_rate: u32, crossfade_len: usize) -> Self {
        let capacity = (sample_rate as usize * capacity_ms as usize / 1000).max(1);
        Self::new(capacity, crossfade_len)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently buffered, always within `[0, capacity]`.
    pub fn fill_level(&self) -> usize {
        self.drain.lock().consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.fill_level() == 0
    }

    /// Whether a response is currently streaming into the buffer.
    pub fn is_stream_open(&self) -> bool {
        self.stream_open.load(Ordering::Acquire)
    }

    /// Append a chunk. Returns `false` if it was dropped because it does not
    /// fit.
    pub fn push(&self, chunk: &AudioChunk) -> bool {
        if chunk.is_empty() {
            return true;
        }

        let mut producer = self.producer.lock();
        self.stream_open.store(true, Ordering::Release);

        let len = chunk.len();
        if producer.slots() < len {
            self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                sequence = chunk.sequence,
                samples = len,
                free = producer.slots(),
                capacity = self.capacity,
                "Playback buffer overflow, dropping chunk"
            );
            return false;
        }

        match producer.write_chunk(len) {
            Ok(mut slots) => {
                let (first, second) = slots.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&chunk.samples[..split]);
                second.copy_from_slice(&chunk.samples[split..]);
                slots.commit_all();
                self.chunks_accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sequence = chunk.sequence, "Playback buffer rejected chunk");
                false
            }
        }
    }

    /// Produce the next frame of `frame_len` samples for the sink.
    pub fn read_frame(&self, frame_len: usize) -> PlaybackFrame {
        let mut drain = self.drain.lock();
        let available = drain.consumer.slots();

        if available == 0 {
            drain.resuming = true;
            if !self.is_stream_open() {
                drain.in_underrun = false;
                return PlaybackFrame::Idle;
            }
            if !drain.in_underrun {
                drain.in_underrun = true;
                self.underruns.fetch_add(1, Ordering::Relaxed);
                warn!(frame_len, "Playback buffer underrun, emitting silence");
            }
            return PlaybackFrame::Silence(vec![0; frame_len]);
        }

        let count = available.min(frame_len);
        let mut frame = Vec::with_capacity(frame_len);
        if let Ok(slots) = drain.consumer.read_chunk(count) {
            let (first, second) = slots.as_slices();
            frame.extend_from_slice(first);
            frame.extend_from_slice(second);
            slots.commit_all();
        }

        if drain.resuming {
            crossfade(&mut frame, &drain.tail, self.crossfade_len);
            drain.resuming = false;
        }
        drain.in_underrun = false;
        remember_tail(&mut drain.tail, &frame, self.crossfade_len);
        self.samples_played
            .fetch_add(frame.len() as u64, Ordering::Relaxed);

        if frame.len() < frame_len {
            frame.resize(frame_len, 0);
            drain.resuming = true;
        }
        PlaybackFrame::Audio(frame)
    }

    /// Mark the end of the current response stream. Once the buffer runs dry
    /// the drain reports `Idle` instead of underruns.
    pub fn end_stream(&self) {
        self.stream_open.store(false, Ordering::Release);
    }

    /// Discard everything buffered and reset crossfade state.
    ///
    /// Safe to call concurrently from several paths; a second call finds an
    /// empty buffer and does nothing further. Returns the number of samples
    /// discarded.
    pub fn clear(&self) -> usize {
        let _producer = self.producer.lock();
        let mut drain = self.drain.lock();

        let pending = drain.consumer.slots();
        if pending > 0 {
            if let Ok(slots) = drain.consumer.read_chunk(pending) {
                slots.commit_all();
            }
        }
        drain.tail.clear();
        drain.resuming = true;
        drain.in_underrun = false;
        self.stream_open.store(false, Ordering::Release);
        self.clears.fetch_add(1, Ordering::Relaxed);

        debug!(discarded = pending, "Playback buffer cleared");
        pending
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            chunks_accepted: self.chunks_accepted.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            samples_played: self.samples_played.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PlaybackBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBuffer")
            .field("capacity", &self.capacity)
            .field("crossfade_len", &self.crossfade_len)
            .field("stream_open", &self.is_stream_open())
            .finish_non_exhaustive()
    }
}

/// Linear blend from `previous` (or silence) into the head of `frame`.
fn crossfade(frame: &mut [i16], previous: &[i16], len: usize) {
    let len = len.min(frame.len());
    for (i, sample) in frame.iter_mut().take(len).enumerate() {
        let gain = (i + 1) as f32 / (len + 1) as f32;
        let old = previous.get(i).copied().unwrap_or(0) as f32;
        let mixed = old * (1.0 - gain) + *sample as f32 * gain;
        *sample = mixed.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

fn remember_tail(tail: &mut Vec<i16>, frame: &[i16], len: usize) {
    if len == 0 {
        return;
    }
    if frame.len() >= len {
        tail.clear();
        tail.extend_from_slice(&frame[frame.len() - len..]);
    } else {
        tail.extend_from_slice(frame);
        let excess = tail.len().saturating_sub(len);
        tail.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn chunk(samples: Vec<i16>) -> AudioChunk {
        AudioChunk::new(samples, 48000, 0)
    }

    #[test]
    fn test_push_and_read_without_crossfade() {
        let buffer = PlaybackBuffer::new(1024, 0);
        assert!(buffer.push(&chunk(vec![1, 2, 3, 4])));
        assert_eq!(buffer.fill_level(), 4);

        assert_eq!(buffer.read_frame(2), PlaybackFrame::Audio(vec![1, 2]));
        assert_eq!(buffer.read_frame(2), PlaybackFrame::Audio(vec![3, 4]));
        assert_eq!(buffer.fill_level(), 0);
    }

    #[test]
    fn test_overflow_drops_new_chunk() {
        let buffer = PlaybackBuffer::new(8, 0);
        assert!(buffer.push(&chunk(vec![1; 6])));
        assert!(!buffer.push(&chunk(vec![2; 4])));
        assert_eq!(buffer.fill_level(), 6);
        assert_eq!(buffer.stats().chunks_dropped, 1);
        assert_eq!(buffer.read_frame(6), PlaybackFrame::Audio(vec![1; 6]));
    }

    #[test]
    fn test_underrun_emits_silence_while_streaming() {
        let buffer = PlaybackBuffer::new(64, 0);
        buffer.push(&chunk(vec![5; 4]));
        buffer.read_frame(4);

        assert_eq!(buffer.read_frame(4), PlaybackFrame::Silence(vec![0; 4]));
        assert_eq!(buffer.read_frame(4), PlaybackFrame::Silence(vec![0; 4]));
        // One episode, one count
        assert_eq!(buffer.stats().underruns, 1);
    }

    #[test]
    fn test_idle_after_end_of_stream() {
        let buffer = PlaybackBuffer::new(64, 0);
        assert_eq!(buffer.read_frame(4), PlaybackFrame::Idle);

        buffer.push(&chunk(vec![5; 4]));
        buffer.end_stream();
        assert!(matches!(buffer.read_frame(4), PlaybackFrame::Audio(_)));
        assert_eq!(buffer.read_frame(4), PlaybackFrame::Idle);
        assert_eq!(buffer.stats().underruns, 0);
    }

    #[test]
    fn test_short_read_is_padded() {
        let buffer = PlaybackBuffer::new(64, 0);
        buffer.push(&chunk(vec![7, 7]));
        assert_eq!(buffer.read_frame(4), PlaybackFrame::Audio(vec![7, 7, 0, 0]));
    }

    #[test]
    fn test_fade_in_from_silence() {
        let buffer = PlaybackBuffer::new(64, 3);
        buffer.push(&chunk(vec![1000; 6]));
        let PlaybackFrame::Audio(frame) = buffer.read_frame(6) else {
            panic!("expected audio");
        };
        assert_eq!(frame, vec![250, 500, 750, 1000, 1000, 1000]);
    }

    #[test]
    fn test_crossfade_from_previous_tail_after_gap() {
        let buffer = PlaybackBuffer::new(64, 3);
        buffer.push(&chunk(vec![1000; 8]));
        buffer.read_frame(8);
        // Gap
        assert!(matches!(buffer.read_frame(4), PlaybackFrame::Silence(_)));

        buffer.push(&chunk(vec![0; 4]));
        let PlaybackFrame::Audio(frame) = buffer.read_frame(4) else {
            panic!("expected audio");
        };
        // Blend from 1000 down toward the new samples
        assert_eq!(frame, vec![750, 500, 250, 0]);
    }

    #[test]
    fn test_no_crossfade_on_continuous_playback() {
        let buffer = PlaybackBuffer::new(64, 2);
        buffer.push(&chunk(vec![300; 8]));
        buffer.read_frame(4);
        assert_eq!(buffer.read_frame(4), PlaybackFrame::Audio(vec![300; 4]));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let buffer = PlaybackBuffer::new(64, 4);
        buffer.push(&chunk(vec![1; 32]));
        assert_eq!(buffer.clear(), 32);
        assert_eq!(buffer.clear(), 0);
        assert_eq!(buffer.fill_level(), 0);
        assert!(!buffer.is_stream_open());
        assert_eq!(buffer.read_frame(4), PlaybackFrame::Idle);
    }

    #[test]
    fn test_fill_level_bounded_under_concurrency() {
        let buffer = Arc::new(PlaybackBuffer::new(256, 8));

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..2000 {
                    buffer.push(&chunk(vec![i as i16; 37]));
                    assert!(buffer.fill_level() <= buffer.capacity());
                }
            })
        };
        let clearer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    buffer.clear();
                }
            })
        };
        for _ in 0..2000 {
            let _ = buffer.read_frame(32);
            assert!(buffer.fill_level() <= buffer.capacity());
        }

        producer.join().unwrap();
        clearer.join().unwrap();
        assert!(buffer.fill_level() <= buffer.capacity());
    }
}

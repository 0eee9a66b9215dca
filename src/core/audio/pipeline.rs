//! Capture and playback streams between the audio device and the network.
//!
//! The capture callback only enqueues; a forwarder task resamples each chunk
//! to the provider rate and hands it to the [`AudioUplink`]. Provider audio is
//! resampled to the sink rate and pushed into the [`PlaybackBuffer`]; a drain
//! task reads one frame per tick and passes it to [`AudioDevice::play`].
//! Neither the capture callback nor the drain ever waits on network I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::playback::{PlaybackBuffer, PlaybackFrame, PlaybackStats};
use super::resample::resample_chunk;
use super::{AudioChunk, AudioDevice, AudioDeviceInfo, AudioError, AudioErrorCallback};

/// Destination for captured audio, typically the network connection.
#[async_trait]
pub trait AudioUplink: Send + Sync {
    /// Forward one chunk upstream. Returns `false` if it could not be sent.
    async fn send_audio(&self, chunk: AudioChunk) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioPipelineConfig {
    /// Rate the provider sends and expects audio at
    pub provider_sample_rate: u32,
    /// Playback buffer capacity in milliseconds of sink-rate audio
    pub playback_capacity_ms: u32,
    /// Crossfade length in samples applied when playback resumes
    pub crossfade_samples: usize,
    /// Drain tick length
    pub frame_ms: u32,
    /// Queued capture chunks above which a back-pressure warning is logged
    pub capture_high_water: usize,
}

impl Default for AudioPipelineConfig {
    fn default() -> Self {
        Self {
            provider_sample_rate: 24000,
            playback_capacity_ms: 10_000,
            crossfade_samples: super::DEFAULT_CROSSFADE_SAMPLES,
            frame_ms: 20,
            capture_high_water: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub capture_chunks_forwarded: u64,
    pub capture_chunks_failed: u64,
    pub backpressure_warnings: u64,
    pub playback: PlaybackStats,
    pub playback_fill_level: usize,
    pub playback_capacity: usize,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    pending: AtomicUsize,
    forwarded: AtomicU64,
    failed: AtomicU64,
    backpressure_warnings: AtomicU64,
    above_high_water: AtomicBool,
}

struct RunningTasks {
    cancel: CancellationToken,
    forwarder: JoinHandle<()>,
    drain: JoinHandle<()>,
}

pub struct AudioPipeline {
    device: Arc<dyn AudioDevice>,
    config: AudioPipelineConfig,
    playback: Arc<PlaybackBuffer>,
    capture: Arc<CaptureCounters>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl AudioPipeline {
    pub fn new(device: Arc<dyn AudioDevice>, config: AudioPipelineConfig) -> Self {
        let playback = Arc::new(PlaybackBuffer::with_duration(
            config.playback_capacity_ms,
            device.playback_sample_rate(),
            config.crossfade_samples,
        ));
        Self {
            device,
            config,
            playback,
            capture: Arc::new(CaptureCounters::default()),
            tasks: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AudioPipelineConfig {
        &self.config
    }

    pub fn playback_buffer(&self) -> &Arc<PlaybackBuffer> {
        &self.playback
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Initialize the device and start both streams.
    ///
    /// Hardware faults raised later are reported through `on_error`; the
    /// affected stream halts but the other keeps running.
    pub fn start(
        &self,
        uplink: Arc<dyn AudioUplink>,
        on_error: AudioErrorCallback,
    ) -> Result<(), AudioError> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            debug!("Audio pipeline already running");
            return Ok(());
        }

        self.device.init()?;
        self.device.set_error_callback(on_error.clone());

        let (capture_tx, capture_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let counters = self.capture.clone();
        let high_water = self.config.capture_high_water;
        let on_chunk = Arc::new(move |chunk: AudioChunk| {
            let pending = counters.pending.fetch_add(1, Ordering::AcqRel) + 1;
            if pending > high_water {
                if !counters.above_high_water.swap(true, Ordering::AcqRel) {
                    counters.backpressure_warnings.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        pending,
                        high_water, "Network is not keeping up with capture, queueing audio"
                    );
                }
            } else {
                counters.above_high_water.store(false, Ordering::Release);
            }
            if capture_tx.send(chunk).is_err() {
                counters.pending.fetch_sub(1, Ordering::AcqRel);
            }
        });

        if !self.device.start_capture(on_chunk) {
            return Err(AudioError::Device("failed to start capture".to_string()));
        }

        let cancel = CancellationToken::new();
        let forwarder = tokio::spawn(forward_capture(
            capture_rx,
            uplink,
            self.capture.clone(),
            self.config.provider_sample_rate,
            cancel.clone(),
        ));
        let drain = tokio::spawn(drain_playback(
            self.device.clone(),
            self.playback.clone(),
            self.config.frame_ms,
            on_error,
            cancel.clone(),
        ));

        *tasks = Some(RunningTasks {
            cancel,
            forwarder,
            drain,
        });
        info!(
            capture_rate = self.device.capture_sample_rate(),
            sink_rate = self.device.playback_sample_rate(),
            provider_rate = self.config.provider_sample_rate,
            "Audio pipeline started"
        );
        Ok(())
    }

    /// Stop capture and both tasks. Buffered playback is discarded.
    pub async fn stop(&self) {
        let Some(tasks) = self.tasks.lock().take() else {
            return;
        };

        self.device.stop_capture();
        tasks.cancel.cancel();
        for (name, handle) in [("forwarder", tasks.forwarder), ("drain", tasks.drain)] {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(task = name, "Audio task panicked");
                }
            }
        }
        self.clear_playback();
        self.capture.pending.store(0, Ordering::Release);
        info!("Audio pipeline stopped");
    }

    /// Queue provider audio for playback. Returns `false` if it was dropped.
    pub fn enqueue_playback(&self, chunk: AudioChunk) -> bool {
        let chunk = resample_chunk(chunk, self.device.playback_sample_rate());
        self.playback.push(&chunk)
    }

    /// The current response has no more audio coming.
    pub fn end_playback_stream(&self) {
        self.playback.end_stream();
    }

    /// Silence output immediately: empty the ring buffer and the device's
    /// own queue. Returns the number of buffered samples discarded.
    pub fn clear_playback(&self) -> usize {
        let discarded = self.playback.clear();
        self.device.clear_playback_queue();
        discarded
    }

    pub fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        self.device.list_devices()
    }

    pub fn select_device(&self, id: &str) -> bool {
        self.device.select_device(id)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            capture_chunks_forwarded: self.capture.forwarded.load(Ordering::Relaxed),
            capture_chunks_failed: self.capture.failed.load(Ordering::Relaxed),
            backpressure_warnings: self.capture.backpressure_warnings.load(Ordering::Relaxed),
            playback: self.playback.stats(),
            playback_fill_level: self.playback.fill_level(),
            playback_capacity: self.playback.capacity(),
        }
    }
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn forward_capture(
    mut rx: mpsc::UnboundedReceiver<AudioChunk>,
    uplink: Arc<dyn AudioUplink>,
    counters: Arc<CaptureCounters>,
    provider_rate: u32,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };
        counters.pending.fetch_sub(1, Ordering::AcqRel);

        let chunk = resample_chunk(chunk, provider_rate);
        // A stalled link must not keep stop() waiting on this send.
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = uplink.send_audio(chunk) => sent,
        };
        if sent {
            counters.forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
    debug!("Capture forwarder exited");
}

async fn drain_playback(
    device: Arc<dyn AudioDevice>,
    playback: Arc<PlaybackBuffer>,
    frame_ms: u32,
    on_error: AudioErrorCallback,
    cancel: CancellationToken,
) {
    let sink_rate = device.playback_sample_rate();
    let frame_len = (sink_rate as usize * frame_ms as usize / 1000).max(1);
    let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms.max(1) as u64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let samples = match playback.read_frame(frame_len) {
            PlaybackFrame::Audio(samples) | PlaybackFrame::Silence(samples) => samples,
            PlaybackFrame::Idle => continue,
        };

        let chunk = AudioChunk::new(samples, sink_rate, sequence);
        sequence += 1;
        if !device.play(&chunk) {
            error!("Audio device rejected playback, halting playback");
            on_error(AudioError::Device("playback failed".to_string()));
            break;
        }
    }
    debug!("Playback drain exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{CaptureCallback, DeviceKind};

    #[derive(Default)]
    struct TestDevice {
        capture: Mutex<Option<CaptureCallback>>,
        played: Mutex<Vec<AudioChunk>>,
        clears: AtomicUsize,
        fail_play: AtomicBool,
    }

    impl TestDevice {
        fn emit(&self, chunk: AudioChunk) {
            let callback = self.capture.lock().clone();
            if let Some(callback) = callback {
                callback(chunk);
            }
        }
    }

    impl AudioDevice for TestDevice {
        fn init(&self) -> Result<(), AudioError> {
            Ok(())
        }
        fn start_capture(&self, on_chunk: CaptureCallback) -> bool {
            *self.capture.lock() = Some(on_chunk);
            true
        }
        fn stop_capture(&self) {
            self.capture.lock().take();
        }
        fn play(&self, chunk: &AudioChunk) -> bool {
            if self.fail_play.load(Ordering::SeqCst) {
                return false;
            }
            self.played.lock().push(chunk.clone());
            true
        }
        fn clear_playback_queue(&self) {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        fn list_devices(&self) -> Vec<AudioDeviceInfo> {
            vec![AudioDeviceInfo {
                id: "mic0".to_string(),
                name: "Test mic".to_string(),
                kind: DeviceKind::Input,
                is_default: true,
            }]
        }
        fn select_device(&self, id: &str) -> bool {
            id == "mic0"
        }
        fn capture_sample_rate(&self) -> u32 {
            48000
        }
        fn playback_sample_rate(&self) -> u32 {
            48000
        }
    }

    #[derive(Default)]
    struct CollectingUplink {
        sent: Mutex<Vec<AudioChunk>>,
    }

    #[async_trait]
    impl AudioUplink for CollectingUplink {
        async fn send_audio(&self, chunk: AudioChunk) -> bool {
            self.sent.lock().push(chunk);
            true
        }
    }

    fn no_errors() -> AudioErrorCallback {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_capture_is_resampled_and_forwarded() {
        let device = Arc::new(TestDevice::default());
        let pipeline = AudioPipeline::new(device.clone(), AudioPipelineConfig::default());
        let uplink = Arc::new(CollectingUplink::default());
        pipeline.start(uplink.clone(), no_errors()).unwrap();

        for seq in 0..3 {
            device.emit(AudioChunk::new(vec![100; 960], 48000, seq));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = uplink.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|c| c.sample_rate == 24000 && c.len() == 480));
        assert_eq!(pipeline.stats().capture_chunks_forwarded, 3);

        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_backpressure_warns_but_never_drops() {
        struct SlowUplink(Mutex<usize>);

        #[async_trait]
        impl AudioUplink for SlowUplink {
            async fn send_audio(&self, _chunk: AudioChunk) -> bool {
                tokio::time::sleep(Duration::from_millis(1)).await;
                *self.0.lock() += 1;
                true
            }
        }

        let device = Arc::new(TestDevice::default());
        let config = AudioPipelineConfig {
            capture_high_water: 4,
            ..Default::default()
        };
        let pipeline = AudioPipeline::new(device.clone(), config);
        let uplink = Arc::new(SlowUplink(Mutex::new(0)));
        pipeline.start(uplink.clone(), no_errors()).unwrap();

        for seq in 0..20 {
            device.emit(AudioChunk::new(vec![0; 240], 24000, seq));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(*uplink.0.lock(), 20);
        assert!(pipeline.stats().backpressure_warnings >= 1);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_on_stalled_uplink() {
        struct StalledUplink(AtomicUsize);

        #[async_trait]
        impl AudioUplink for StalledUplink {
            async fn send_audio(&self, _chunk: AudioChunk) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                std::future::pending().await
            }
        }

        let device = Arc::new(TestDevice::default());
        let pipeline = AudioPipeline::new(device.clone(), AudioPipelineConfig::default());
        let uplink = Arc::new(StalledUplink(AtomicUsize::new(0)));
        pipeline.start(uplink.clone(), no_errors()).unwrap();

        device.emit(AudioChunk::new(vec![0; 960], 48000, 0));
        for _ in 0..100 {
            if uplink.0.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(uplink.0.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(1), pipeline.stop())
            .await
            .unwrap();
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.stats().capture_chunks_forwarded, 0);
    }

    #[tokio::test]
    async fn test_playback_is_drained_to_device() {
        let device = Arc::new(TestDevice::default());
        let config = AudioPipelineConfig {
            crossfade_samples: 0,
            ..Default::default()
        };
        let pipeline = AudioPipeline::new(device.clone(), config);
        pipeline
            .start(Arc::new(CollectingUplink::default()), no_errors())
            .unwrap();

        // 24 kHz provider audio is upsampled to the 48 kHz sink
        assert!(pipeline.enqueue_playback(AudioChunk::new(vec![500; 480], 24000, 0)));
        assert_eq!(pipeline.playback_buffer().fill_level(), 960);
        pipeline.end_playback_stream();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let played: usize = device
            .played
            .lock()
            .iter()
            .flat_map(|c| c.samples.iter())
            .filter(|&&s| s == 500)
            .count();
        assert_eq!(played, 960);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_clear_playback_empties_buffer_and_device_queue() {
        let device = Arc::new(TestDevice::default());
        let pipeline = AudioPipeline::new(device.clone(), AudioPipelineConfig::default());

        pipeline.enqueue_playback(AudioChunk::new(vec![1; 4800], 48000, 0));
        assert_eq!(pipeline.clear_playback(), 4800);
        assert_eq!(pipeline.playback_buffer().fill_level(), 0);
        assert_eq!(device.clears.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.stats().playback.clears, 1);
    }

    #[tokio::test]
    async fn test_play_failure_is_reported() {
        let device = Arc::new(TestDevice::default());
        device.fail_play.store(true, Ordering::SeqCst);
        let pipeline = AudioPipeline::new(device.clone(), AudioPipelineConfig::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_error: AudioErrorCallback = Arc::new(move |e| {
            let _ = tx.send(e);
        });
        pipeline
            .start(Arc::new(CollectingUplink::default()), on_error)
            .unwrap();
        pipeline.enqueue_playback(AudioChunk::new(vec![1; 960], 48000, 0));

        let err = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, AudioError::Device(_)));
        pipeline.stop().await;
    }

    #[test]
    fn test_device_passthrough() {
        let device = Arc::new(TestDevice::default());
        let pipeline = AudioPipeline::new(device, AudioPipelineConfig::default());
        assert_eq!(pipeline.list_devices().len(), 1);
        assert!(pipeline.select_device("mic0"));
        assert!(!pipeline.select_device("mic9"));
    }
}

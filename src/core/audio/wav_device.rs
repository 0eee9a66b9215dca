//! File-backed audio device.
//!
//! Captures from a mono 16-bit WAV file in real-time-paced chunks and records
//! everything played into another WAV file. Used by the CLI host and tests
//! where no sound hardware is available.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{
    AudioChunk, AudioDevice, AudioDeviceInfo, AudioError, CaptureCallback, ChunkSequencer,
    DeviceKind,
};

const FILE_INPUT_ID: &str = "wav-file";
const SILENCE_INPUT_ID: &str = "silence";
const FILE_OUTPUT_ID: &str = "wav-recorder";

#[derive(Debug, Clone)]
pub struct WavFileDeviceConfig {
    /// WAV file to capture from; without one only the silence source exists
    pub input_path: Option<PathBuf>,
    /// WAV file receiving played audio
    pub output_path: Option<PathBuf>,
    /// Capture rate for the silence source
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub chunk_ms: u32,
    /// Pace capture at wall-clock speed
    pub realtime: bool,
}

impl Default for WavFileDeviceConfig {
    fn default() -> Self {
        Self {
            input_path: None,
            output_path: None,
            capture_sample_rate: 24000,
            playback_sample_rate: 24000,
            chunk_ms: 20,
            realtime: true,
        }
    }
}

type Recorder = WavWriter<BufWriter<File>>;

pub struct WavFileDevice {
    config: WavFileDeviceConfig,
    input: Mutex<Option<Arc<Vec<i16>>>>,
    input_rate: AtomicU32,
    selected: Mutex<String>,
    recorder: Mutex<Option<Recorder>>,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
    stop_flag: Arc<AtomicBool>,
    capture_done: Arc<AtomicBool>,
    capture_done_notify: Arc<Notify>,
    samples_recorded: AtomicU64,
}

impl WavFileDevice {
    pub fn new(config: WavFileDeviceConfig) -> Self {
        let selected = if config.input_path.is_some() {
            FILE_INPUT_ID
        } else {
            SILENCE_INPUT_ID
        };
        Self {
            input_rate: AtomicU32::new(config.capture_sample_rate),
            config,
            input: Mutex::new(None),
            selected: Mutex::new(selected.to_string()),
            recorder: Mutex::new(None),
            capture_thread: Mutex::new(None),
            stop_flag: Arc::new(AtomicBool::new(false)),
            capture_done: Arc::new(AtomicBool::new(false)),
            capture_done_notify: Arc::new(Notify::new()),
            samples_recorded: AtomicU64::new(0),
        }
    }

    /// Whether the input file has been fully delivered.
    pub fn is_capture_finished(&self) -> bool {
        self.capture_done.load(Ordering::Acquire)
    }

    /// Resolve once the input file has been fully delivered.
    pub async fn wait_capture_finished(&self) {
        loop {
            let notified = self.capture_done_notify.notified();
            if self.is_capture_finished() {
                return;
            }
            notified.await;
        }
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples_recorded.load(Ordering::Relaxed)
    }

    /// Flush and close the output file.
    pub fn finalize(&self) -> Result<(), AudioError> {
        if let Some(writer) = self.recorder.lock().take() {
            writer.finalize()?;
            info!(samples = self.samples_recorded(), "Playback recording finalized");
        }
        Ok(())
    }

    fn load_input(&self) -> Result<(), AudioError> {
        let Some(path) = &self.config.input_path else {
            return Ok(());
        };
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
        {
            return Err(AudioError::InvalidFormat(format!(
                "{} must be mono 16-bit PCM, got {} channel(s) at {} bits",
                path.display(),
                spec.channels,
                spec.bits_per_sample
            )));
        }
        let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
        debug!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate = spec.sample_rate,
            "Loaded capture file"
        );
        self.input_rate.store(spec.sample_rate, Ordering::Release);
        *self.input.lock() = Some(Arc::new(samples));
        Ok(())
    }

    fn open_recorder(&self) -> Result<(), AudioError> {
        let Some(path) = &self.config.output_path else {
            return Ok(());
        };
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.config.playback_sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        *self.recorder.lock() = Some(WavWriter::create(path, spec)?);
        Ok(())
    }
}

impl AudioDevice for WavFileDevice {
    fn init(&self) -> Result<(), AudioError> {
        if self.input.lock().is_none() {
            self.load_input()?;
        }
        if self.recorder.lock().is_none() {
            self.open_recorder()?;
        }
        Ok(())
    }

    fn start_capture(&self, on_chunk: CaptureCallback) -> bool {
        let mut slot = self.capture_thread.lock();
        if slot.is_some() {
            warn!("Capture already running");
            return false;
        }

        let source = if *self.selected.lock() == FILE_INPUT_ID {
            match self.input.lock().clone() {
                Some(samples) => Some(samples),
                None => {
                    warn!("Capture file not loaded, call init first");
                    return false;
                }
            }
        } else {
            None
        };

        let rate = self.capture_sample_rate();
        let chunk_len = (rate as usize * self.config.chunk_ms as usize / 1000).max(1);
        let pace = self
            .config
            .realtime
            .then(|| Duration::from_millis(self.config.chunk_ms as u64));
        let stop = self.stop_flag.clone();
        let done = self.capture_done.clone();
        let done_notify = self.capture_done_notify.clone();
        stop.store(false, Ordering::Release);
        done.store(false, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("wav-capture".to_string())
            .spawn(move || {
                let sequencer = ChunkSequencer::new();
                match source {
                    Some(samples) => {
                        for block in samples.chunks(chunk_len) {
                            if stop.load(Ordering::Acquire) {
                                return;
                            }
                            on_chunk(sequencer.chunk(block.to_vec(), rate));
                            if let Some(pace) = pace {
                                thread::sleep(pace);
                            }
                        }
                        done.store(true, Ordering::Release);
                        done_notify.notify_waiters();
                        debug!("Capture file exhausted");
                    }
                    None => {
                        let pace = pace.unwrap_or(Duration::from_millis(1));
                        while !stop.load(Ordering::Acquire) {
                            on_chunk(sequencer.chunk(vec![0; chunk_len], rate));
                            thread::sleep(pace);
                        }
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to spawn capture thread");
                false
            }
        }
    }

    fn stop_capture(&self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.capture_thread.lock().take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }

    fn play(&self, chunk: &AudioChunk) -> bool {
        let mut recorder = self.recorder.lock();
        let Some(writer) = recorder.as_mut() else {
            // Nothing to record into
            return true;
        };
        for &sample in &chunk.samples {
            if let Err(e) = writer.write_sample(sample) {
                warn!(error = %e, "Failed to record playback");
                return false;
            }
        }
        self.samples_recorded
            .fetch_add(chunk.samples.len() as u64, Ordering::Relaxed);
        true
    }

    fn clear_playback_queue(&self) {
        // Samples are written straight to disk; nothing is queued.
    }

    fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        let selected = self.selected.lock().clone();
        let mut devices = Vec::new();
        if let Some(path) = &self.config.input_path {
            devices.push(AudioDeviceInfo {
                id: FILE_INPUT_ID.to_string(),
                name: format!("WAV file ({})", path.display()),
                kind: DeviceKind::Input,
                is_default: selected == FILE_INPUT_ID,
            });
        }
        devices.push(AudioDeviceInfo {
            id: SILENCE_INPUT_ID.to_string(),
            name: "Silence generator".to_string(),
            kind: DeviceKind::Input,
            is_default: selected == SILENCE_INPUT_ID,
        });
        if let Some(path) = &self.config.output_path {
            devices.push(AudioDeviceInfo {
                id: FILE_OUTPUT_ID.to_string(),
                name: format!("WAV recorder ({})", path.display()),
                kind: DeviceKind::Output,
                is_default: true,
            });
        }
        devices
    }

    fn select_device(&self, id: &str) -> bool {
        let known = match id {
            FILE_INPUT_ID => self.config.input_path.is_some(),
            SILENCE_INPUT_ID => true,
            _ => false,
        };
        if known {
            *self.selected.lock() = id.to_string();
            info!(device = id, "Input device selected");
        }
        known
    }

    fn capture_sample_rate(&self) -> u32 {
        if *self.selected.lock() == FILE_INPUT_ID {
            self.input_rate.load(Ordering::Acquire)
        } else {
            self.config.capture_sample_rate
        }
    }

    fn playback_sample_rate(&self) -> u32 {
        self.config.playback_sample_rate
    }
}

impl Drop for WavFileDevice {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Err(e) = self.finalize() {
            warn!(error = %e, "Failed to finalize playback recording");
        }
    }
}

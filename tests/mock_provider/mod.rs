//! Mock realtime provider for integration tests
//!
//! A local WebSocket server speaking the OpenAI Realtime event protocol:
//! - Records every client event it receives
//! - Acknowledges `session.update` (or rejects it, or stays silent)
//! - Answers `response.cancel` according to [`CancelReply`]
//! - Lets tests push arbitrary server events to the connected client
//!
//! Also provides [`TestDevice`], an in-memory audio device.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use waav_voice::core::audio::{
    AudioChunk, AudioDevice, AudioDeviceInfo, AudioError, CaptureCallback, DeviceKind,
};

pub const MOCK_SESSION_ID: &str = "sess_mock";

/// How the mock answers `response.cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReply {
    /// `response.done` with status `cancelled` for the named response
    Done,
    /// An error event referencing the cancel's `event_id`
    Reject,
    Ignore,
}

/// How the mock answers `session.update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReply {
    Ack,
    Reject,
    Ignore,
}

#[derive(Debug, Clone, Copy)]
pub struct MockConfig {
    pub session_reply: SessionReply,
    pub cancel_reply: CancelReply,
    /// Stop reading the socket once the session is configured, without closing it
    pub stall_after_configure: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            session_reply: SessionReply::Ack,
            cancel_reply: CancelReply::Done,
            stall_after_configure: false,
        }
    }
}

struct MockState {
    config: MockConfig,
    received: Mutex<Vec<Value>>,
    received_notify: Notify,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected_notify: Notify,
    connections: AtomicUsize,
}

/// Handle to a running mock provider.
pub struct MockProvider {
    pub url: String,
    state: Arc<MockState>,
}

impl MockProvider {
    pub async fn start(config: MockConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            config,
            received: Mutex::new(Vec::new()),
            received_notify: Notify::new(),
            outbound: Mutex::new(None),
            connected_notify: Notify::new(),
            connections: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, state).await;
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            state,
        }
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Send a server event to the connected client.
    pub fn push(&self, event: Value) {
        let outbound = self.state.outbound.lock().clone();
        outbound
            .expect("no client connected")
            .send(Message::Text(event.to_string().into()))
            .expect("connection closed");
    }

    pub fn push_all(&self, events: impl IntoIterator<Item = Value>) {
        for event in events {
            self.push(event);
        }
    }

    /// Close the current connection from the server side.
    pub fn close_connection(&self) {
        if let Some(outbound) = self.state.outbound.lock().take() {
            let _ = outbound.send(Message::Close(None));
        }
    }

    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    pub fn received_of(&self, kind: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|e| e["type"] == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.received_of(kind).len()
    }

    /// Wait until at least `n` client events of `kind` have arrived.
    pub async fn wait_for(&self, kind: &str, n: usize) -> Vec<Value> {
        let wait = async {
            loop {
                let notified = self.state.received_notify.notified();
                let matching = self.received_of(kind);
                if matching.len() >= n {
                    return matching;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {n} '{kind}' event(s)"))
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *state.outbound.lock() = Some(tx.clone());
    state.connections.fetch_add(1, Ordering::SeqCst);
    state.connected_notify.notify_waiters();

    let created = json!({
        "type": "session.created",
        "event_id": "event_mock_0",
        "session": { "id": MOCK_SESSION_ID, "model": "gpt-realtime" }
    });
    tx.send(Message::Text(created.to_string().into()))?;

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    write.send(message).await?;
                    if closing {
                        break;
                    }
                }
                None => break,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let event: Value = serde_json::from_str(&text)?;
                    reply(&state.config, &event, &tx);
                    let configured = event["type"] == "session.update";
                    state.received.lock().push(event);
                    state.received_notify.notify_waiters();
                    if configured && state.config.stall_after_configure {
                        // Flush the ack, then hold the socket open without reading.
                        while let Ok(message) = rx.try_recv() {
                            write.send(message).await?;
                        }
                        std::future::pending::<()>().await;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    Ok(())
}

fn reply(config: &MockConfig, event: &Value, tx: &mpsc::UnboundedSender<Message>) {
    let response = match event["type"].as_str() {
        Some("session.update") => match config.session_reply {
            SessionReply::Ack => Some(json!({
                "type": "session.updated",
                "session": { "id": MOCK_SESSION_ID }
            })),
            SessionReply::Reject => Some(error_event(
                "invalid_request_error",
                "invalid_value",
                "Invalid value for 'voice'",
                event["event_id"].as_str(),
            )),
            SessionReply::Ignore => None,
        },
        Some("response.cancel") => match config.cancel_reply {
            CancelReply::Done => event["response_id"]
                .as_str()
                .map(|id| response_done(id, "cancelled")),
            CancelReply::Reject => Some(error_event(
                "invalid_request_error",
                "response_cancel_not_active",
                "Cancellation failed: no active response found",
                event["event_id"].as_str(),
            )),
            CancelReply::Ignore => None,
        },
        _ => None,
    };
    if let Some(response) = response {
        let _ = tx.send(Message::Text(response.to_string().into()));
    }
}

// =============================================================================
// Server event builders
// =============================================================================

pub fn error_event(error_type: &str, code: &str, message: &str, event_id: Option<&str>) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": error_type,
            "code": code,
            "message": message,
            "event_id": event_id,
        }
    })
}

pub fn response_created(response_id: &str) -> Value {
    json!({
        "type": "response.created",
        "response": { "id": response_id, "status": "in_progress" }
    })
}

pub fn response_done(response_id: &str, status: &str) -> Value {
    json!({
        "type": "response.done",
        "response": { "id": response_id, "status": status }
    })
}

pub fn audio_delta(response_id: &str, samples: Vec<i16>) -> Value {
    let chunk = AudioChunk::new(samples, 24000, 0);
    json!({
        "type": "response.output_audio.delta",
        "response_id": response_id,
        "delta": chunk.to_base64(),
    })
}

pub fn transcript_delta(response_id: &str, delta: &str) -> Value {
    json!({
        "type": "response.output_audio_transcript.delta",
        "response_id": response_id,
        "delta": delta,
    })
}

pub fn transcript_done(response_id: &str, transcript: &str) -> Value {
    json!({
        "type": "response.output_audio_transcript.done",
        "response_id": response_id,
        "transcript": transcript,
    })
}

pub fn text_done(response_id: &str, text: &str) -> Value {
    json!({
        "type": "response.output_text.done",
        "response_id": response_id,
        "text": text,
    })
}

pub fn user_transcript(item_id: &str, transcript: &str) -> Value {
    json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "item_id": item_id,
        "transcript": transcript,
    })
}

pub fn speech_started() -> Value {
    json!({
        "type": "input_audio_buffer.speech_started",
        "audio_start_ms": 1200,
        "item_id": "item_speech",
    })
}

pub fn function_call_added(response_id: &str, call_id: &str, name: &str) -> Value {
    json!({
        "type": "response.output_item.added",
        "response_id": response_id,
        "item": {
            "id": format!("item_{call_id}"),
            "type": "function_call",
            "call_id": call_id,
            "name": name,
        }
    })
}

pub fn arguments_delta(response_id: &str, call_id: &str, delta: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.delta",
        "response_id": response_id,
        "call_id": call_id,
        "delta": delta,
    })
}

pub fn arguments_done(response_id: &str, call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "type": "response.function_call_arguments.done",
        "response_id": response_id,
        "call_id": call_id,
        "name": name,
        "arguments": arguments,
    })
}

/// Samples of a client `input_audio_buffer.append` event.
pub fn appended_samples(event: &Value) -> Vec<i16> {
    let payload = event["audio"].as_str().unwrap();
    AudioChunk::from_base64(payload, 24000, 0).unwrap().samples
}

// =============================================================================
// Test audio device
// =============================================================================

/// In-memory audio device recording everything it is asked to play.
pub struct TestDevice {
    capture_rate: u32,
    playback_rate: u32,
    capture: Mutex<Option<CaptureCallback>>,
    played: Mutex<Vec<AudioChunk>>,
    selected: Mutex<String>,
    clears: AtomicUsize,
}

impl TestDevice {
    pub fn new(capture_rate: u32, playback_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            capture_rate,
            playback_rate,
            capture: Mutex::new(None),
            played: Mutex::new(Vec::new()),
            selected: Mutex::new("mic-0".to_string()),
            clears: AtomicUsize::new(0),
        })
    }

    /// Deliver a captured chunk as the hardware would.
    pub fn emit(&self, chunk: AudioChunk) {
        let callback = self.capture.lock().clone();
        if let Some(callback) = callback {
            callback(chunk);
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Non-silent samples handed to the sink so far.
    pub fn audible_samples(&self) -> usize {
        self.played
            .lock()
            .iter()
            .flat_map(|c| c.samples.iter())
            .filter(|s| **s != 0)
            .count()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn selected(&self) -> String {
        self.selected.lock().clone()
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
        self.played.lock().push(chunk.clone());
        true
    }

    fn clear_playback_queue(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        let selected = self.selected();
        let mut devices: Vec<AudioDeviceInfo> = ["mic-0", "mic-1"]
            .into_iter()
            .map(|id| AudioDeviceInfo {
                id: id.to_string(),
                name: format!("Test microphone {id}"),
                kind: DeviceKind::Input,
                is_default: id == selected,
            })
            .collect();
        devices.push(AudioDeviceInfo {
            id: "speaker-0".to_string(),
            name: "Test speaker".to_string(),
            kind: DeviceKind::Output,
            is_default: true,
        });
        devices
    }

    fn select_device(&self, id: &str) -> bool {
        if id.starts_with("mic-") && self.list_devices().iter().any(|d| d.id == id) {
            *self.selected.lock() = id.to_string();
            return true;
        }
        false
    }

    fn capture_sample_rate(&self) -> u32 {
        self.capture_rate
    }

    fn playback_sample_rate(&self) -> u32 {
        self.playback_rate
    }
}

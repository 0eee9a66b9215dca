//! OpenAI Realtime implementation of [`ProtocolAdapter`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use super::config::{
    OPENAI_AUDIO_FORMAT, OPENAI_REALTIME_SAMPLE_RATE, OpenAIAdapterConfig, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};
use super::messages::{
    ApiError, ClientEnvelope, ClientEvent, ConversationItem, InputAudioTranscription, MaxTokens,
    ServerEvent, SessionConfig, ToolDef, TurnDetection,
};
use crate::core::audio::{AudioChunk, resample_chunk};
use crate::core::history::ChatRole;
use crate::core::realtime::base::{RealtimeError, RealtimeResult, TurnDetectionConfig};
use crate::core::realtime::protocol::{
    ConnectRequest, EngineEvent, OutboundCommand, PendingToolCall, ProtocolAdapter,
    ProviderErrorKind,
};
use crate::core::session::Settings;

/// Cancel event ids remembered for error attribution
const MAX_TRACKED_CANCELS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TranscriptStream {
    Text,
    Audio,
}

#[derive(Debug, Default)]
struct DecodeState {
    session_id: Option<String>,
    /// Partial assistant output keyed by response and stream
    transcripts: HashMap<(String, TranscriptStream), String>,
    tool_calls: HashMap<String, PendingToolCall>,
    cancel_event_ids: VecDeque<String>,
    audio_sequence: u64,
}

/// Adapter for the OpenAI Realtime WebSocket protocol.
pub struct OpenAIAdapter {
    config: OpenAIAdapterConfig,
    state: Mutex<DecodeState>,
    next_event_id: AtomicU64,
}

impl OpenAIAdapter {
    pub fn new(config: OpenAIAdapterConfig) -> RealtimeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(DecodeState::default()),
            next_event_id: AtomicU64::new(1),
        })
    }

    /// Provider session id from the last `session.created`.
    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session_id.clone()
    }

    /// Tool calls still waiting for their arguments to complete.
    pub fn pending_tool_calls(&self) -> usize {
        self.state.lock().tool_calls.len()
    }

    fn build_session_config(settings: &Settings) -> SessionConfig {
        let voice = OpenAIRealtimeVoice::from_str_or_default(&settings.voice);
        if !voice.as_str().eq_ignore_ascii_case(&settings.voice) {
            warn!(requested = %settings.voice, using = %voice, "Unknown voice, using default");
        }

        let tools: Vec<ToolDef> = settings
            .tools
            .iter()
            .map(|t| ToolDef {
                tool_type: "function".to_string(),
                name: t.name.clone(),
                description: Some(t.description.clone()),
                parameters: t.parameters.clone(),
            })
            .collect();

        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: settings.instructions.clone(),
            voice: Some(voice.as_str().to_string()),
            input_audio_format: Some(OPENAI_AUDIO_FORMAT.to_string()),
            output_audio_format: Some(OPENAI_AUDIO_FORMAT.to_string()),
            input_audio_transcription: settings.input_audio_transcription.as_ref().map(|t| {
                InputAudioTranscription {
                    model: t.model.clone(),
                    language: t.language.clone(),
                }
            }),
            turn_detection: match &settings.turn_detection {
                TurnDetectionConfig::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                    create_response,
                    interrupt_response,
                } => Some(TurnDetection::ServerVad {
                    threshold: *threshold,
                    prefix_padding_ms: *prefix_padding_ms,
                    silence_duration_ms: *silence_duration_ms,
                    create_response: *create_response,
                    interrupt_response: *interrupt_response,
                }),
                TurnDetectionConfig::SemanticVad {
                    eagerness,
                    create_response,
                    interrupt_response,
                } => Some(TurnDetection::SemanticVad {
                    eagerness: eagerness.clone(),
                    create_response: *create_response,
                    interrupt_response: *interrupt_response,
                }),
                TurnDetectionConfig::None => None,
            },
            tool_choice: if tools.is_empty() {
                None
            } else {
                settings.tool_choice.clone().or_else(|| Some("auto".to_string()))
            },
            tools: (!tools.is_empty()).then_some(tools),
            temperature: settings.temperature,
            max_response_output_tokens: Some(MaxTokens::from_limit(
                settings.max_response_output_tokens,
            )),
        }
    }

    fn to_client_event(&self, command: &OutboundCommand) -> RealtimeResult<ClientEvent> {
        let event = match command {
            OutboundCommand::ConfigureSession(settings) => ClientEvent::SessionUpdate {
                session: Self::build_session_config(settings),
            },
            OutboundCommand::AppendAudio(chunk) => {
                let audio = if chunk.sample_rate == OPENAI_REALTIME_SAMPLE_RATE {
                    chunk.to_base64()
                } else {
                    resample_chunk(chunk.clone(), OPENAI_REALTIME_SAMPLE_RATE).to_base64()
                };
                ClientEvent::InputAudioBufferAppend { audio }
            }
            OutboundCommand::ToolResult(result) => ClientEvent::ConversationItemCreate {
                item: ConversationItem::function_output(&result.call_id, &result.output),
                previous_item_id: None,
            },
            OutboundCommand::CancelResponse { response_id } => ClientEvent::ResponseCancel {
                response_id: response_id.clone(),
            },
            OutboundCommand::CreateResponse => ClientEvent::ResponseCreate,
            OutboundCommand::CommitAudio => ClientEvent::InputAudioBufferCommit,
            OutboundCommand::UserText(text) => ClientEvent::ConversationItemCreate {
                item: ConversationItem::message("user", text.as_str()),
                previous_item_id: None,
            },
            OutboundCommand::HistoryItem(message) => {
                let role = match message.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => {
                        return Err(RealtimeError::SerializationError(
                            "tool messages cannot be replayed as conversation items".to_string(),
                        ));
                    }
                };
                ClientEvent::ConversationItemCreate {
                    item: ConversationItem::message(role, message.content.as_str()),
                    previous_item_id: None,
                }
            }
        };
        Ok(event)
    }

    fn classify_error(state: &DecodeState, error: &ApiError) -> ProviderErrorKind {
        let from_cancel = error
            .event_id
            .as_ref()
            .is_some_and(|id| state.cancel_event_ids.contains(id));
        if from_cancel {
            return ProviderErrorKind::CancelRejected;
        }
        match error.error_type.as_str() {
            "invalid_request_error" => ProviderErrorKind::InvalidRequest,
            "authentication_error" | "permission_error" => ProviderErrorKind::Authentication,
            "rate_limit_error" | "rate_limit_exceeded" => ProviderErrorKind::RateLimited,
            "server_error" => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Other,
        }
    }

    fn flush_transcript(
        state: &mut DecodeState,
        response_id: String,
        stream: TranscriptStream,
        final_text: String,
        events: &mut Vec<EngineEvent>,
    ) {
        let accumulated = state
            .transcripts
            .remove(&(response_id.clone(), stream))
            .unwrap_or_default();
        let text = if final_text.is_empty() {
            accumulated
        } else {
            if !accumulated.is_empty() && accumulated != final_text {
                debug!(
                    response_id = %response_id,
                    "Final transcript differs from accumulated deltas, using final"
                );
            }
            final_text
        };
        if !text.trim().is_empty() {
            events.push(EngineEvent::AssistantMessage { response_id, text });
        }
    }

    fn handle(&self, state: &mut DecodeState, event: ServerEvent, events: &mut Vec<EngineEvent>) {
        match event {
            ServerEvent::Error { error } => {
                let kind = Self::classify_error(state, &error);
                let code = error.code.clone().unwrap_or_else(|| error.error_type.clone());
                events.push(EngineEvent::ProviderError {
                    code,
                    message: error.message,
                    kind,
                });
            }
            ServerEvent::SessionCreated { session } => {
                debug!(session_id = %session.id, model = ?session.model, "OpenAI session created");
                state.session_id = Some(session.id.clone());
                events.push(EngineEvent::SessionCreated {
                    session_id: session.id,
                });
            }
            ServerEvent::SessionUpdated { .. } => events.push(EngineEvent::Configured),
            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                debug!(audio_start_ms, "Speech started");
                events.push(EngineEvent::SpeechStarted);
            }
            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                debug!(audio_end_ms, "Speech stopped");
                events.push(EngineEvent::SpeechStopped);
            }
            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                let text = transcript.trim();
                if !text.is_empty() {
                    events.push(EngineEvent::UserTranscript {
                        item_id,
                        text: text.to_string(),
                    });
                }
            }
            ServerEvent::TranscriptionFailed { item_id, error } => {
                warn!(item_id = %item_id, error = %error.message, "Input transcription failed");
            }
            ServerEvent::ResponseCreated { response } => {
                events.push(EngineEvent::ResponseStarted {
                    response_id: response.id,
                });
            }
            ServerEvent::ResponseDone { response } => {
                // Streams that never saw a done event still produce one message
                let leftovers: Vec<(String, TranscriptStream)> = state
                    .transcripts
                    .keys()
                    .filter(|(id, _)| *id == response.id)
                    .cloned()
                    .collect();
                for (response_id, stream) in leftovers {
                    Self::flush_transcript(state, response_id, stream, String::new(), events);
                }

                state.tool_calls.retain(|call_id, call| {
                    let orphaned = call.response_id.as_deref() == Some(response.id.as_str());
                    if orphaned {
                        warn!(call_id = %call_id, "Discarding tool call that never completed");
                    }
                    !orphaned
                });

                if let Some(usage) = &response.usage {
                    debug!(
                        response_id = %response.id,
                        total_tokens = usage.total_tokens,
                        "Response usage"
                    );
                }
                events.push(EngineEvent::ResponseDone {
                    response_id: response.id,
                    status: response.status,
                });
            }
            ServerEvent::OutputItemAdded { response_id, item } => {
                if item.item_type == "function_call" {
                    if let Some(call_id) = item.call_id {
                        let call = state
                            .tool_calls
                            .entry(call_id.clone())
                            .or_insert_with(|| PendingToolCall::new(call_id, ""));
                        if let Some(name) = item.name {
                            call.name = name;
                        }
                        call.response_id = Some(response_id);
                    }
                }
            }
            ServerEvent::TextDelta { response_id, delta } => {
                state
                    .transcripts
                    .entry((response_id, TranscriptStream::Text))
                    .or_default()
                    .push_str(&delta);
            }
            ServerEvent::TextDone { response_id, text } => {
                Self::flush_transcript(state, response_id, TranscriptStream::Text, text, events);
            }
            ServerEvent::AudioTranscriptDelta { response_id, delta } => {
                state
                    .transcripts
                    .entry((response_id, TranscriptStream::Audio))
                    .or_default()
                    .push_str(&delta);
            }
            ServerEvent::AudioTranscriptDone {
                response_id,
                transcript,
            } => {
                Self::flush_transcript(
                    state,
                    response_id,
                    TranscriptStream::Audio,
                    transcript,
                    events,
                );
            }
            ServerEvent::AudioDelta { response_id, delta } => {
                let sequence = state.audio_sequence;
                match AudioChunk::from_base64(&delta, OPENAI_REALTIME_SAMPLE_RATE, sequence) {
                    Ok(chunk) => {
                        state.audio_sequence += 1;
                        events.push(EngineEvent::AudioDelta { response_id, chunk });
                    }
                    Err(e) => warn!(response_id = %response_id, error = %e, "Skipping bad audio delta"),
                }
            }
            ServerEvent::AudioDone { response_id } => {
                events.push(EngineEvent::AudioDone { response_id });
            }
            ServerEvent::FunctionCallArgumentsDelta {
                response_id,
                call_id,
                delta,
            } => {
                let call = state
                    .tool_calls
                    .entry(call_id.clone())
                    .or_insert_with(|| PendingToolCall::new(call_id, ""));
                call.push_fragment(&delta);
                if call.response_id.is_none() {
                    call.response_id = response_id;
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                response_id,
                call_id,
                name,
                arguments,
            } => {
                let mut call = state
                    .tool_calls
                    .remove(&call_id)
                    .unwrap_or_else(|| PendingToolCall::new(call_id.clone(), ""));
                if let Some(name) = name {
                    call.name = name;
                }
                if call.response_id.is_none() {
                    call.response_id = response_id;
                }
                call.complete(Some(arguments));
                if call.name.is_empty() {
                    warn!(call_id = %call_id, "Tool call completed without a tool name");
                }
                debug!(
                    call_id = %call_id,
                    tool = %call.name,
                    fragments = call.fragments,
                    "Tool call arguments complete"
                );
                events.push(EngineEvent::ToolCallReady(call));
            }
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in rate_limits {
                    trace!(name = %limit.name, remaining = limit.remaining, "Rate limit");
                }
            }
            ServerEvent::Unknown => {}
        }
    }
}

impl ProtocolAdapter for OpenAIAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn connect_request(&self) -> RealtimeResult<ConnectRequest> {
        let mut headers = vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.config.api_key),
        )];
        if self.config.uses_beta_protocol() {
            headers.push(("OpenAI-Beta".to_string(), "realtime=v1".to_string()));
        }
        Ok(ConnectRequest {
            url: self.config.ws_url(),
            headers,
        })
    }

    fn input_sample_rate(&self) -> u32 {
        OPENAI_REALTIME_SAMPLE_RATE
    }

    fn decode(&self, raw: &str) -> Vec<EngineEvent> {
        let event = match serde_json::from_str::<ServerEvent>(raw) {
            Ok(event) => event,
            Err(e) => {
                let kind = serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string));
                warn!(kind = ?kind, error = %e, "Skipping malformed server event");
                return Vec::new();
            }
        };
        if matches!(event, ServerEvent::Unknown) {
            trace!("Ignoring unhandled server event kind");
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut state = self.state.lock();
        self.handle(&mut state, event, &mut events);
        events
    }

    fn encode(&self, command: &OutboundCommand) -> RealtimeResult<String> {
        let event = self.to_client_event(command)?;
        let event_id = format!(
            "evt_waav_{}",
            self.next_event_id.fetch_add(1, Ordering::Relaxed)
        );

        if matches!(event, ClientEvent::ResponseCancel { .. }) {
            let mut state = self.state.lock();
            state.cancel_event_ids.push_back(event_id.clone());
            if state.cancel_event_ids.len() > MAX_TRACKED_CANCELS {
                state.cancel_event_ids.pop_front();
            }
        }

        serde_json::to_string(&ClientEnvelope {
            event_id,
            event: &event,
        })
        .map_err(|e| RealtimeError::SerializationError(e.to_string()))
    }

    fn reset(&self) {
        *self.state.lock() = DecodeState::default();
    }

    fn provider_info(&self) -> Value {
        json!({
            "provider": "openai",
            "name": "OpenAI Realtime",
            "model": self.config.model,
            "models": OpenAIRealtimeModel::all().iter().map(|m| m.as_str()).collect::<Vec<_>>(),
            "voices": OpenAIRealtimeVoice::all().iter().map(|v| v.as_str()).collect::<Vec<_>>(),
            "audio_format": OPENAI_AUDIO_FORMAT,
            "sample_rate": OPENAI_REALTIME_SAMPLE_RATE,
            "features": [
                "audio_streaming",
                "input_transcription",
                "server_vad",
                "semantic_vad",
                "function_calling",
                "response_cancel",
            ],
        })
    }
}

impl std::fmt::Debug for OpenAIAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Provider-neutral protocol surface.
//!
//! A [`ProtocolAdapter`] turns raw provider messages into [`EngineEvent`]s and
//! [`OutboundCommand`]s into provider messages. The session layer only ever
//! sees these neutral types, so adding a backend means adding an adapter.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::base::RealtimeResult;
use crate::core::audio::AudioChunk;
use crate::core::history::ChatMessage;
use crate::core::session::Settings;
use crate::core::tools::ToolResult;

/// Lifecycle of a tool call requested by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    /// Argument fragments are still arriving
    Accumulating,
    /// All arguments received
    Complete,
    /// Handed to the tool invoker
    Dispatched,
    /// A result has been produced
    Resolved,
}

impl fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallState::Accumulating => write!(f, "accumulating"),
            ToolCallState::Complete => write!(f, "complete"),
            ToolCallState::Dispatched => write!(f, "dispatched"),
            ToolCallState::Resolved => write!(f, "resolved"),
        }
    }
}

/// A tool call whose arguments may arrive in several fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub call_id: String,
    /// Tool name; may be learned after the first fragment
    pub name: String,
    /// Concatenated argument fragments
    pub arguments: String,
    pub fragments: usize,
    pub response_id: Option<String>,
    pub state: ToolCallState,
}

impl PendingToolCall {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: String::new(),
            fragments: 0,
            response_id: None,
            state: ToolCallState::Accumulating,
        }
    }

    pub fn push_fragment(&mut self, fragment: &str) {
        self.arguments.push_str(fragment);
        self.fragments += 1;
    }

    /// Mark the arguments complete. When the provider repeats the full
    /// argument string on completion it replaces the accumulated fragments.
    pub fn complete(&mut self, final_arguments: Option<String>) {
        if let Some(arguments) = final_arguments.filter(|a| !a.is_empty()) {
            self.arguments = arguments;
        }
        self.state = ToolCallState::Complete;
    }
}

/// Broad class of a provider-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The provider rejected a cancel command the engine sent
    CancelRejected,
    InvalidRequest,
    Authentication,
    RateLimited,
    Server,
    Other,
}

/// Events the session layer reacts to, independent of the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Provider opened a session
    SessionCreated { session_id: String },
    /// Provider acknowledged the session configuration
    Configured,
    ResponseStarted { response_id: String },
    ResponseDone { response_id: String, status: String },
    /// Finalized assistant text or audio transcript for a response
    AssistantMessage { response_id: String, text: String },
    /// Finalized transcription of user speech
    UserTranscript { item_id: String, text: String },
    AudioDelta { response_id: String, chunk: AudioChunk },
    AudioDone { response_id: String },
    /// A tool call with complete arguments
    ToolCallReady(PendingToolCall),
    /// User started talking
    SpeechStarted,
    SpeechStopped,
    ProviderError {
        code: String,
        message: String,
        kind: ProviderErrorKind,
    },
    /// Transport closed without a local request
    ConnectionLost { reason: String },
}

impl EngineEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::SessionCreated { .. } => "session_created",
            EngineEvent::Configured => "configured",
            EngineEvent::ResponseStarted { .. } => "response_started",
            EngineEvent::ResponseDone { .. } => "response_done",
            EngineEvent::AssistantMessage { .. } => "assistant_message",
            EngineEvent::UserTranscript { .. } => "user_transcript",
            EngineEvent::AudioDelta { .. } => "audio_delta",
            EngineEvent::AudioDone { .. } => "audio_done",
            EngineEvent::ToolCallReady(_) => "tool_call_ready",
            EngineEvent::SpeechStarted => "speech_started",
            EngineEvent::SpeechStopped => "speech_stopped",
            EngineEvent::ProviderError { .. } => "provider_error",
            EngineEvent::ConnectionLost { .. } => "connection_lost",
        }
    }
}

/// Commands the session layer sends, encoded per provider.
#[derive(Debug, Clone)]
pub enum OutboundCommand {
    ConfigureSession(Arc<Settings>),
    AppendAudio(AudioChunk),
    ToolResult(ToolResult),
    /// Cancel the in-flight response
    CancelResponse { response_id: Option<String> },
    /// Ask the provider to generate a response
    CreateResponse,
    /// Commit buffered input audio as a user turn
    CommitAudio,
    /// Add a typed user message to the conversation
    UserText(String),
    /// Replay a prior conversation turn into a new provider session
    HistoryItem(Arc<ChatMessage>),
}

impl OutboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::ConfigureSession(_) => "configure_session",
            OutboundCommand::AppendAudio(_) => "append_audio",
            OutboundCommand::ToolResult(_) => "tool_result",
            OutboundCommand::CancelResponse { .. } => "cancel_response",
            OutboundCommand::CreateResponse => "create_response",
            OutboundCommand::CommitAudio => "commit_audio",
            OutboundCommand::UserText(_) => "user_text",
            OutboundCommand::HistoryItem(_) => "history_item",
        }
    }
}

/// Where and how to open the provider connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values carry credentials
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("headers", &names)
            .finish()
    }
}

/// Vendor-specific translation between wire messages and engine types.
///
/// Adapters are shared between the connection's receive task (decode) and
/// the session (encode), so they keep any per-connection state behind
/// interior locks.
pub trait ProtocolAdapter: Send + Sync {
    /// Provider identifier, e.g. `"openai"`.
    fn name(&self) -> &'static str;

    fn connect_request(&self) -> RealtimeResult<ConnectRequest>;

    /// Sample rate the provider expects for input audio.
    fn input_sample_rate(&self) -> u32;

    /// Translate one inbound text frame. Unknown or malformed messages yield
    /// no events; this never fails.
    fn decode(&self, raw: &str) -> Vec<EngineEvent>;

    /// Translate one command into a text frame.
    fn encode(&self, command: &OutboundCommand) -> RealtimeResult<String>;

    /// Drop per-connection state (partial transcripts, pending tool calls).
    fn reset(&self);

    /// Static description of the provider and its capabilities.
    fn provider_info(&self) -> Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_call_accumulates_fragments() {
        let mut call = PendingToolCall::new("call_1", "get_weather");
        for fragment in [r#"{"loc"#, r#"ation":"Pa"#, r#"ris"}"#] {
            call.push_fragment(fragment);
        }
        assert_eq!(call.fragments, 3);
        assert_eq!(call.state, ToolCallState::Accumulating);

        call.complete(None);
        assert_eq!(call.arguments, r#"{"location":"Paris"}"#);
        assert_eq!(call.state, ToolCallState::Complete);
    }

    #[test]
    fn test_final_arguments_override_fragments() {
        let mut call = PendingToolCall::new("call_1", "get_weather");
        call.push_fragment(r#"{"location":"Pa"#);
        call.complete(Some(r#"{"location":"Paris"}"#.to_string()));
        assert_eq!(call.arguments, r#"{"location":"Paris"}"#);

        let mut call = PendingToolCall::new("call_2", "get_weather");
        call.push_fragment(r#"{"a":1}"#);
        call.complete(Some(String::new()));
        assert_eq!(call.arguments, r#"{"a":1}"#);
    }

    #[test]
    fn test_connect_request_debug_hides_header_values() {
        let request = ConnectRequest {
            url: "wss://example.test".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer sk-secret".to_string())],
        };
        let debug = format!("{request:?}");
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("sk-secret"));
    }
}

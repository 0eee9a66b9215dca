//! OpenAI Realtime API adapter.
//!
//! Translates between the OpenAI Realtime WebSocket protocol and the
//! engine-neutral types in [`crate::core::realtime::protocol`].
//!
//! # Supported Models
//!
//! - `gpt-realtime` - GA model (default)
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! Preview models are spoken to with the `OpenAI-Beta: realtime=v1` header.
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz,
//! base64-encoded inside JSON events.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_voice::core::realtime::openai::{OpenAIAdapter, OpenAIAdapterConfig};
//!
//! let adapter = OpenAIAdapter::new(
//!     OpenAIAdapterConfig::new("sk-...").with_model("gpt-realtime"),
//! )?;
//! let request = adapter.connect_request()?;
//! ```

mod adapter;
mod config;
mod messages;

pub use adapter::OpenAIAdapter;
pub use config::{
    OPENAI_AUDIO_FORMAT, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIAdapterConfig,
    OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{ClientEvent, ConversationItem, ServerEvent, SessionConfig, TurnDetection};

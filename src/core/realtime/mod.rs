//! Realtime provider plumbing.
//!
//! This module holds everything between the session and the wire:
//!
//! - [`protocol`]: the provider-neutral [`ProtocolAdapter`] trait with the
//!   [`EngineEvent`] and [`OutboundCommand`] types it translates
//! - [`connection`]: the [`ConnectionManager`] owning the WebSocket
//! - [`backoff`]: retry delays for connection attempts
//! - [`openai`]: the OpenAI Realtime adapter
//!
//! # Audio Format
//!
//! - OpenAI: PCM 16-bit signed little-endian at 24kHz
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_voice::core::realtime::{ConnectionManager, create_adapter};
//! use tokio_util::sync::CancellationToken;
//!
//! let adapter = create_adapter("openai", "sk-...", None, None)?;
//! let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let connection = ConnectionManager::default();
//! connection.connect(adapter.clone(), events_tx, &CancellationToken::new()).await?;
//! ```

pub mod backoff;
mod base;
pub mod connection;
pub mod openai;
pub mod protocol;

use std::sync::Arc;

pub use backoff::Backoff;
pub use base::{
    BackoffConfig, ConnectionState, InputTranscriptionConfig, RealtimeError, RealtimeResult,
    TurnDetectionConfig,
};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use openai::{OpenAIAdapter, OpenAIAdapterConfig};
pub use protocol::{
    ConnectRequest, EngineEvent, OutboundCommand, PendingToolCall, ProtocolAdapter,
    ProviderErrorKind, ToolCallState,
};

/// Supported realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeProvider {
    /// OpenAI Realtime API
    OpenAI,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" | "openai-realtime" | "openai_realtime" => Some(RealtimeProvider::OpenAI),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Factory function to create a protocol adapter.
///
/// `model` and `url` fall back to the provider defaults when `None`.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI Realtime API
pub fn create_adapter(
    provider_type: &str,
    api_key: &str,
    model: Option<&str>,
    url: Option<&str>,
) -> RealtimeResult<Arc<dyn ProtocolAdapter>> {
    let provider = RealtimeProvider::parse(provider_type).ok_or_else(|| {
        RealtimeError::InvalidConfiguration(format!(
            "unsupported realtime provider '{provider_type}', expected one of: {}",
            get_supported_realtime_providers().join(", ")
        ))
    })?;
    create_adapter_from_enum(provider, api_key, model, url)
}

/// Create a protocol adapter from enum.
pub fn create_adapter_from_enum(
    provider: RealtimeProvider,
    api_key: &str,
    model: Option<&str>,
    url: Option<&str>,
) -> RealtimeResult<Arc<dyn ProtocolAdapter>> {
    match provider {
        RealtimeProvider::OpenAI => {
            let mut config = OpenAIAdapterConfig::new(api_key);
            if let Some(model) = model {
                config = config.with_model(model);
            }
            if let Some(url) = url {
                config = config.with_url(url);
            }
            Ok(Arc::new(OpenAIAdapter::new(config)?))
        }
    }
}

/// Get list of supported realtime providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai"]
}

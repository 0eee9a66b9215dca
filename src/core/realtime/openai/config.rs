//! OpenAI Realtime API configuration types.
//!
//! This module contains configuration types for OpenAI's Realtime API:
//! - Endpoint and credentials
//! - Model selection
//! - Voice selection

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Audio sample rate used for `pcm16` in both directions.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Wire audio format sent in the session configuration.
pub const OPENAI_AUDIO_FORMAT: &str = "pcm16";

// =============================================================================
// Models
// =============================================================================

/// Supported OpenAI Realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenAIRealtimeModel {
    /// GA realtime model
    #[default]
    #[serde(rename = "gpt-realtime")]
    GptRealtime,
    /// GPT-4o Realtime Preview model
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// GPT-4o Mini Realtime Preview
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl OpenAIRealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GptRealtime => "gpt-realtime",
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parse a known model name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gpt-realtime" => Some(Self::GptRealtime),
            "gpt-4o-realtime-preview" => Some(Self::Gpt4oRealtimePreview),
            "gpt-4o-realtime-preview-2024-12-17" => Some(Self::Gpt4oRealtimePreview20241217),
            "gpt-4o-mini-realtime-preview" => Some(Self::Gpt4oMiniRealtimePreview),
            _ => None,
        }
    }

    /// Preview models require the `OpenAI-Beta: realtime=v1` header.
    pub fn is_preview(&self) -> bool {
        !matches!(self, Self::GptRealtime)
    }

    pub fn all() -> &'static [OpenAIRealtimeModel] {
        &[
            Self::GptRealtime,
            Self::Gpt4oRealtimePreview,
            Self::Gpt4oRealtimePreview20241217,
            Self::Gpt4oMiniRealtimePreview,
        ]
    }
}

impl fmt::Display for OpenAIRealtimeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Available voices for the OpenAI Realtime API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAIRealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Cedar,
    Coral,
    Echo,
    Marin,
    Sage,
    Shimmer,
    Verse,
}

impl OpenAIRealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Cedar => "cedar",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Marin => "marin",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::all()
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .unwrap_or_default()
    }

    /// Get all available voices.
    pub fn all() -> &'static [OpenAIRealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Cedar,
            Self::Coral,
            Self::Echo,
            Self::Marin,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl fmt::Display for OpenAIRealtimeVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Adapter configuration
// =============================================================================

/// Connection parameters for the OpenAI adapter.
#[derive(Clone)]
pub struct OpenAIAdapterConfig {
    pub api_key: String,
    pub model: String,
    /// Endpoint override, e.g. a local mock server
    pub url: Option<String>,
}

impl OpenAIAdapterConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: OpenAIRealtimeModel::default().as_str().to_string(),
            url: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Full WebSocket URL including the model query parameter.
    pub fn ws_url(&self) -> String {
        let base = self.url.as_deref().unwrap_or(OPENAI_REALTIME_URL);
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}model={}", self.model)
    }

    /// Whether the beta protocol header should be sent. Unknown models are
    /// treated as preview models.
    pub fn uses_beta_protocol(&self) -> bool {
        OpenAIRealtimeModel::parse(&self.model).is_none_or(|m| m.is_preview())
    }

    pub fn validate(&self) -> RealtimeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "OpenAI API key is required".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "model must not be empty".to_string(),
            ));
        }
        if let Some(url) = &self.url {
            let parsed = url::Url::parse(url).map_err(|e| {
                RealtimeError::InvalidConfiguration(format!("invalid realtime URL '{url}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "realtime URL must use ws:// or wss://, got {}",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for OpenAIAdapterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIAdapterConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("url", &self.url)
            .finish()
    }
}

impl Drop for OpenAIAdapterConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

// =============================================================================
// Tests
// =============================================================================

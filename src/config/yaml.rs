use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use crate::core::realtime::{BackoffConfig, TurnDetectionConfig};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything left out
/// keeps the value from the environment or the default.
///
/// # Example YAML structure
/// ```yaml
/// provider:
///   name: "openai"
///   api_key: "sk-..."
///   model: "gpt-realtime"
///   url: "wss://api.openai.com/v1/realtime"
///
/// audio:
///   sink_sample_rate: 48000
///   capture_sample_rate: 24000
///   playback_capacity_ms: 10000
///   crossfade_samples: 240
///   frame_ms: 20
///   capture_high_water: 50
///
/// connection:
///   connect_timeout_ms: 10000
///   disconnect_timeout_ms: 2000
///   backoff:
///     initial_delay_ms: 500
///     max_delay_ms: 5000
///     max_attempts: 5
///
/// session:
///   configure_timeout_ms: 10000
///   interrupt_ack_timeout_ms: 2000
///   replay_history: false
///   instructions: "You are a helpful assistant."
///   voice: "alloy"
///   temperature: 0.8
///   turn_detection:
///     type: server_vad
///     threshold: 0.5
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub provider: Option<ProviderYaml>,
    pub audio: Option<AudioYaml>,
    pub connection: Option<ConnectionYaml>,
    pub session: Option<SessionYaml>,
}

/// Provider selection and credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderYaml {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub url: Option<String>,
}

/// Audio pipeline settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sink_sample_rate: Option<u32>,
    pub capture_sample_rate: Option<u32>,
    pub playback_capacity_ms: Option<u32>,
    pub crossfade_samples: Option<usize>,
    pub frame_ms: Option<u32>,
    pub capture_high_water: Option<usize>,
}

/// Connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub connect_timeout_ms: Option<u64>,
    pub disconnect_timeout_ms: Option<u64>,
    /// Partial backoff tables fill in from the defaults
    pub backoff: Option<BackoffConfig>,
}

/// Session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub configure_timeout_ms: Option<u64>,
    pub interrupt_ack_timeout_ms: Option<u64>,
    pub replay_history: Option<bool>,
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub temperature: Option<f32>,
    pub max_response_output_tokens: Option<u32>,
    pub tool_timeout_ms: Option<u64>,
    pub turn_detection: Option<TurnDetectionConfig>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_str(&contents)
    }

    /// Parse YAML configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Yaml(e.to_string()))
    }
}

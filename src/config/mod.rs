//! Configuration for the voice engine
//!
//! Configuration comes from .env files, environment variables and YAML files.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: `WAAV_VOICE_*` environment variable loading
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use waav_voice::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = EngineConfig::from_file(&PathBuf::from("voice.yaml"))?;
//! let adapter = config.create_adapter()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

mod env;
mod yaml;

pub use env::ENV_PREFIX;
pub use yaml::YamlConfig;

use crate::core::audio::{AudioPipelineConfig, DEFAULT_CROSSFADE_SAMPLES, WavFileDeviceConfig};
use crate::core::realtime::{
    BackoffConfig, ConnectionConfig, ProtocolAdapter, RealtimeProvider, create_adapter,
    get_supported_realtime_providers,
};
use crate::core::session::{OrchestratorConfig, Settings};

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid YAML configuration: {0}")]
    Yaml(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No API key configured; set WAAV_VOICE_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration
///
/// Holds everything needed to build a [`SessionOrchestrator`](crate::SessionOrchestrator):
/// - Provider selection and credentials
/// - Audio rates and buffer sizing
/// - Connection retry and timeouts
/// - Session timeouts and default [`Settings`]
#[derive(Clone)]
pub struct EngineConfig {
    // Provider
    pub provider: String,
    pub api_key: Option<String>,
    /// Model override; the provider default when `None`
    pub model: Option<String>,
    /// Endpoint override, e.g. a local mock or proxy
    pub url: Option<String>,

    // Audio
    /// Rate the playback sink consumes
    /// Default: 24000
    pub sink_sample_rate: u32,
    /// Rate the capture source produces
    /// Default: 24000
    pub capture_sample_rate: u32,
    /// Default: 10000
    pub playback_capacity_ms: u32,
    pub crossfade_samples: usize,
    /// Default: 20
    pub frame_ms: u32,
    /// Default: 50
    pub capture_high_water: usize,

    // Connection
    pub backoff: BackoffConfig,
    /// Default: 10000
    pub connect_timeout_ms: u64,
    /// Default: 2000
    pub disconnect_timeout_ms: u64,

    // Session
    /// Default: 10000
    pub configure_timeout_ms: u64,
    /// Default: 2000
    pub interrupt_ack_timeout_ms: u64,
    /// Default: false
    pub replay_history: bool,
    /// Settings used for sessions started from this configuration
    pub settings: Settings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            model: None,
            url: None,
            sink_sample_rate: 24000,
            capture_sample_rate: 24000,
            playback_capacity_ms: 10_000,
            crossfade_samples: DEFAULT_CROSSFADE_SAMPLES,
            frame_ms: 20,
            capture_high_water: 50,
            backoff: BackoffConfig::default(),
            connect_timeout_ms: 10_000,
            disconnect_timeout_ms: 2_000,
            configure_timeout_ms: 10_000,
            interrupt_ack_timeout_ms: 2_000,
            replay_history: false,
            settings: Settings::default(),
        }
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for EngineConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.api_key {
            key.zeroize();
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("url", &self.url)
            .field("sink_sample_rate", &self.sink_sample_rate)
            .field("capture_sample_rate", &self.capture_sample_rate)
            .field("playback_capacity_ms", &self.playback_capacity_ms)
            .field("crossfade_samples", &self.crossfade_samples)
            .field("frame_ms", &self.frame_ms)
            .field("capture_high_water", &self.capture_high_water)
            .field("backoff", &self.backoff)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("disconnect_timeout_ms", &self.disconnect_timeout_ms)
            .field("configure_timeout_ms", &self.configure_timeout_ms)
            .field("interrupt_ack_timeout_ms", &self.interrupt_ack_timeout_ms)
            .field("replay_history", &self.replay_history)
            .field("settings", &self.settings)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables over the defaults
    ///
    /// The `.env` file is loaded by the binary at startup, so its values
    /// are already visible here as environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    /// Overlay YAML values onto this configuration.
    pub fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(provider) = yaml.provider {
            if let Some(name) = provider.name {
                self.provider = name;
            }
            if let Some(key) = provider.api_key {
                self.api_key = Some(key);
            }
            if provider.model.is_some() {
                self.model = provider.model;
            }
            if provider.url.is_some() {
                self.url = provider.url;
            }
        }

        if let Some(audio) = yaml.audio {
            self.sink_sample_rate = audio.sink_sample_rate.unwrap_or(self.sink_sample_rate);
            self.capture_sample_rate = audio
                .capture_sample_rate
                .unwrap_or(self.capture_sample_rate);
            self.playback_capacity_ms = audio
                .playback_capacity_ms
                .unwrap_or(self.playback_capacity_ms);
            self.crossfade_samples = audio.crossfade_samples.unwrap_or(self.crossfade_samples);
            self.frame_ms = audio.frame_ms.unwrap_or(self.frame_ms);
            self.capture_high_water = audio.capture_high_water.unwrap_or(self.capture_high_water);
        }

        if let Some(connection) = yaml.connection {
            if let Some(backoff) = connection.backoff {
                self.backoff = backoff;
            }
            self.connect_timeout_ms = connection
                .connect_timeout_ms
                .unwrap_or(self.connect_timeout_ms);
            self.disconnect_timeout_ms = connection
                .disconnect_timeout_ms
                .unwrap_or(self.disconnect_timeout_ms);
        }

        if let Some(session) = yaml.session {
            self.configure_timeout_ms = session
                .configure_timeout_ms
                .unwrap_or(self.configure_timeout_ms);
            self.interrupt_ack_timeout_ms = session
                .interrupt_ack_timeout_ms
                .unwrap_or(self.interrupt_ack_timeout_ms);
            self.replay_history = session.replay_history.unwrap_or(self.replay_history);

            let settings = &mut self.settings;
            if session.instructions.is_some() {
                settings.instructions = session.instructions;
            }
            if let Some(voice) = session.voice {
                settings.voice = voice;
            }
            if session.temperature.is_some() {
                settings.temperature = session.temperature;
            }
            if session.max_response_output_tokens.is_some() {
                settings.max_response_output_tokens = session.max_response_output_tokens;
            }
            if session.tool_timeout_ms.is_some() {
                settings.tool_timeout_ms = session.tool_timeout_ms;
            }
            if let Some(turn_detection) = session.turn_detection {
                settings.turn_detection = turn_detection;
            }
        }
    }

    /// Check the merged configuration.
    ///
    /// A missing API key is not an error here; it is reported when an
    /// adapter is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if RealtimeProvider::parse(&self.provider).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unsupported provider '{}', expected one of: {}",
                self.provider,
                get_supported_realtime_providers().join(", ")
            )));
        }
        if let Some(url) = &self.url {
            let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                key: "url".to_string(),
                message: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidValue {
                    key: "url".to_string(),
                    message: format!("scheme must be ws or wss, got '{}'", parsed.scheme()),
                });
            }
        }

        for (key, rate) in [
            ("sink_sample_rate", self.sink_sample_rate),
            ("capture_sample_rate", self.capture_sample_rate),
        ] {
            if !(8000..=192_000).contains(&rate) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{rate} Hz is outside 8000..=192000"),
                });
            }
        }
        if self.playback_capacity_ms == 0 {
            return Err(ConfigError::Invalid(
                "playback_capacity_ms must be greater than zero".to_string(),
            ));
        }
        if self.frame_ms == 0 || self.frame_ms > 1000 {
            return Err(ConfigError::Invalid(
                "frame_ms must be within 1..=1000".to_string(),
            ));
        }

        let backoff = &self.backoff;
        if backoff.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "backoff.max_attempts must be at least 1".to_string(),
            ));
        }
        if backoff.initial_delay_ms == 0 || backoff.max_delay_ms < backoff.initial_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff delays must satisfy 0 < initial_delay_ms ({}) <= max_delay_ms ({})",
                backoff.initial_delay_ms, backoff.max_delay_ms
            )));
        }
        if backoff.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.configure_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect and configure timeouts must be greater than zero".to_string(),
            ));
        }

        self.settings.validate().map_err(ConfigError::Invalid)
    }

    /// Create the protocol adapter for the configured provider.
    pub fn create_adapter(&self) -> Result<Arc<dyn ProtocolAdapter>, ConfigError> {
        let api_key = self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)?;
        create_adapter(
            &self.provider,
            api_key,
            self.model.as_deref(),
            self.url.as_deref(),
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            backoff: self.backoff.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            connection: self.connection_config(),
            pipeline: AudioPipelineConfig {
                playback_capacity_ms: self.playback_capacity_ms,
                crossfade_samples: self.crossfade_samples,
                frame_ms: self.frame_ms,
                capture_high_water: self.capture_high_water,
                ..Default::default()
            },
            configure_timeout: Duration::from_millis(self.configure_timeout_ms),
            interrupt_ack_timeout: Duration::from_millis(self.interrupt_ack_timeout_ms),
            replay_history: self.replay_history,
            ..Default::default()
        }
    }

    /// WAV device configuration at the configured audio rates.
    pub fn wav_device_config(
        &self,
        input_path: Option<PathBuf>,
        output_path: Option<PathBuf>,
    ) -> WavFileDeviceConfig {
        WavFileDeviceConfig {
            input_path,
            output_path,
            capture_sample_rate: self.capture_sample_rate,
            playback_sample_rate: self.sink_sample_rate,
            chunk_ms: self.frame_ms,
            ..Default::default()
        }
    }
}

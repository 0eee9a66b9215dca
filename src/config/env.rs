use std::env;
use std::str::FromStr;

use super::{ConfigError, EngineConfig};

/// Prefix shared by every engine environment variable
pub const ENV_PREFIX: &str = "WAAV_VOICE_";

fn var(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                message: format!("'{raw}': {e}"),
            }),
        None => Ok(None),
    }
}

fn parse_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match var(key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                message: format!("'{raw}' is not a boolean"),
            }),
        },
        None => Ok(None),
    }
}

/// Overlay environment variables onto `config`.
///
/// The API key comes from `WAAV_VOICE_API_KEY`, falling back to
/// `OPENAI_API_KEY`.
pub fn apply_env(config: &mut EngineConfig) -> Result<(), ConfigError> {
    if let Some(provider) = var("PROVIDER") {
        config.provider = provider;
    }
    if let Some(key) = var("API_KEY").or_else(|| {
        env::var("OPENAI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }) {
        config.api_key = Some(key);
    }
    if let Some(model) = var("MODEL") {
        config.model = Some(model);
    }
    if let Some(url) = var("URL") {
        config.url = Some(url);
    }

    if let Some(v) = parse("SINK_SAMPLE_RATE")? {
        config.sink_sample_rate = v;
    }
    if let Some(v) = parse("CAPTURE_SAMPLE_RATE")? {
        config.capture_sample_rate = v;
    }
    if let Some(v) = parse("PLAYBACK_CAPACITY_MS")? {
        config.playback_capacity_ms = v;
    }
    if let Some(v) = parse("CROSSFADE_SAMPLES")? {
        config.crossfade_samples = v;
    }
    if let Some(v) = parse("FRAME_MS")? {
        config.frame_ms = v;
    }
    if let Some(v) = parse("CAPTURE_HIGH_WATER")? {
        config.capture_high_water = v;
    }

    if let Some(v) = parse("BACKOFF_INITIAL_MS")? {
        config.backoff.initial_delay_ms = v;
    }
    if let Some(v) = parse("BACKOFF_MAX_MS")? {
        config.backoff.max_delay_ms = v;
    }
    if let Some(v) = parse("MAX_ATTEMPTS")? {
        config.backoff.max_attempts = v;
    }
    if let Some(v) = parse_bool("BACKOFF_JITTER")? {
        config.backoff.jitter = v;
    }
    if let Some(v) = parse("CONNECT_TIMEOUT_MS")? {
        config.connect_timeout_ms = v;
    }
    if let Some(v) = parse("DISCONNECT_TIMEOUT_MS")? {
        config.disconnect_timeout_ms = v;
    }
    if let Some(v) = parse("CONFIGURE_TIMEOUT_MS")? {
        config.configure_timeout_ms = v;
    }
    if let Some(v) = parse("INTERRUPT_TIMEOUT_MS")? {
        config.interrupt_ack_timeout_ms = v;
    }
    if let Some(v) = parse_bool("REPLAY_HISTORY")? {
        config.replay_history = v;
    }

    if let Some(instructions) = var("INSTRUCTIONS") {
        config.settings.instructions = Some(instructions);
    }
    if let Some(voice) = var("VOICE") {
        config.settings.voice = voice;
    }
    if let Some(v) = parse("TEMPERATURE")? {
        config.settings.temperature = Some(v);
    }
    Ok(())
}

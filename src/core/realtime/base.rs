//! Base types shared by realtime providers.
//!
//! Errors, connection backoff settings, and the provider-neutral session
//! configuration pieces (turn detection, input transcription) live here so
//! that protocol adapters and the session layer agree on them.
//!
//! # Audio Format
//!
//! Providers exchange PCM 16-bit signed little-endian mono audio, base64
//! encoded inside JSON envelopes.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to a realtime provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RealtimeError {
    /// Every connection attempt failed
    #[error("Connection failed after {attempts} attempt(s): {last_error}")]
    ConnectionFailed { attempts: u32, last_error: String },

    /// Transport-level failure on an open connection
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// Another connection attempt is already in flight
    #[error("Connection attempt already in progress")]
    ConnectInProgress,

    /// Connecting was abandoned because the session stopped
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Outbound payload could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Inbound message could not be understood
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error reported by the provider
    #[error("Provider error [{code}]: {message}")]
    ProviderError { code: String, message: String },

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Exponential backoff applied between connection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt (milliseconds).
    /// Default: 500ms
    pub initial_delay_ms: u64,

    /// Upper bound for any delay (milliseconds).
    /// Default: 10x the initial delay
    pub max_delay_ms: u64,

    /// Growth factor applied after each failure.
    /// Default: 2.0
    pub multiplier: f64,

    /// Total connection attempts before giving up.
    /// Default: 5
    pub max_attempts: u32,

    /// Add up to 25% random jitter to each delay.
    /// Default: false
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            multiplier: 2.0,
            max_attempts: 5,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    /// Config with the cap set to ten times `initial_delay_ms`.
    pub fn with_initial_delay(initial_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms: initial_delay_ms.saturating_mul(10),
            ..Default::default()
        }
    }

    /// Delay after the `failures`-th consecutive failure, in milliseconds.
    ///
    /// `initial * multiplier^(failures-1)`, capped at `max_delay_ms`.
    pub fn calculate_delay(&self, failures: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = base_delay * self.multiplier.max(1.0).powi(exponent);
        let cap = self.max_delay_ms.max(self.initial_delay_ms) as f64;
        let delay = delay.min(cap);

        if self.jitter {
            // Up to 25% extra, never above the cap
            let jitter = rand_jitter(delay * 0.25);
            (delay + jitter).min(cap) as u64
        } else {
            delay as u64
        }
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn validate(&self) -> RealtimeResult<()> {
        if self.max_attempts == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "backoff.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "backoff.multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "backoff.max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        Ok(())
    }
}

/// Pseudo-random value in `[0, range)` from a time-seeded LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    normalized * range
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
    /// Optional language hint (ISO-639-1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for InputTranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: None,
        }
    }
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether to create a response when the turn ends
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default)]
        eagerness: Option<String>,
        #[serde(default)]
        create_response: Option<bool>,
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection; turns are committed by the host
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
            interrupt_response: Some(true),
        }
    }
}

impl TurnDetectionConfig {
    /// Whether the provider detects turn ends on its own.
    pub fn is_automatic(&self) -> bool {
        !matches!(self, TurnDetectionConfig::None)
    }

    pub fn validate(&self) -> RealtimeResult<()> {
        match self {
            TurnDetectionConfig::ServerVad {
                threshold: Some(t), ..
            } if !(0.0..=1.0).contains(t) => Err(RealtimeError::InvalidConfiguration(format!(
                "turn_detection.threshold must be within 0.0..=1.0, got {t}"
            ))),
            TurnDetectionConfig::SemanticVad {
                eagerness: Some(e), ..
            } if !matches!(e.as_str(), "low" | "medium" | "high" | "auto") => {
                Err(RealtimeError::InvalidConfiguration(format!(
                    "turn_detection.eagerness must be low, medium, high or auto, got {e}"
                )))
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Transport state of a provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_defaults() {
        let config = BackoffConfig::default();
        assert_eq!(config.max_delay_ms, config.initial_delay_ms * 10);
        assert_eq!(config.max_attempts, 5);
        assert!(!config.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = BackoffConfig::with_initial_delay(100);
        let delays: Vec<u64> = (1..=7).map(|n| config.calculate_delay(n)).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000, 1000]);
    }

    #[test]
    fn test_backoff_jitter_stays_within_cap() {
        let config = BackoffConfig {
            jitter: true,
            ..BackoffConfig::with_initial_delay(100)
        };
        for n in 1..10 {
            let delay = config.calculate_delay(n);
            assert!(delay >= 100 && delay <= 1000, "delay {delay} out of range");
        }
    }

    #[test]
    fn test_should_retry() {
        let config = BackoffConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(config.should_retry(1));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }

    #[test]
    fn test_backoff_validation() {
        let zero_attempts = BackoffConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        let shrinking = BackoffConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());
    }

    #[test]
    fn test_turn_detection_serialization() {
        let json = serde_json::to_value(TurnDetectionConfig::default()).unwrap();
        assert_eq!(json["type"], "server_vad");
        assert_eq!(json["silence_duration_ms"], 500);

        let none: TurnDetectionConfig = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert!(!none.is_automatic());
    }

    #[test]
    fn test_turn_detection_validation() {
        let bad = TurnDetectionConfig::ServerVad {
            threshold: Some(1.5),
            prefix_padding_ms: None,
            silence_duration_ms: None,
            create_response: None,
            interrupt_response: None,
        };
        assert!(bad.validate().is_err());

        let semantic = TurnDetectionConfig::SemanticVad {
            eagerness: Some("sometimes".to_string()),
            create_response: None,
            interrupt_response: None,
        };
        assert!(semantic.validate().is_err());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed {
            attempts: 3,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connection failed after 3 attempt(s): connection refused"
        );

        let err = RealtimeError::ProviderError {
            code: "rate_limit_exceeded".to_string(),
            message: "slow down".to_string(),
        };
        assert!(err.to_string().contains("rate_limit_exceeded"));
    }
}

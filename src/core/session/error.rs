//! Session errors and their host-facing categories.

use std::fmt;

use thiserror::Error;

use super::state::SessionState;
use crate::core::audio::AudioError;
use crate::core::realtime::RealtimeError;

/// Broad class of a failure, as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connect, send or receive failure
    Transport,
    /// Malformed or unexpected wire message
    Protocol,
    /// Error reported by the backend
    Provider,
    /// Tool lookup, validation or execution failure
    ToolExecution,
    /// Microphone or speaker failure
    AudioHardware,
    /// Misuse of the session API or invalid settings
    Session,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Provider => "provider",
            ErrorCategory::ToolExecution => "tool_execution",
            ErrorCategory::AudioHardware => "audio_hardware",
            ErrorCategory::Session => "session",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// `start` was called while a session is already running
    #[error("Session already active")]
    AlreadyActive,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Provider did not acknowledge the session configuration within {0}ms")]
    ConfigureTimeout(u64),

    #[error("Provider rejected the session configuration: {0}")]
    ConfigureRejected(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::AlreadyActive
            | SessionError::InvalidState { .. }
            | SessionError::InvalidSettings(_) => ErrorCategory::Session,
            SessionError::ConfigureTimeout(_) | SessionError::ConnectionLost(_) => {
                ErrorCategory::Transport
            }
            SessionError::ConfigureRejected(_) => ErrorCategory::Provider,
            SessionError::Audio(_) => ErrorCategory::AudioHardware,
            SessionError::Realtime(e) => match e {
                RealtimeError::ConnectionFailed { .. }
                | RealtimeError::WebSocketError(_)
                | RealtimeError::NotConnected
                | RealtimeError::ConnectInProgress
                | RealtimeError::Cancelled
                | RealtimeError::Timeout(_) => ErrorCategory::Transport,
                RealtimeError::SerializationError(_) | RealtimeError::ProtocolError(_) => {
                    ErrorCategory::Protocol
                }
                RealtimeError::ProviderError { .. } => ErrorCategory::Provider,
                RealtimeError::InvalidConfiguration(_) => ErrorCategory::Session,
            },
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = SessionError::from(RealtimeError::ConnectionFailed {
            attempts: 3,
            last_error: "refused".to_string(),
        });
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(err.to_string().contains("refused"));

        let err = SessionError::from(AudioError::Device("unplugged".to_string()));
        assert_eq!(err.category(), ErrorCategory::AudioHardware);

        assert_eq!(SessionError::AlreadyActive.category(), ErrorCategory::Session);
        assert_eq!(
            SessionError::ConfigureRejected("bad voice".to_string()).category(),
            ErrorCategory::Provider
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = SessionError::InvalidState {
            operation: "interrupt",
            state: SessionState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot interrupt while idle");
    }
}

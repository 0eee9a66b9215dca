//! Notifications delivered to the host.

use std::sync::Arc;

use super::error::ErrorCategory;
use super::state::SessionState;
use crate::core::audio::AudioDeviceInfo;
use crate::core::history::ChatMessage;

/// Host-facing events published by a session.
///
/// Delivered over a `tokio::sync::broadcast` channel; a slow subscriber that
/// lags behind loses the oldest notifications, never blocks the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A message was appended to the history log
    MessageAppended(Arc<ChatMessage>),
    StatusChanged {
        previous: SessionState,
        current: SessionState,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
    /// The available or selected microphones changed
    MicrophonesChanged(Vec<AudioDeviceInfo>),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::MessageAppended(_) => "message_appended",
            Notification::StatusChanged { .. } => "status_changed",
            Notification::Error { .. } => "error",
            Notification::MicrophonesChanged(_) => "microphones_changed",
        }
    }
}

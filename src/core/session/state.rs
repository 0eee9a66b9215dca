//! Session lifecycle states.

use std::fmt;

use time::OffsetDateTime;

/// Lifecycle of a voice session.
///
/// ```text
/// Idle -> Connecting -> Configuring -> Active <-> {Interrupting, ToolRoundTrip}
///                                       any live state -> Stopping -> Idle
///                                       any live state -> Faulted -> Stopping
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Configuring,
    Active,
    Interrupting,
    ToolRoundTrip,
    Stopping,
    Faulted,
}

impl SessionState {
    /// Whether `next` is a defined transition from this state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Configuring) => true,
            (Configuring, Active) => true,
            (Active, Interrupting | ToolRoundTrip) => true,
            (Interrupting | ToolRoundTrip, Active) => true,
            (Stopping, Idle) => true,
            (Idle | Stopping, _) => false,
            (Faulted, Stopping) => true,
            (Faulted, _) => false,
            (_, Stopping | Faulted) => true,
            _ => false,
        }
    }

    /// A connection is open or being opened.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Configuring
                | SessionState::Active
                | SessionState::Interrupting
                | SessionState::ToolRoundTrip
        )
    }

    /// The session has been configured and is exchanging audio.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Active | SessionState::Interrupting | SessionState::ToolRoundTrip
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Configuring => "configuring",
            SessionState::Active => "active",
            SessionState::Interrupting => "interrupting",
            SessionState::ToolRoundTrip => "tool_round_trip",
            SessionState::Stopping => "stopping",
            SessionState::Faulted => "faulted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session for the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub state: SessionState,
    /// Provider-assigned session id, once the provider has sent it
    pub session_id: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    /// Cause of the most recent fault or surfaced error
    pub last_error: Option<String>,
    pub provider: &'static str,
}

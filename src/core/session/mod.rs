//! Voice session lifecycle.
//!
//! [`SessionOrchestrator`] is the host-facing entry point. It drives one
//! conversation at a time through the [`SessionState`] machine and reports
//! progress as [`Notification`]s.

mod error;
mod notifications;
mod orchestrator;
mod settings;
mod state;

pub use error::{ErrorCategory, SessionError, SessionResult};
pub use notifications::Notification;
pub use orchestrator::{OrchestratorConfig, SessionOrchestrator, SessionOrchestratorBuilder};
pub use settings::Settings;
pub use state::{SessionInfo, SessionState};

pub mod audio;
pub mod history;
pub mod realtime;
pub mod session;
pub mod tools;

// Re-export commonly used types for convenience
pub use audio::{
    AudioChunk, AudioDevice, AudioDeviceInfo, AudioError, AudioPipeline, AudioPipelineConfig,
    DeviceKind, WavFileDevice, WavFileDeviceConfig,
};

pub use history::{ChatMessage, ChatRole, HistoryLog, ToolCallRecord};

pub use realtime::{
    BackoffConfig, ConnectionConfig, ConnectionManager, EngineEvent, OpenAIAdapter,
    OpenAIAdapterConfig, OutboundCommand, ProtocolAdapter, RealtimeError, RealtimeProvider,
    RealtimeResult, TurnDetectionConfig, create_adapter, create_adapter_from_enum,
    get_supported_realtime_providers,
};

pub use session::{
    ErrorCategory, Notification, OrchestratorConfig, SessionError, SessionInfo,
    SessionOrchestrator, SessionResult, SessionState, Settings,
};

pub use tools::{ToolDefinition, ToolError, ToolInvoker, ToolResult};

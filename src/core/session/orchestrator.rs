//! Session orchestrator.
//!
//! Owns the lifecycle of one conversation: connects through the
//! [`ConnectionManager`], configures the provider, runs the
//! [`AudioPipeline`], dispatches tool calls, and records the conversation in
//! the [`HistoryLog`].
//!
//! Provider events arrive on a single queue drained by one pump task, so
//! session state is never re-entered from inside the receive loop. Tool
//! executions run on their own tasks and report back through the same pump.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};

use super::error::{ErrorCategory, SessionError, SessionResult};
use super::notifications::Notification;
use super::settings::Settings;
use super::state::{SessionInfo, SessionState};
use crate::core::audio::{
    AudioChunk, AudioDevice, AudioDeviceInfo, AudioError, AudioErrorCallback, AudioPipeline,
    AudioPipelineConfig, AudioUplink, DeviceKind, PipelineStats,
};
use crate::core::history::{ChatMessage, ChatRole, HistoryLog};
use crate::core::realtime::{
    ConnectionConfig, ConnectionManager, EngineEvent, OutboundCommand, PendingToolCall,
    ProtocolAdapter, ProviderErrorKind, RealtimeError, TurnDetectionConfig,
};
use crate::core::tools::{ToolInvoker, ToolResult};

const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Upper bound on waiting for the pump task during stop
const PUMP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine-level session settings that do not change between sessions.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub connection: ConnectionConfig,
    pub pipeline: AudioPipelineConfig,
    /// How long `start` waits for the provider to acknowledge the session
    /// configuration
    pub configure_timeout: Duration,
    /// How long `interrupt` waits for the provider to confirm the cancel
    pub interrupt_ack_timeout: Duration,
    /// Inject the current history into each new provider session
    pub replay_history: bool,
    pub notification_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            pipeline: AudioPipelineConfig::default(),
            configure_timeout: Duration::from_secs(10),
            interrupt_ack_timeout: Duration::from_secs(2),
            replay_history: false,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// Messages produced inside the session and consumed by the pump.
enum PumpMessage {
    ToolResolved(ToolResult),
    AudioFault(AudioError),
}

/// Authoritative view of the provider's response lifecycle.
#[derive(Debug, Default)]
struct ResponseTracker {
    active: Option<String>,
    /// Responses the engine cancelled; their audio is discarded
    cancelled: HashSet<String>,
    /// A cancel was sent and neither confirmed nor rejected yet
    cancel_pending: bool,
    /// Tool results were sent and the provider must be asked to continue
    awaiting_continuation: bool,
    tools_in_flight: usize,
    /// Call ids already dispatched this session
    seen_calls: HashSet<String>,
}

impl ResponseTracker {
    fn is_muted(&self, response_id: &str) -> bool {
        self.cancelled.contains(response_id)
    }

    fn plan_cancel(&mut self, force: bool) -> CancelPlan {
        match self.active.clone() {
            Some(id) if self.cancelled.contains(&id) => CancelPlan::AlreadyCancelled,
            Some(id) => {
                self.cancelled.insert(id.clone());
                self.cancel_pending = true;
                CancelPlan::Send(Some(id))
            }
            None if force => {
                self.cancel_pending = true;
                CancelPlan::Send(None)
            }
            None => CancelPlan::Nothing,
        }
    }

    fn finish(&mut self, response_id: &str) {
        if self.active.as_deref() == Some(response_id) {
            self.active = None;
        }
        if self.cancelled.contains(response_id) {
            self.cancel_pending = false;
        }
    }

    /// Whether the provider should now be asked for a continuation.
    fn take_continuation(&mut self) -> bool {
        if self.awaiting_continuation && self.tools_in_flight == 0 && self.active.is_none() {
            self.awaiting_continuation = false;
            return true;
        }
        false
    }
}

enum CancelPlan {
    Send(Option<String>),
    AlreadyCancelled,
    Nothing,
}

#[derive(Debug, Default)]
struct SessionMeta {
    session_id: Option<String>,
    started_at: Option<OffsetDateTime>,
    last_error: Option<String>,
}

struct RunHandle {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Forwards captured audio to the provider connection.
struct SessionUplink {
    adapter: Arc<dyn ProtocolAdapter>,
    connection: Arc<ConnectionManager>,
}

#[async_trait]
impl AudioUplink for SessionUplink {
    async fn send_audio(&self, chunk: AudioChunk) -> bool {
        match self.adapter.encode(&OutboundCommand::AppendAudio(chunk)) {
            Ok(text) => self.connection.send(text).await,
            Err(e) => {
                warn!(error = %e, "Failed to encode audio chunk");
                false
            }
        }
    }
}

/// Settings and the tool invoker built from them, swapped as one unit.
struct ActiveSettings {
    settings: Arc<Settings>,
    invoker: Arc<ToolInvoker>,
}

struct Inner {
    adapter: Arc<dyn ProtocolAdapter>,
    connection: Arc<ConnectionManager>,
    pipeline: AudioPipeline,
    history: Arc<HistoryLog>,
    config: OrchestratorConfig,
    state: watch::Sender<SessionState>,
    active: ArcSwapOption<ActiveSettings>,
    responses: Mutex<ResponseTracker>,
    meta: Mutex<SessionMeta>,
    notifications: broadcast::Sender<Notification>,
    configure_ack: Mutex<Option<oneshot::Sender<SessionResult<()>>>>,
    run: Mutex<Option<RunHandle>>,
    stop_lock: tokio::sync::Mutex<()>,
    span: Span,
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next` if that is a defined transition from the current
    /// state. The check and the update are atomic.
    fn transition(&self, next: SessionState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        match previous {
            Some(previous) => {
                info!(from = %previous, to = %next, "Session state changed");
                self.notify(Notification::StatusChanged {
                    previous,
                    current: next,
                });
                true
            }
            None => {
                debug!(state = %self.state(), requested = %next, "Transition not allowed");
                false
            }
        }
    }

    fn notify(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn report_error(&self, category: ErrorCategory, message: String) {
        self.meta.lock().last_error = Some(message.clone());
        self.notify(Notification::Error { category, message });
    }

    /// Record the cause, tell the host, then enter `Faulted`.
    fn fault(&self, err: &SessionError) {
        let category = err.category();
        error!(category = %category, error = %err, "Session faulted");
        self.report_error(category, err.to_string());
        self.transition(SessionState::Faulted);
    }

    fn install_settings(&self, settings: Arc<Settings>) {
        let mut invoker = ToolInvoker::new(settings.tools.iter().cloned());
        if let Some(ms) = settings.tool_timeout_ms {
            invoker = invoker.with_timeout(Duration::from_millis(ms));
        }
        self.active.store(Some(Arc::new(ActiveSettings {
            settings,
            invoker: Arc::new(invoker),
        })));
    }

    async fn send_command(&self, command: OutboundCommand) -> bool {
        match self.adapter.encode(&command) {
            Ok(text) => {
                trace!(command = command.kind(), "Sending command");
                self.connection.send(text).await
            }
            Err(e) => {
                warn!(command = command.kind(), error = %e, "Failed to encode command");
                false
            }
        }
    }

    fn append_message(&self, message: ChatMessage, dedupe: bool) {
        let appended = if dedupe {
            self.history.append_unless_duplicate(message)
        } else {
            Some(self.history.append(message))
        };
        if let Some(message) = appended {
            debug!(role = %message.role, id = %message.id, "History entry appended");
            self.notify(Notification::MessageAppended(message));
        }
    }

    async fn replay_history(&self) {
        let messages: Vec<Arc<ChatMessage>> = self
            .history
            .snapshot()
            .into_iter()
            .filter(|m| matches!(m.role, ChatRole::User | ChatRole::Assistant))
            .collect();
        for message in &messages {
            self.send_command(OutboundCommand::HistoryItem(message.clone()))
                .await;
        }
        debug!(count = messages.len(), "Replayed history into provider session");
    }

    /// Connect, configure and start audio. Runs inside `start`.
    async fn establish(
        &self,
        settings: Arc<Settings>,
        events: mpsc::UnboundedSender<EngineEvent>,
        internal: mpsc::UnboundedSender<PumpMessage>,
        ack: oneshot::Receiver<SessionResult<()>>,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        self.connection
            .connect(self.adapter.clone(), events, cancel)
            .await?;
        if cancel.is_cancelled() {
            self.connection.disconnect().await;
            return Err(RealtimeError::Cancelled.into());
        }

        if !self.transition(SessionState::Configuring) {
            return Err(SessionError::InvalidState {
                operation: "configure",
                state: self.state(),
            });
        }
        if !self
            .send_command(OutboundCommand::ConfigureSession(settings))
            .await
        {
            return Err(RealtimeError::NotConnected.into());
        }
        if self.config.replay_history {
            self.replay_history().await;
        }

        let acknowledged = tokio::select! {
            _ = cancel.cancelled() => return Err(RealtimeError::Cancelled.into()),
            ack = tokio::time::timeout(self.config.configure_timeout, ack) => ack,
        };
        match acknowledged {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(SessionError::ConnectionLost(
                    "session ended before configuration was acknowledged".to_string(),
                ));
            }
            Err(_) => {
                self.configure_ack.lock().take();
                return Err(SessionError::ConfigureTimeout(
                    self.config.configure_timeout.as_millis() as u64,
                ));
            }
        }

        let on_error: AudioErrorCallback = Arc::new(move |e| {
            let _ = internal.send(PumpMessage::AudioFault(e));
        });
        let uplink = Arc::new(SessionUplink {
            adapter: self.adapter.clone(),
            connection: self.connection.clone(),
        });
        self.pipeline.start(uplink, on_error)?;

        if !self.transition(SessionState::Active) {
            self.pipeline.stop().await;
            return Err(SessionError::InvalidState {
                operation: "activate",
                state: self.state(),
            });
        }
        Ok(())
    }

    /// Cancel the active response once. With `force`, a cancel is sent even
    /// when no response is known to be active. Returns whether a cancel
    /// confirmation is outstanding.
    async fn cancel_active_response(&self, force: bool) -> bool {
        let plan = self.responses.lock().plan_cancel(force);
        match plan {
            CancelPlan::Send(response_id) => {
                let awaiting = response_id.is_some();
                info!(response_id = ?response_id, "Cancelling response");
                if !self
                    .send_command(OutboundCommand::CancelResponse { response_id })
                    .await
                {
                    warn!("Cancel could not be sent");
                    return false;
                }
                awaiting
            }
            CancelPlan::AlreadyCancelled => true,
            CancelPlan::Nothing => false,
        }
    }

    async fn handle_event(&self, event: EngineEvent, internal: &mpsc::UnboundedSender<PumpMessage>) {
        trace!(event = event.kind(), "Provider event");
        match event {
            EngineEvent::SessionCreated { session_id } => {
                info!(session_id = %session_id, "Provider session created");
                self.meta.lock().session_id = Some(session_id);
            }
            EngineEvent::Configured => match self.configure_ack.lock().take() {
                Some(ack) => {
                    let _ = ack.send(Ok(()));
                }
                None => debug!("Settings update acknowledged"),
            },
            EngineEvent::ResponseStarted { response_id } => {
                debug!(response_id = %response_id, "Response started");
                self.responses.lock().active = Some(response_id);
            }
            EngineEvent::ResponseDone {
                response_id,
                status,
            } => self.on_response_done(response_id, status).await,
            EngineEvent::AssistantMessage { response_id, text } => {
                self.append_message(ChatMessage::assistant_for_response(text, response_id), true);
            }
            EngineEvent::UserTranscript { text, .. } => {
                self.append_message(ChatMessage::user(text), false);
            }
            EngineEvent::AudioDelta { response_id, chunk } => {
                if self.responses.lock().is_muted(&response_id) {
                    trace!(response_id = %response_id, "Discarding audio of cancelled response");
                    return;
                }
                if self.pipeline.is_running() {
                    self.pipeline.enqueue_playback(chunk);
                }
            }
            EngineEvent::AudioDone { response_id } => {
                if !self.responses.lock().is_muted(&response_id) {
                    self.pipeline.end_playback_stream();
                }
            }
            EngineEvent::ToolCallReady(call) => self.on_tool_call(call, internal),
            EngineEvent::SpeechStarted => self.on_speech_started().await,
            EngineEvent::SpeechStopped => debug!("User stopped speaking"),
            EngineEvent::ProviderError {
                code,
                message,
                kind,
            } => self.on_provider_error(code, message, kind),
            EngineEvent::ConnectionLost { reason } => self.on_connection_lost(reason).await,
        }
    }

    async fn on_response_done(&self, response_id: String, status: String) {
        self.responses.lock().finish(&response_id);
        if status == "failed" || status == "incomplete" {
            warn!(response_id = %response_id, status = %status, "Response ended early");
        } else {
            debug!(response_id = %response_id, status = %status, "Response done");
        }
        self.pipeline.end_playback_stream();

        let idle = self.responses.lock().active.is_none();
        if idle && self.state() == SessionState::Interrupting {
            self.transition(SessionState::Active);
        }
        self.maybe_continue().await;
    }

    fn on_tool_call(&self, call: PendingToolCall, internal: &mpsc::UnboundedSender<PumpMessage>) {
        {
            let mut responses = self.responses.lock();
            if !responses.seen_calls.insert(call.call_id.clone()) {
                warn!(call_id = %call.call_id, "Ignoring repeated tool call");
                return;
            }
            responses.tools_in_flight += 1;
            responses.awaiting_continuation = true;
        }
        if self.state() == SessionState::Active {
            self.transition(SessionState::ToolRoundTrip);
        }

        info!(call_id = %call.call_id, tool = %call.name, "Dispatching tool call");
        let invoker = self
            .active
            .load()
            .as_ref()
            .map(|active| active.invoker.clone())
            .unwrap_or_default();
        let internal = internal.clone();
        tokio::spawn(
            async move {
                let mut call = call;
                let result = invoker.invoke(&mut call).await;
                let _ = internal.send(PumpMessage::ToolResolved(result));
            }
            .in_current_span(),
        );
    }

    async fn on_tool_resolved(&self, result: ToolResult) {
        {
            let mut responses = self.responses.lock();
            responses.tools_in_flight = responses.tools_in_flight.saturating_sub(1);
        }
        let record = result.to_record();
        if !self
            .send_command(OutboundCommand::ToolResult(result))
            .await
        {
            warn!(call_id = %record.call_id, "Tool result could not be sent");
        }
        self.append_message(ChatMessage::tool(record), false);
        self.maybe_continue().await;
    }

    /// Ask for a continuation once every tool result is delivered and the
    /// requesting response has finished.
    async fn maybe_continue(&self) {
        if !self.responses.lock().take_continuation() {
            return;
        }
        if self.state().is_running() {
            debug!("Requesting continuation after tool results");
            self.send_command(OutboundCommand::CreateResponse).await;
        }
        if self.state() == SessionState::ToolRoundTrip {
            self.transition(SessionState::Active);
        }
    }

    async fn on_speech_started(&self) {
        let discarded = self.pipeline.clear_playback();
        debug!(discarded, "User started speaking, playback cleared");

        if self.responses.lock().active.is_none() {
            return;
        }
        let entered =
            self.state() == SessionState::Active && self.transition(SessionState::Interrupting);
        let awaiting = self.cancel_active_response(false).await;
        if entered && !awaiting {
            self.transition(SessionState::Active);
        }
    }

    fn on_provider_error(&self, code: String, message: String, kind: ProviderErrorKind) {
        let (from_cancel, benign) = {
            let mut responses = self.responses.lock();
            let from_cancel = kind == ProviderErrorKind::CancelRejected;
            if from_cancel {
                responses.cancel_pending = false;
            }
            (from_cancel, from_cancel && responses.active.is_none())
        };
        if from_cancel && self.state() == SessionState::Interrupting {
            self.transition(SessionState::Active);
        }
        if benign {
            debug!(code = %code, "Cancel rejected with no response active, ignoring");
            return;
        }

        if let Some(ack) = self.configure_ack.lock().take() {
            let _ = ack.send(Err(SessionError::ConfigureRejected(format!(
                "[{code}] {message}"
            ))));
            return;
        }
        warn!(code = %code, kind = ?kind, message = %message, "Provider error");
        self.report_error(ErrorCategory::Provider, format!("[{code}] {message}"));
    }

    async fn on_connection_lost(&self, reason: String) {
        if !self.state().is_live() {
            debug!(reason = %reason, "Connection closed outside a live session");
            return;
        }
        if let Some(ack) = self.configure_ack.lock().take() {
            let _ = ack.send(Err(SessionError::ConnectionLost(reason)));
            return;
        }
        self.fault(&SessionError::ConnectionLost(reason));
        self.pipeline.stop().await;
    }

    async fn on_audio_fault(&self, err: AudioError) {
        let err = SessionError::Audio(err);
        error!(error = %err, "Audio hardware fault, halting audio");
        self.report_error(err.category(), err.to_string());
        self.pipeline.stop().await;
    }
}

async fn run_pump(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    mut internal: mpsc::UnboundedReceiver<PumpMessage>,
    internal_tx: mpsc::UnboundedSender<PumpMessage>,
    cancel: CancellationToken,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = internal.recv() => match message {
                Some(PumpMessage::ToolResolved(result)) => inner.on_tool_resolved(result).await,
                Some(PumpMessage::AudioFault(err)) => inner.on_audio_fault(err).await,
                None => break,
            },
            event = events.recv(), if events_open => match event {
                Some(event) => inner.handle_event(event, &internal_tx).await,
                None => {
                    debug!("Provider event stream closed");
                    events_open = false;
                }
            },
        }
    }
    debug!("Session pump exited");
}

/// Builder for [`SessionOrchestrator`].
pub struct SessionOrchestratorBuilder {
    adapter: Arc<dyn ProtocolAdapter>,
    device: Arc<dyn AudioDevice>,
    config: OrchestratorConfig,
    history: Option<Arc<HistoryLog>>,
    span: Option<Span>,
}

impl SessionOrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing history log, e.g. one kept across sessions.
    pub fn history(mut self, history: Arc<HistoryLog>) -> Self {
        self.history = Some(history);
        self
    }

    /// Parent span for everything the session logs.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> SessionOrchestrator {
        let mut pipeline_config = self.config.pipeline.clone();
        pipeline_config.provider_sample_rate = self.adapter.input_sample_rate();

        let span = self
            .span
            .unwrap_or_else(|| info_span!("voice_session", provider = self.adapter.name()));
        let (state, _) = watch::channel(SessionState::Idle);
        let (notifications, _) = broadcast::channel(self.config.notification_capacity.max(1));

        SessionOrchestrator {
            inner: Arc::new(Inner {
                connection: Arc::new(ConnectionManager::new(self.config.connection.clone())),
                pipeline: AudioPipeline::new(self.device, pipeline_config),
                history: self.history.unwrap_or_default(),
                adapter: self.adapter,
                config: self.config,
                state,
                active: ArcSwapOption::empty(),
                responses: Mutex::new(ResponseTracker::default()),
                meta: Mutex::new(SessionMeta::default()),
                notifications,
                configure_ack: Mutex::new(None),
                run: Mutex::new(None),
                stop_lock: tokio::sync::Mutex::new(()),
                span,
            }),
        }
    }
}

/// Public handle to a voice session engine.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        adapter: Arc<dyn ProtocolAdapter>,
        device: Arc<dyn AudioDevice>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::builder(adapter, device).config(config).build()
    }

    pub fn builder(
        adapter: Arc<dyn ProtocolAdapter>,
        device: Arc<dyn AudioDevice>,
    ) -> SessionOrchestratorBuilder {
        SessionOrchestratorBuilder {
            adapter,
            device,
            config: OrchestratorConfig::default(),
            history: None,
            span: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watch state changes without going through notifications.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Current settings snapshot, if a session is running.
    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.inner
            .active
            .load()
            .as_ref()
            .map(|active| active.settings.clone())
    }

    pub fn session_info(&self) -> SessionInfo {
        let meta = self.inner.meta.lock();
        SessionInfo {
            state: self.inner.state(),
            session_id: meta.session_id.clone(),
            started_at: meta.started_at,
            last_error: meta.last_error.clone(),
            provider: self.inner.adapter.name(),
        }
    }

    /// Open a session with `settings`.
    ///
    /// Fails with [`SessionError::AlreadyActive`] unless the session is idle.
    /// Any later failure leaves the session `Faulted` with the cause recorded;
    /// call [`stop`](Self::stop) before starting again.
    pub async fn start(&self, settings: Settings) -> SessionResult<()> {
        let span = self.inner.span.clone();
        self.start_inner(settings).instrument(span).await
    }

    async fn start_inner(&self, settings: Settings) -> SessionResult<()> {
        let inner = &self.inner;
        settings.validate().map_err(SessionError::InvalidSettings)?;
        if inner.state() != SessionState::Idle || !inner.transition(SessionState::Connecting) {
            return Err(SessionError::AlreadyActive);
        }

        let settings = Arc::new(settings);
        inner.install_settings(settings.clone());
        inner.adapter.reset();
        *inner.responses.lock() = ResponseTracker::default();
        *inner.meta.lock() = SessionMeta {
            started_at: Some(OffsetDateTime::now_utc()),
            ..Default::default()
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        *inner.configure_ack.lock() = Some(ack_tx);

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(
            run_pump(
                inner.clone(),
                events_rx,
                internal_rx,
                internal_tx.clone(),
                cancel.clone(),
            )
            .in_current_span(),
        );
        *inner.run.lock() = Some(RunHandle {
            cancel: cancel.clone(),
            pump,
        });

        info!(voice = %settings.voice, tools = settings.tools.len(), "Starting session");
        match inner
            .establish(settings, events_tx, internal_tx, ack_rx, &cancel)
            .await
        {
            Ok(()) => {
                info!("Session active");
                Ok(())
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    debug!(error = %err, "Start abandoned, session is stopping");
                } else {
                    inner.fault(&err);
                }
                Err(err)
            }
        }
    }

    /// Tear the session down and return to `Idle`. Valid in every state;
    /// a second call is a no-op.
    pub async fn stop(&self) {
        let span = self.inner.span.clone();
        self.stop_inner().instrument(span).await
    }

    async fn stop_inner(&self) {
        let inner = &self.inner;
        let _guard = inner.stop_lock.lock().await;
        if inner.state() == SessionState::Idle {
            debug!("Stop requested while idle");
            return;
        }
        inner.transition(SessionState::Stopping);

        let run = inner.run.lock().take();
        if let Some(run) = &run {
            run.cancel.cancel();
        }
        // Disconnect first: its timeout bounds any send still parked on the link.
        inner.connection.disconnect().await;
        inner.pipeline.stop().await;
        if let Some(run) = run {
            let mut pump = run.pump;
            if tokio::time::timeout(PUMP_SHUTDOWN_TIMEOUT, &mut pump)
                .await
                .is_err()
            {
                warn!("Session pump did not exit in time, aborting");
                pump.abort();
            }
        }

        inner.configure_ack.lock().take();
        inner.adapter.reset();
        inner.active.store(None);
        *inner.responses.lock() = ResponseTracker::default();
        inner.transition(SessionState::Idle);
        info!("Session stopped");
    }

    /// Stop the current response: playback is silenced at once and a cancel
    /// is sent upstream. Returns after the provider confirms, or after the
    /// acknowledgement timeout.
    pub async fn interrupt(&self) -> SessionResult<()> {
        let span = self.inner.span.clone();
        self.interrupt_inner().instrument(span).await
    }

    async fn interrupt_inner(&self) -> SessionResult<()> {
        let inner = &self.inner;
        let state = inner.state();
        if state != SessionState::Active || !inner.transition(SessionState::Interrupting) {
            return Err(SessionError::InvalidState {
                operation: "interrupt",
                state: inner.state(),
            });
        }

        let discarded = inner.pipeline.clear_playback();
        debug!(discarded, "Playback cleared for interrupt");

        if inner.cancel_active_response(true).await {
            let mut state_rx = inner.state.subscribe();
            let confirmed = tokio::time::timeout(inner.config.interrupt_ack_timeout, async {
                state_rx
                    .wait_for(|s| *s != SessionState::Interrupting)
                    .await
                    .map(|_| ())
            })
            .await;
            if confirmed.is_err() {
                warn!(
                    timeout_ms = inner.config.interrupt_ack_timeout.as_millis() as u64,
                    "Cancel not confirmed in time, resuming"
                );
                inner.transition(SessionState::Active);
            }
        } else {
            inner.transition(SessionState::Active);
        }
        Ok(())
    }

    /// Replace the settings snapshot. A running session is reconfigured
    /// without interrupting audio in flight.
    pub async fn update_settings(&self, settings: Settings) -> SessionResult<()> {
        let inner = &self.inner;
        settings.validate().map_err(SessionError::InvalidSettings)?;
        let settings = Arc::new(settings);
        inner.install_settings(settings.clone());

        let state = inner.state();
        if state == SessionState::Configuring || state.is_running() {
            if !inner
                .send_command(OutboundCommand::ConfigureSession(settings))
                .await
            {
                warn!("Updated settings could not be sent");
            }
            info!(state = %state, "Session settings updated");
        }
        Ok(())
    }

    /// Send a typed user message and ask for a response.
    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        let inner = &self.inner;
        let state = inner.state();
        if state != SessionState::Active {
            return Err(SessionError::InvalidState {
                operation: "send text",
                state,
            });
        }
        let text = text.into();
        inner.append_message(ChatMessage::user(text.clone()), false);
        inner.send_command(OutboundCommand::UserText(text)).await;
        inner.send_command(OutboundCommand::CreateResponse).await;
        Ok(())
    }

    /// End the user's turn manually. Only valid without automatic turn
    /// detection.
    pub async fn commit_turn(&self) -> SessionResult<()> {
        let inner = &self.inner;
        let state = inner.state();
        if state != SessionState::Active {
            return Err(SessionError::InvalidState {
                operation: "commit turn",
                state,
            });
        }
        let manual = inner
            .active
            .load()
            .as_ref()
            .is_some_and(|active| active.settings.turn_detection == TurnDetectionConfig::None);
        if !manual {
            return Err(SessionError::InvalidSettings(
                "commit_turn requires turn detection to be disabled".to_string(),
            ));
        }
        inner.send_command(OutboundCommand::CommitAudio).await;
        inner.send_command(OutboundCommand::CreateResponse).await;
        Ok(())
    }

    pub fn history(&self) -> Vec<Arc<ChatMessage>> {
        self.inner.history.snapshot()
    }

    pub fn history_log(&self) -> Arc<HistoryLog> {
        self.inner.history.clone()
    }

    /// Empty the local history. The provider keeps its own context for the
    /// open connection.
    pub fn clear_history(&self) {
        self.inner.history.clear();
    }

    pub fn list_microphones(&self) -> Vec<AudioDeviceInfo> {
        self.inner
            .pipeline
            .list_devices()
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Input)
            .collect()
    }

    pub fn select_microphone(&self, id: &str) -> bool {
        if !self.inner.pipeline.select_device(id) {
            warn!(device = %id, "Microphone selection rejected");
            return false;
        }
        info!(device = %id, "Microphone selected");
        self.inner
            .notify(Notification::MicrophonesChanged(self.list_microphones()));
        true
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.inner.pipeline.stats()
    }

    pub fn provider_info(&self) -> serde_json::Value {
        self.inner.adapter.provider_info()
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("provider", &self.inner.adapter.name())
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{WavFileDevice, WavFileDeviceConfig};
    use crate::core::realtime::create_adapter;
    use crate::core::tools::ToolDefinition;

    fn orchestrator() -> SessionOrchestrator {
        let adapter = create_adapter("openai", "sk-test", None, Some("ws://127.0.0.1:9")).unwrap();
        let device = Arc::new(WavFileDevice::new(WavFileDeviceConfig::default()));
        SessionOrchestrator::new(adapter, device, OrchestratorConfig::default())
    }

    #[test]
    fn test_tracker_cancels_each_response_once() {
        let mut tracker = ResponseTracker::default();
        assert!(matches!(tracker.plan_cancel(false), CancelPlan::Nothing));
        assert!(matches!(tracker.plan_cancel(true), CancelPlan::Send(None)));

        tracker.active = Some("r1".to_string());
        assert!(matches!(tracker.plan_cancel(false), CancelPlan::Send(Some(ref id)) if id == "r1"));
        assert!(matches!(tracker.plan_cancel(false), CancelPlan::AlreadyCancelled));
        assert!(tracker.is_muted("r1"));
        assert!(!tracker.is_muted("r2"));

        tracker.finish("r1");
        assert!(tracker.active.is_none());
        assert!(!tracker.cancel_pending);
    }

    #[test]
    fn test_tracker_continuation_waits_for_tools_and_response() {
        let mut tracker = ResponseTracker {
            active: Some("r1".to_string()),
            awaiting_continuation: true,
            tools_in_flight: 1,
            ..Default::default()
        };
        assert!(!tracker.take_continuation());
        tracker.tools_in_flight = 0;
        assert!(!tracker.take_continuation());
        tracker.finish("r1");
        assert!(tracker.take_continuation());
        assert!(!tracker.take_continuation());
    }

    #[test]
    fn test_settings_and_invoker_swap_together() {
        let session = orchestrator();
        assert!(session.settings().is_none());

        let tool = |name: &str| {
            ToolDefinition::from_sync_fn(name, "test tool", None, |_| Ok(serde_json::json!({})))
        };
        let first = Arc::new(Settings {
            tools: vec![tool("get_time")],
            ..Default::default()
        });
        session.inner.install_settings(first.clone());

        let second = Arc::new(Settings {
            tools: vec![tool("get_weather")],
            ..Default::default()
        });
        session.inner.install_settings(second.clone());

        let active = session.inner.active.load_full().unwrap();
        assert!(Arc::ptr_eq(&active.settings, &second));
        assert!(active.invoker.get("get_weather").is_some());
        assert!(active.invoker.get("get_time").is_none());
        assert!(Arc::ptr_eq(&session.settings().unwrap(), &second));
    }

    #[tokio::test]
    async fn test_interrupt_requires_active() {
        let session = orchestrator();
        let err = session.interrupt().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                operation: "interrupt",
                state: SessionState::Idle
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_settings_keep_session_idle() {
        let session = orchestrator();
        let settings = Settings {
            temperature: Some(9.0),
            ..Default::default()
        };
        let err = session.start(settings).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidSettings(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let session = orchestrator();
        let mut notifications = session.subscribe();
        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_text_requires_active() {
        let session = orchestrator();
        assert!(session.send_text("hello").await.is_err());
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_microphone_selection_notifies() {
        let session = orchestrator();
        let mut notifications = session.subscribe();
        let microphones = session.list_microphones();
        assert!(!microphones.is_empty());
        assert!(microphones.iter().all(|d| d.kind == DeviceKind::Input));

        assert!(session.select_microphone("silence"));
        assert!(matches!(
            notifications.try_recv(),
            Ok(Notification::MicrophonesChanged(_))
        ));
        assert!(!session.select_microphone("no-such-device"));
    }

    #[test]
    fn test_session_info_defaults() {
        let info = orchestrator().session_info();
        assert_eq!(info.state, SessionState::Idle);
        assert_eq!(info.provider, "openai");
        assert!(info.session_id.is_none());
        assert!(info.started_at.is_none());
    }
}

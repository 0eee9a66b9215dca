//! Duplex WebSocket transport for one provider session.
//!
//! The manager owns the socket through two tasks: a writer that drains a
//! bounded queue (so frames from concurrent senders never interleave) and a
//! reader that decodes frames through the [`ProtocolAdapter`] and forwards
//! the resulting [`EngineEvent`]s. The manager never reconnects on its own;
//! an unexpected close surfaces as [`EngineEvent::ConnectionLost`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::backoff::Backoff;
use super::base::{BackoffConfig, ConnectionState, RealtimeError, RealtimeResult};
use super::protocol::{ConnectRequest, EngineEvent, ProtocolAdapter};

/// Outbound frames buffered ahead of the writer task
const WS_CHANNEL_CAPACITY: usize = 256;

/// Transport settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub backoff: BackoffConfig,
    /// Upper bound on a single connect attempt including the handshake
    pub connect_timeout: Duration,
    /// How long to wait for the close handshake before dropping the socket
    pub disconnect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(2),
        }
    }
}

struct Link {
    outbound: mpsc::Sender<Message>,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Owns at most one open provider connection.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    connecting: AtomicBool,
    link: Mutex<Option<Link>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connecting: AtomicBool::new(false),
            link: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the connection, retrying with backoff.
    ///
    /// Decoded events are forwarded to `events` until the connection closes.
    /// Only one attempt may run at a time; a concurrent call fails with
    /// [`RealtimeError::ConnectInProgress`]. Cancelling `cancel` abandons the
    /// attempt at the next await point.
    pub async fn connect(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        events: mpsc::UnboundedSender<EngineEvent>,
        cancel: &CancellationToken,
    ) -> RealtimeResult<()> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RealtimeError::ConnectInProgress);
        }
        let result = self.connect_with_retry(adapter, events, cancel).await;
        self.connecting.store(false, Ordering::Release);

        if result.is_err() {
            *self.state.write() = ConnectionState::Failed;
        }
        result
    }

    async fn connect_with_retry(
        &self,
        adapter: Arc<dyn ProtocolAdapter>,
        events: mpsc::UnboundedSender<EngineEvent>,
        cancel: &CancellationToken,
    ) -> RealtimeResult<()> {
        if self.link.lock().is_some() {
            debug!("Replacing existing connection");
            self.disconnect().await;
        }

        *self.state.write() = ConnectionState::Connecting;
        let request = adapter.connect_request()?;
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            let attempt = backoff.failures() + 1;
            debug!(provider = adapter.name(), attempt, "Connecting");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RealtimeError::Cancelled),
                outcome = tokio::time::timeout(self.config.connect_timeout, open_socket(&request)) => outcome,
            };

            let last_error = match outcome {
                Ok(Ok(socket)) => {
                    info!(provider = adapter.name(), attempt, "Connected to realtime provider");
                    self.spawn_link(socket, adapter, events);
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "connect timed out after {}ms",
                    self.config.connect_timeout.as_millis()
                ),
            };

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Connection attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RealtimeError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    warn!(attempts = backoff.failures(), error = %last_error, "Giving up on connection");
                    return Err(RealtimeError::ConnectionFailed {
                        attempts: backoff.failures(),
                        last_error,
                    });
                }
            }
        }
    }

    fn spawn_link(
        &self,
        socket: WsStream,
        adapter: Arc<dyn ProtocolAdapter>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(WS_CHANNEL_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(m) => m,
                        None => break,
                    },
                };
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "Failed to send WebSocket frame");
                    break;
                }
                if is_close {
                    break;
                }
            }
            trace!("Writer task finished");
        });

        let reader_cancel = cancel.clone();
        let reader_closing = closing.clone();
        let pong_tx = tx.clone();
        let state = self.state.clone();
        let reader = tokio::spawn(async move {
            let lost_reason = 'read: loop {
                let frame = tokio::select! {
                    _ = reader_cancel.cancelled() => break None,
                    frame = stream.next() => frame,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        for event in adapter.decode(&text) {
                            if events.send(event).is_err() {
                                debug!("Event receiver dropped, stopping reader");
                                break 'read None;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if pong_tx.try_send(Message::Pong(data)).is_err() {
                            debug!("Outbound queue full, skipping pong");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => format!("closed by provider ({}): {}", u16::from(f.code), f.reason),
                            None => "closed by provider".to_string(),
                        };
                        break Some(reason);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!(bytes = data.len(), "Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(format!("transport error: {e}")),
                    None => break Some("stream ended".to_string()),
                }
            };

            *state.write() = ConnectionState::Disconnected;
            if let Some(reason) = lost_reason {
                if !reader_closing.load(Ordering::Acquire) {
                    warn!(reason = %reason, "Connection lost");
                    let _ = events.send(EngineEvent::ConnectionLost { reason });
                }
            }
            trace!("Reader task finished");
        });

        *self.state.write() = ConnectionState::Connected;
        *self.link.lock() = Some(Link {
            outbound: tx,
            closing,
            cancel,
            reader,
            writer,
        });
    }

    /// Queue a text frame.
    ///
    /// Returns `false` and logs a warning when no connection is open; a closed
    /// transport is never an error here.
    pub async fn send(&self, text: String) -> bool {
        let outbound = self.link.lock().as_ref().map(|l| l.outbound.clone());
        let Some(outbound) = outbound else {
            warn!("Dropping outbound message, connection not open");
            return false;
        };
        if outbound.send(Message::Text(text.into())).await.is_err() {
            warn!("Dropping outbound message, connection closed");
            return false;
        }
        true
    }

    /// Close the connection gracefully, waiting at most the configured
    /// disconnect timeout for the close handshake. Resources are released
    /// in every case. Calling this without a connection is a no-op.
    pub async fn disconnect(&self) {
        let Some(link) = self.link.lock().take() else {
            return;
        };
        let Link {
            outbound,
            closing,
            cancel,
            mut reader,
            mut writer,
        } = link;

        *self.state.write() = ConnectionState::Closing;
        closing.store(true, Ordering::Release);

        let close_queued = outbound.try_send(Message::Close(None)).is_ok();
        drop(outbound);
        if close_queued {
            if tokio::time::timeout(self.config.disconnect_timeout, &mut reader)
                .await
                .is_err()
            {
                warn!(
                    timeout_ms = self.config.disconnect_timeout.as_millis() as u64,
                    "Close handshake timed out, dropping connection"
                );
            }
        }

        cancel.cancel();
        if tokio::time::timeout(Duration::from_millis(100), &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
        reader.abort();

        *self.state.write() = ConnectionState::Disconnected;
        info!("Disconnected from realtime provider");
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_socket(request: &ConnectRequest) -> RealtimeResult<WsStream> {
    let mut ws_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid URL: {e}")))?;

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("bad value for header {name}: {e}"))
        })?;
        ws_request.headers_mut().insert(name, value);
    }

    let (socket, _response) = tokio_tungstenite::connect_async(ws_request)
        .await
        .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
    Ok(socket)
}

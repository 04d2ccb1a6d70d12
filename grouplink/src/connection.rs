//! Connection lifecycle for one (group, user) pair.
//!
//! The [`ConnectionManager`] owns exactly one WebSocket to the chat backend
//! and drives the state machine `Idle -> Connecting -> Open -> Closed`, with
//! `Closed` looping back to `Connecting` under the reconnect policy or
//! terminating in `Idle` (explicit disconnect, auth failure, or exhausted
//! retry budget).
//!
//! All lifecycle work happens on a single supervisor task, so there is never
//! more than one outstanding connection or one pending backoff timer per
//! manager. Aborting the supervisor (via [`ConnectionManager::disconnect`])
//! cancels any pending timer and any in-flight handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use grouplink_proto::action::ClientAction;
use grouplink_proto::codec;
use grouplink_proto::event::ServerEvent;
use grouplink_proto::message::{GroupId, UserId};

use crate::auth::{AuthError, TokenProvider};
use crate::config::ReconnectPolicy;
use crate::session::SessionError;

/// Type alias for the write half of the backend WebSocket.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Type alias for the read half of the backend WebSocket.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no pending attempt. Terminal until `connect()`.
    Idle,
    /// Token resolution or WebSocket handshake in progress.
    Connecting,
    /// Live connection; sends are accepted.
    Open,
    /// Connection lost or refused; a reconnect may be pending.
    Closed,
}

/// Events emitted by a [`ConnectionManager`] toward the session pump.
///
/// Every event carries the manager's generation tag so events from a
/// superseded connection can be detected and discarded (stale delivery is
/// the primary correctness hazard of identity switches).
#[derive(Debug)]
pub enum ConnEvent {
    /// The connection reached `Open`.
    Opened {
        /// Generation of the emitting manager.
        generation: u64,
    },
    /// The connection dropped. Terminal outcomes (auth failure, exhausted
    /// budget) arrive as their own events instead.
    Closed {
        /// Generation of the emitting manager.
        generation: u64,
        /// Whether an automatic reconnect is scheduled.
        will_retry: bool,
    },
    /// Token resolution failed before connecting. No automatic retry.
    AuthFailed {
        /// Generation of the emitting manager.
        generation: u64,
        /// Description of the failure.
        reason: String,
    },
    /// The reconnect budget is exhausted; the manager is back in `Idle`
    /// and will only try again on an explicit `connect()`.
    RetriesExhausted {
        /// Generation of the emitting manager.
        generation: u64,
    },
    /// A decoded server event from the live connection.
    Event {
        /// Generation of the emitting manager.
        generation: u64,
        /// The decoded event.
        event: ServerEvent,
    },
}

impl ConnEvent {
    /// The generation tag of the manager that emitted this event.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation }
            | Self::Closed { generation, .. }
            | Self::AuthFailed { generation, .. }
            | Self::RetriesExhausted { generation }
            | Self::Event { generation, .. } => *generation,
        }
    }
}

/// Everything a manager needs to know to dial the backend.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Base WebSocket endpoint (e.g. `ws://localhost:8000/api`).
    pub endpoint: String,
    /// Identity of the connecting user.
    pub user_id: UserId,
    /// Group whose chat this connection carries.
    pub group_id: GroupId,
    /// WebSocket handshake timeout.
    pub connect_timeout: Duration,
    /// Automatic reconnection policy.
    pub reconnect: ReconnectPolicy,
}

/// Owns the persistent connection for one (group, user) pair.
///
/// Created by the session façade with a fresh generation tag on every
/// identity switch. `connect()` is idempotent; `disconnect()` is guaranteed
/// to leave no pending reconnect timer behind.
pub struct ConnectionManager<P: TokenProvider> {
    settings: ConnectionSettings,
    generation: u64,
    tokens: Arc<P>,
    events: mpsc::Sender<ConnEvent>,
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    writer: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    shutdown: Arc<AtomicBool>,
    supervisor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<P: TokenProvider + 'static> ConnectionManager<P> {
    /// Creates a manager in `Idle`. Nothing is dialed until `connect()`.
    #[must_use]
    pub fn new(
        settings: ConnectionSettings,
        generation: u64,
        tokens: Arc<P>,
        events: mpsc::Sender<ConnEvent>,
    ) -> Self {
        Self {
            settings,
            generation,
            tokens,
            events,
            state: Arc::new(parking_lot::Mutex::new(ConnectionState::Idle)),
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            supervisor: parking_lot::Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether sends are currently accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The generation tag all of this manager's events carry.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts (or restarts) the connection supervisor.
    ///
    /// Idempotent: if a supervisor is already running (connecting, open,
    /// or waiting out a backoff delay) this is a no-op.
    pub fn connect(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!(
                generation = self.generation,
                "connect ignored; supervisor already running"
            );
            return;
        }
        self.shutdown.store(false, Ordering::SeqCst);
        let task = Supervisor {
            settings: self.settings.clone(),
            generation: self.generation,
            tokens: Arc::clone(&self.tokens),
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            writer: Arc::clone(&self.writer),
            shutdown: Arc::clone(&self.shutdown),
        };
        *supervisor = Some(tokio::spawn(task.run()));
    }

    /// Tears the connection down and forces `Idle`.
    ///
    /// Cancels any pending reconnect timer and abandons any in-flight
    /// handshake by aborting the supervisor task, then closes the socket.
    pub async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            let _ = sink.close().await;
        }
        *self.state.lock() = ConnectionState::Idle;
        tracing::debug!(generation = self.generation, "disconnected");
    }

    /// Encodes and transmits a client action over the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the state is `Open`;
    /// nothing is queued for later delivery. Transport failures surface as
    /// [`SessionError::Transport`]; the reader side notices the broken
    /// socket and drives the reconnect policy.
    pub async fn send(&self, action: &ClientAction) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotConnected);
        }
        send_action(&self.writer, action).await
    }
}

/// Why a connection attempt did not reach `Open`.
enum ConnectFailure {
    /// Token resolution failed; terminal, no retry.
    Auth(AuthError),
    /// Handshake or transport failure; subject to the reconnect policy.
    Transport(String),
}

/// The single background task that owns one manager's lifecycle.
struct Supervisor<P: TokenProvider> {
    settings: ConnectionSettings,
    generation: u64,
    tokens: Arc<P>,
    events: mpsc::Sender<ConnEvent>,
    state: Arc<parking_lot::Mutex<ConnectionState>>,
    writer: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    shutdown: Arc<AtomicBool>,
}

impl<P: TokenProvider> Supervisor<P> {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            match self.establish().await {
                Ok(stream) => {
                    let (sink, reader) = stream.split();
                    *self.writer.lock().await = Some(sink);
                    self.set_state(ConnectionState::Open);
                    attempt = 0;
                    tracing::info!(
                        group = %self.settings.group_id,
                        user = %self.settings.user_id,
                        "connected to group chat backend"
                    );
                    if !self.emit(ConnEvent::Opened { generation: self.generation }).await {
                        self.close_writer().await;
                        break;
                    }

                    // Initial full-window history request. After a reconnect
                    // this doubles as the catch-up for the disconnected gap.
                    let initial = ClientAction::LoadHistory {
                        last_message_id: None,
                        user_id: self.settings.user_id.clone(),
                        group_id: self.settings.group_id,
                    };
                    if let Err(e) = send_action(&self.writer, &initial).await {
                        tracing::warn!(error = %e, "initial history request failed");
                    }

                    let receiver_gone = self.pump_reader(reader).await;
                    self.close_writer().await;
                    self.set_state(ConnectionState::Closed);
                    if receiver_gone {
                        break;
                    }
                }
                Err(ConnectFailure::Auth(err)) => {
                    tracing::warn!(error = %err, "token resolution failed; not retrying");
                    self.set_state(ConnectionState::Closed);
                    let _ = self
                        .emit(ConnEvent::AuthFailed {
                            generation: self.generation,
                            reason: err.to_string(),
                        })
                        .await;
                    self.set_state(ConnectionState::Idle);
                    return;
                }
                Err(ConnectFailure::Transport(reason)) => {
                    tracing::warn!(error = %reason, "connection attempt failed");
                    self.set_state(ConnectionState::Closed);
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            attempt += 1;
            if attempt > self.settings.reconnect.max_attempts {
                tracing::warn!(
                    attempts = attempt - 1,
                    "reconnect budget exhausted; waiting for manual reconnect"
                );
                self.set_state(ConnectionState::Idle);
                let _ = self
                    .emit(ConnEvent::RetriesExhausted { generation: self.generation })
                    .await;
                return;
            }

            let delay = self.settings.reconnect.delay_for_attempt(attempt);
            if !self
                .emit(ConnEvent::Closed {
                    generation: self.generation,
                    will_retry: true,
                })
                .await
            {
                break;
            }
            tracing::info!(
                attempt,
                max = self.settings.reconnect.max_attempts,
                ?delay,
                "reconnecting after backoff"
            );
            tokio::time::sleep(delay).await;
        }
        self.set_state(ConnectionState::Idle);
    }

    /// Resolve a fresh token (never cached across attempts; it may have
    /// expired) and perform the WebSocket handshake.
    async fn establish(
        &self,
    ) -> Result<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, ConnectFailure> {
        let token = self
            .tokens
            .bearer_token()
            .await
            .map_err(ConnectFailure::Auth)?;

        let url = connection_url(
            &self.settings.endpoint,
            &self.settings.user_id,
            self.settings.group_id,
            &token,
        )
        .map_err(ConnectFailure::Transport)?;

        let (stream, _response) =
            tokio::time::timeout(self.settings.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| ConnectFailure::Transport("websocket handshake timed out".into()))?
                .map_err(|e| ConnectFailure::Transport(e.to_string()))?;
        Ok(stream)
    }

    /// Reads frames until the connection dies. Returns `true` when the
    /// session-side event receiver is gone (the supervisor should exit
    /// entirely instead of reconnecting).
    async fn pump_reader(&self, mut reader: WsReader) -> bool {
        while let Some(frame) = reader.next().await {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            match frame {
                Ok(WsMessage::Text(text)) => match codec::decode(text.as_str()) {
                    Ok(event) => {
                        let conn_event = ConnEvent::Event {
                            generation: self.generation,
                            event,
                        };
                        if !self.emit(conn_event).await {
                            return true;
                        }
                    }
                    Err(e) => {
                        // Protocol errors never take the connection down.
                        tracing::warn!(error = %e, "unrecognized frame from backend, skipping");
                    }
                },
                Ok(WsMessage::Close(_)) => {
                    tracing::info!("backend closed the connection");
                    return false;
                }
                Ok(
                    WsMessage::Ping(_)
                    | WsMessage::Pong(_)
                    | WsMessage::Binary(_)
                    | WsMessage::Frame(_),
                ) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "websocket read error");
                    return false;
                }
            }
        }
        false
    }

    /// Closes and uninstalls the shared sink, if one is still installed.
    /// Every supervisor exit while a connection is up goes through here, so
    /// the socket never outlives the lifecycle that owns it.
    async fn close_writer(&self) {
        if let Some(mut sink) = self.writer.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    async fn emit(&self, event: ConnEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// Encodes an action and writes it to the shared sink, if one is installed.
async fn send_action(
    writer: &Arc<tokio::sync::Mutex<Option<WsSink>>>,
    action: &ClientAction,
) -> Result<(), SessionError> {
    let frame = codec::encode(action)?;
    let mut guard = writer.lock().await;
    let Some(sink) = guard.as_mut() else {
        return Err(SessionError::NotConnected);
    };
    sink.send(WsMessage::Text(frame.into()))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

/// Builds the connection URL: `<endpoint>/<user>/<group>/ws?token=...`.
///
/// The token travels as a query parameter because the WebSocket is
/// established before any header could be attached.
fn connection_url(
    endpoint: &str,
    user_id: &UserId,
    group_id: GroupId,
    token: &str,
) -> Result<Url, String> {
    let base = format!(
        "{}/{}/{}/ws",
        endpoint.trim_end_matches('/'),
        user_id.as_str(),
        group_id
    );
    let mut url = Url::parse(&base).map_err(|e| format!("invalid endpoint {base}: {e}"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

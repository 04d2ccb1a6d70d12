//! Session façade: binds one (group, user) identity to a connection manager
//! and a message store, and surfaces the imperative API plus callbacks the
//! UI consumes.
//!
//! Identity switches are atomic from the caller's perspective: the global
//! generation counter is bumped *before* the old connection is torn down, so
//! any event still in flight from the superseded connection fails the
//! generation check and is discarded instead of mutating the new store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use grouplink_proto::action::ClientAction;
use grouplink_proto::codec::CodecError;
use grouplink_proto::event::ServerEvent;
use grouplink_proto::message::{ContentType, GroupId, MessageId, UserId};

use crate::auth::{AuthError, TokenProvider};
use crate::config::SessionConfig;
use crate::connection::{ConnEvent, ConnectionManager, ConnectionSettings, ConnectionState};
use crate::store::{Appended, Message, MessageStore, Mutation};

/// Errors surfaced across the session API boundary.
///
/// These are returned, never thrown across callbacks; transport and protocol
/// hiccups are handled internally by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection is not `Open`; nothing was sent and nothing queued.
    #[error("not connected to the group chat backend")]
    NotConnected,

    /// No group session is active (no `switch()` yet, or already closed).
    #[error("no active group session")]
    NoActiveSession,

    /// A client action could not be serialized.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Token resolution failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The transport failed mid-send.
    #[error("transport error: {0}")]
    Transport(String),
}

/// The (group, user) pair a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Identity-provider user id.
    pub user_id: UserId,
    /// Selected study group.
    pub group_id: GroupId,
}

type NewMessageFn = Box<dyn Fn(&Message) + Send + Sync>;
type HistoryLoadedFn = Box<dyn Fn(&[Message]) + Send + Sync>;
type ConnectionChangeFn = Box<dyn Fn(bool) + Send + Sync>;

/// Caller-supplied callbacks relaying store changes to the UI layer.
pub struct SessionCallbacks {
    /// Invoked once per newly appended message (duplicates never refire).
    pub on_new_message: NewMessageFn,
    /// Invoked with the full reconciled history after each history page.
    pub on_history_loaded: HistoryLoadedFn,
    /// Invoked when connectivity changes; the UI is expected to reflect
    /// this rather than catch errors.
    pub on_connection_change: ConnectionChangeFn,
}

impl SessionCallbacks {
    /// Callbacks that do nothing. Useful as a base for struct updates.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            on_new_message: Box::new(|_| {}),
            on_history_loaded: Box::new(|_| {}),
            on_connection_change: Box::new(|_| {}),
        }
    }
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCallbacks { .. }")
    }
}

/// One live binding of identity -> connection + store + event pump.
struct ActiveSession<P: TokenProvider> {
    identity: Identity,
    generation: u64,
    manager: ConnectionManager<P>,
    store: Arc<Mutex<MessageStore>>,
    pump: tokio::task::JoinHandle<()>,
}

/// The public surface of the group chat core.
///
/// Owns at most one [`ActiveSession`] at a time. The message store and
/// connection manager of a session are exclusively owned here; no other
/// code mutates them.
pub struct SessionManager<P: TokenProvider> {
    config: SessionConfig,
    tokens: Arc<P>,
    callbacks: Arc<SessionCallbacks>,
    current_generation: Arc<AtomicU64>,
    active: Mutex<Option<Arc<ActiveSession<P>>>>,
}

impl<P: TokenProvider + 'static> SessionManager<P> {
    /// Creates a manager with no active session.
    #[must_use]
    pub fn new(config: SessionConfig, tokens: P, callbacks: SessionCallbacks) -> Self {
        Self {
            config,
            tokens: Arc::new(tokens),
            callbacks: Arc::new(callbacks),
            current_generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Binds to a new (group, user) identity.
    ///
    /// Tears down any previous session first (disconnects its manager,
    /// discards its store), then connects fresh instances. The generation
    /// counter is bumped before teardown begins, so no event from the old
    /// pair can ever reach the new store.
    pub async fn switch(&self, identity: Identity) {
        let generation = self.current_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.active.lock().take();
        if let Some(old) = previous {
            tracing::info!(
                from = %old.identity.group_id,
                to = %identity.group_id,
                superseded_generation = old.generation,
                "switching group session"
            );
            old.manager.disconnect().await;
            old.pump.abort();
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity);
        let settings = ConnectionSettings {
            endpoint: self.config.endpoint.clone(),
            user_id: identity.user_id.clone(),
            group_id: identity.group_id,
            connect_timeout: self.config.connect_timeout,
            reconnect: self.config.reconnect.clone(),
        };
        let manager = ConnectionManager::new(
            settings,
            generation,
            Arc::clone(&self.tokens),
            events_tx,
        );
        let store = Arc::new(Mutex::new(MessageStore::new()));

        let pump = tokio::spawn(run_pump(PumpContext {
            generation,
            current_generation: Arc::clone(&self.current_generation),
            store: Arc::clone(&store),
            callbacks: Arc::clone(&self.callbacks),
            events: events_rx,
        }));

        manager.connect();
        *self.active.lock() = Some(Arc::new(ActiveSession {
            identity,
            generation,
            manager,
            store,
            pump,
        }));
    }

    /// Tears down the active session without starting a successor.
    pub async fn close(&self) {
        self.current_generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.active.lock().take();
        if let Some(old) = previous {
            tracing::info!(
                group = %old.identity.group_id,
                generation = old.generation,
                "closing group session"
            );
            old.manager.disconnect().await;
            old.pump.abort();
        }
    }

    /// Posts a text message to the active group.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveSession`] without a session,
    /// [`SessionError::NotConnected`] unless the connection is `Open`.
    /// The message appears in the store only once its broadcast echo
    /// arrives; there is no optimistic local insert.
    pub async fn send_message(
        &self,
        content: impl Into<String> + Send,
        content_type: ContentType,
    ) -> Result<(), SessionError> {
        let session = self.active()?;
        let action = ClientAction::SendMessage {
            user_id: session.identity.user_id.clone(),
            group_id: session.identity.group_id,
            content: content.into(),
            content_type,
        };
        session.manager.send(&action).await
    }

    /// Replaces the content of an existing message.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Self::send_message`].
    pub async fn edit_message(
        &self,
        message_id: MessageId,
        content: impl Into<String> + Send,
        content_type: ContentType,
    ) -> Result<(), SessionError> {
        let session = self.active()?;
        let action = ClientAction::Edit {
            user_id: session.identity.user_id.clone(),
            message_id,
            group_id: session.identity.group_id,
            edited_content: content.into(),
            edited_type: content_type,
        };
        session.manager.send(&action).await
    }

    /// Deletes a message (the record keeps its position, content cleared).
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Self::send_message`].
    pub async fn delete_message(&self, message_id: MessageId) -> Result<(), SessionError> {
        let session = self.active()?;
        let action = ClientAction::Delete {
            delete_message_id: message_id,
            group_id: session.identity.group_id,
            user_id: session.identity.user_id.clone(),
        };
        session.manager.send(&action).await
    }

    /// Posts a reply referencing an earlier message.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Self::send_message`].
    pub async fn reply_to_message(
        &self,
        replied_message_id: MessageId,
        replied_to_id: MessageId,
        content: impl Into<String> + Send,
        content_type: ContentType,
    ) -> Result<(), SessionError> {
        let session = self.active()?;
        let action = ClientAction::Reply {
            replied_message_id,
            group_id: session.identity.group_id,
            replied_to_id,
            replied_by_id: session.identity.user_id.clone(),
            reply_content: content.into(),
            reply_content_type: content_type,
        };
        session.manager.send(&action).await
    }

    /// Requests the history page older than `last_message_id` (or the
    /// newest window when `None`).
    ///
    /// # Errors
    ///
    /// Same preconditions as [`Self::send_message`].
    pub async fn load_more_history(
        &self,
        last_message_id: Option<MessageId>,
    ) -> Result<(), SessionError> {
        let session = self.active()?;
        let action = ClientAction::LoadHistory {
            last_message_id,
            user_id: session.identity.user_id.clone(),
            group_id: session.identity.group_id,
        };
        session.manager.send(&action).await
    }

    /// Manual retry affordance, for after an auth failure or an exhausted
    /// reconnect budget. No-op while a supervisor is already running.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveSession`] without a session.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        let session = self.active()?;
        session.manager.connect();
        Ok(())
    }

    /// Whether the active session's connection is `Open`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|s| s.manager.is_open())
    }

    /// Lifecycle state of the active session (`Idle` without one).
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.active
            .lock()
            .as_ref()
            .map_or(ConnectionState::Idle, |s| s.manager.state())
    }

    /// Snapshot of the active session's history in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.active
            .lock()
            .as_ref()
            .map_or_else(Vec::new, |s| s.store.lock().messages().to_vec())
    }

    /// Pagination cursor: the id of the oldest loaded message.
    #[must_use]
    pub fn oldest_message_id(&self) -> Option<MessageId> {
        self.active
            .lock()
            .as_ref()
            .and_then(|s| s.store.lock().oldest_id())
    }

    /// The identity the active session is bound to.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.active.lock().as_ref().map(|s| s.identity.clone())
    }

    fn active(&self) -> Result<Arc<ActiveSession<P>>, SessionError> {
        self.active
            .lock()
            .clone()
            .ok_or(SessionError::NoActiveSession)
    }
}

/// State owned by one session's event pump task.
struct PumpContext {
    generation: u64,
    current_generation: Arc<AtomicU64>,
    store: Arc<Mutex<MessageStore>>,
    callbacks: Arc<SessionCallbacks>,
    events: mpsc::Receiver<ConnEvent>,
}

/// Drains connection events into the store and the UI callbacks.
///
/// Exits when the connection manager drops its sender or when the session
/// is superseded (generation mismatch).
async fn run_pump(mut ctx: PumpContext) {
    // Tracks whether this connection's initial history window has arrived;
    // reset on every (re)open so the catch-up window replaces the store.
    let mut history_primed = false;
    while let Some(event) = ctx.events.recv().await {
        if ctx.current_generation.load(Ordering::SeqCst) != ctx.generation {
            tracing::debug!(
                generation = ctx.generation,
                "discarding event from superseded connection"
            );
            break;
        }
        match event {
            ConnEvent::Opened { .. } => {
                history_primed = false;
                (ctx.callbacks.on_connection_change)(true);
            }
            ConnEvent::Closed { will_retry, .. } => {
                tracing::info!(will_retry, "connection closed");
                (ctx.callbacks.on_connection_change)(false);
            }
            ConnEvent::AuthFailed { reason, .. } => {
                tracing::warn!(%reason, "authentication failed; manual reconnect required");
                (ctx.callbacks.on_connection_change)(false);
            }
            ConnEvent::RetriesExhausted { .. } => {
                tracing::warn!("reconnect budget exhausted; manual reconnect required");
                (ctx.callbacks.on_connection_change)(false);
            }
            ConnEvent::Event { event, .. } => {
                apply_server_event(&mut history_primed, &ctx.store, &ctx.callbacks, event);
            }
        }
    }
}

/// Reconciles one decoded server event into the store and fires callbacks.
fn apply_server_event(
    history_primed: &mut bool,
    store: &Mutex<MessageStore>,
    callbacks: &SessionCallbacks,
    event: ServerEvent,
) {
    match event {
        ServerEvent::NewMessage(wire) => {
            let message = Message::from_wire(wire, Utc::now());
            let appended = store.lock().append(message.clone());
            match appended {
                Appended::Inserted => (callbacks.on_new_message)(&message),
                Appended::Duplicate => {
                    tracing::debug!(id = %message.id, "duplicate delivery dropped");
                }
            }
        }
        ServerEvent::HistoryLoaded(wires) => {
            let received_at = Utc::now();
            let page: Vec<Message> = wires
                .into_iter()
                .map(|w| Message::from_wire(w, received_at))
                .collect();
            let snapshot = {
                let mut guard = store.lock();
                if *history_primed {
                    let inserted = guard.prepend_history(page);
                    tracing::debug!(inserted, "older history page merged");
                } else {
                    guard.replace_all(page);
                    *history_primed = true;
                }
                guard.messages().to_vec()
            };
            (callbacks.on_history_loaded)(&snapshot);
        }
        ServerEvent::MessageEdited {
            message_id,
            edited_content,
            edited_type,
        } => {
            let outcome = store.lock().mark_edited(message_id, edited_content, edited_type);
            if outcome == Mutation::NotFound {
                tracing::debug!(id = %message_id, "edit targets a message outside the loaded window");
            }
        }
        ServerEvent::MessageDeleted { message_id } => {
            let outcome = store.lock().mark_deleted(message_id);
            if outcome == Mutation::NotFound {
                tracing::debug!(id = %message_id, "delete targets a message outside the loaded window");
            }
        }
        ServerEvent::Error { reason } => {
            // Application-level backend error: log only, never mutate
            // history, never tear the connection down.
            tracing::warn!(%reason, "backend reported an error");
        }
    }
}

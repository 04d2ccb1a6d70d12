//! Backend server core: shared state, WebSocket handler, and action dispatch.
//!
//! The backend accepts WebSocket connections at
//! `/api/{user_id}/{group_id}/ws?token=...`, registers the member in its
//! group, and serves the group chat actions: history pages go back to the
//! requester only, new messages and replies are broadcast to every member,
//! and edit and delete frames are applied to the log and rebroadcast
//! verbatim so every client reconciles the same way.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, ws::WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use grouplink_proto::action::ClientAction;
use grouplink_proto::message::UserId;
use serde_json::json;
use tokio::sync::mpsc;

use crate::groups::{DEFAULT_HISTORY_PAGE_SIZE, GroupDirectory};

/// Shared backend state holding the group directory.
pub struct BackendState {
    /// All group logs and member registries.
    pub groups: GroupDirectory,
    /// Number of messages per history page.
    history_page_size: usize,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Creates backend state with the default history page size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: GroupDirectory::new(),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
        }
    }

    /// Creates backend state with a custom history page size.
    #[must_use]
    pub fn with_config(history_page_size: usize) -> Self {
        Self {
            groups: GroupDirectory::new(),
            history_page_size,
        }
    }
}

/// Handles an upgraded WebSocket connection for one group member.
///
/// The connection lifecycle:
/// 1. Register the member in the group (replacing a stale duplicate).
/// 2. Spawn a writer task draining the member's channel to the socket.
/// 3. Read frames, dispatching each client action.
/// 4. On disconnect, remove the member from the group.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<BackendState>,
    user_id: String,
    group_id: i64,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if state.groups.join(group_id, &user_id, tx).await.is_some() {
        tracing::info!(user_id = %user_id, group_id, "replaced existing member connection");
    }
    tracing::info!(user_id = %user_id, group_id, "member connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(text.as_str(), &reader_user, group_id, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(user_id = %reader_user, group_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.groups.leave(group_id, &user_id).await;
    tracing::info!(user_id = %user_id, group_id, "member disconnected");
}

/// Parses and dispatches one text frame from a registered member.
///
/// The sender identity and target group always come from the connection
/// path, not from the frame payload, so a member cannot act as another user
/// or reach into another group.
async fn handle_text_frame(raw: &str, user_id: &str, group_id: i64, state: &Arc<BackendState>) {
    let action: ClientAction = match serde_json::from_str(raw) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(user_id = %user_id, group_id, error = %e, "unparseable frame");
            let reply = json!({ "error": format!("invalid frame: {e}") });
            state
                .groups
                .send_to(group_id, user_id, text_frame(&reply))
                .await;
            return;
        }
    };

    match action {
        ClientAction::LoadHistory {
            last_message_id, ..
        } => {
            let page = state
                .groups
                .history_page(group_id, last_message_id, state.history_page_size)
                .await;
            tracing::debug!(user_id = %user_id, group_id, count = page.len(), "serving history page");
            let reply = json!({ "action": "load_history", "history": page });
            state
                .groups
                .send_to(group_id, user_id, text_frame(&reply))
                .await;
        }
        ClientAction::SendMessage {
            content,
            content_type,
            ..
        } => {
            let stored = state
                .groups
                .append(group_id, &UserId::new(user_id), content, content_type, None)
                .await;
            tracing::debug!(user_id = %user_id, group_id, id = %stored.id, "message stored");
            let frame = json!({ "action": "new_message", "message": stored });
            state.groups.broadcast(group_id, &text_frame(&frame)).await;
        }
        ClientAction::Reply {
            replied_to_id,
            reply_content,
            reply_content_type,
            ..
        } => {
            let stored = state
                .groups
                .append(
                    group_id,
                    &UserId::new(user_id),
                    reply_content,
                    reply_content_type,
                    Some(replied_to_id),
                )
                .await;
            tracing::debug!(
                user_id = %user_id,
                group_id,
                id = %stored.id,
                replied_to = %replied_to_id,
                "reply stored"
            );
            let frame = json!({ "action": "new_message", "message": stored });
            state.groups.broadcast(group_id, &text_frame(&frame)).await;
        }
        ClientAction::Edit {
            message_id,
            ref edited_content,
            edited_type,
            ..
        } => {
            if state
                .groups
                .edit(group_id, message_id, edited_content, edited_type)
                .await
            {
                // Rebroadcast the client's frame verbatim so every member
                // applies the same edit.
                state
                    .groups
                    .broadcast(group_id, &Message::Text(raw.into()))
                    .await;
            } else {
                tracing::warn!(user_id = %user_id, group_id, id = %message_id, "edit of unknown message");
                let reply = json!({ "error": "message not found" });
                state
                    .groups
                    .send_to(group_id, user_id, text_frame(&reply))
                    .await;
            }
        }
        ClientAction::Delete {
            delete_message_id, ..
        } => {
            if state.groups.delete(group_id, delete_message_id).await {
                state
                    .groups
                    .broadcast(group_id, &Message::Text(raw.into()))
                    .await;
            } else {
                tracing::warn!(
                    user_id = %user_id,
                    group_id,
                    id = %delete_message_id,
                    "delete of unknown message"
                );
                let reply = json!({ "error": "message not found" });
                state
                    .groups
                    .send_to(group_id, user_id, text_frame(&reply))
                    .await;
            }
        }
    }
}

/// Serializes a JSON value into a WebSocket text frame.
fn text_frame(value: &serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Starts the backend server on the given address and returns the bound
/// address and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BackendState::new())).await
}

/// Starts the backend server with a pre-configured [`BackendState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/api/{user_id}/{group_id}/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that checks the token and upgrades to a WebSocket.
///
/// A missing or empty `token` query parameter rejects the connection with
/// 401 before the upgrade, matching how an expired credential surfaces to
/// the client as a failed handshake rather than a dropped socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((user_id, group_id)): Path<(String, i64)>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<BackendState>>,
) -> Response {
    match params.get("token") {
        Some(token) if !token.is_empty() => ws
            .on_upgrade(move |socket| handle_socket(socket, state, user_id, group_id))
            .into_response(),
        _ => {
            tracing::warn!(user_id = %user_id, group_id, "rejected connection without token");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

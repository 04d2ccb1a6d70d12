//! Encoding and decoding for the group chat JSON wire format.
//!
//! A stateless translator between typed values and WebSocket text frames.
//! No retries, no queuing, no I/O; connection policy lives entirely in the
//! client's connection manager.

use serde::Deserialize;

use crate::action::ClientAction;
use crate::event::ServerEvent;
use crate::message::{ContentType, MessageId, WireMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization of a client action failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// An incoming frame was not valid JSON or carried an action this
    /// client does not recognize. Callers log and continue; a bad frame
    /// must never take the connection down.
    #[error("unrecognized frame: {0}")]
    UnrecognizedFrame(String),
}

/// Encodes a [`ClientAction`] into a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the action cannot be serialized.
pub fn encode(action: &ClientAction) -> Result<String, CodecError> {
    serde_json::to_string(action).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an incoming text frame into a [`ServerEvent`].
///
/// # Errors
///
/// Returns `CodecError::UnrecognizedFrame` for malformed JSON, an unknown
/// `action` tag, or a frame matching none of the known envelope shapes.
pub fn decode(raw: &str) -> Result<ServerEvent, CodecError> {
    match serde_json::from_str::<TaggedFrame>(raw) {
        Ok(frame) => Ok(frame.into()),
        Err(tagged_err) => {
            // The error envelope carries no `action` field at all.
            if let Ok(frame) = serde_json::from_str::<ErrorFrame>(raw) {
                return Ok(ServerEvent::Error { reason: frame.error });
            }
            Err(CodecError::UnrecognizedFrame(tagged_err.to_string()))
        }
    }
}

/// Action-tagged server envelopes. Edit and delete arrive in the same
/// envelope shape the originating client sent, rebroadcast by the backend.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TaggedFrame {
    NewMessage { message: WireMessage },
    LoadHistory { history: Vec<WireMessage> },
    Edit { payload: EditFrame },
    Delete { payload: DeleteFrame },
}

#[derive(Deserialize)]
struct EditFrame {
    message_id: MessageId,
    edited_content: String,
    edited_type: ContentType,
}

#[derive(Deserialize)]
struct DeleteFrame {
    delete_message_id: MessageId,
}

#[derive(Deserialize)]
struct ErrorFrame {
    error: String,
}

impl From<TaggedFrame> for ServerEvent {
    fn from(frame: TaggedFrame) -> Self {
        match frame {
            TaggedFrame::NewMessage { message } => Self::NewMessage(message),
            TaggedFrame::LoadHistory { history } => Self::HistoryLoaded(history),
            TaggedFrame::Edit { payload } => Self::MessageEdited {
                message_id: payload.message_id,
                edited_content: payload.edited_content,
                edited_type: payload.edited_type,
            },
            TaggedFrame::Delete { payload } => Self::MessageDeleted {
                message_id: payload.delete_message_id,
            },
        }
    }
}

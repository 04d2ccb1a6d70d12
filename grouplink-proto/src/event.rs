//! Server-to-client events of the group chat protocol.
//!
//! The backend emits three envelope shapes: `{"action": "new_message",
//! "message": {..}}`, `{"action": "load_history", "history": [..]}` and a
//! bare `{"error": "..."}` object with no `action` field. Edit and delete
//! requests are rebroadcast to the whole group in their client envelope
//! shape, so those decode here as events too.

use crate::message::{ContentType, MessageId, WireMessage};

/// A decoded server event, ready for session-level reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A message was posted to the group (including echoes of our own sends).
    NewMessage(WireMessage),
    /// A history page, oldest first, in the order the backend stores it.
    HistoryLoaded(Vec<WireMessage>),
    /// An existing message's content was replaced.
    MessageEdited {
        /// Message that was edited.
        message_id: MessageId,
        /// Replacement content.
        edited_content: String,
        /// Replacement content kind.
        edited_type: ContentType,
    },
    /// An existing message was deleted; it keeps its id and position.
    MessageDeleted {
        /// Message that was deleted.
        message_id: MessageId,
    },
    /// The backend reported an application-level error for this connection.
    /// Does not terminate the connection and never mutates local history.
    Error {
        /// Human-readable error description from the backend.
        reason: String,
    },
}

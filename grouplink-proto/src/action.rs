//! Client-to-server actions of the group chat protocol.
//!
//! Every client frame is a JSON object of the form
//! `{"action": "<name>", "payload": {..}}`. The payload field names below
//! reproduce the backend's request schemas exactly; the serde attributes on
//! the enum are what produce the envelope shape.

use serde::{Deserialize, Serialize};

use crate::message::{ContentType, GroupId, MessageId, UserId};

/// A typed client action, serialized as `{"action", "payload"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum ClientAction {
    /// Request a page of history. `last_message_id: None` asks for the
    /// newest window; `Some(id)` pages backward from (and excluding) `id`.
    LoadHistory {
        /// Pagination cursor, or `None` for the initial window.
        last_message_id: Option<MessageId>,
        /// Requesting user.
        user_id: UserId,
        /// Group whose history is requested.
        group_id: GroupId,
    },

    /// Post a new message to the group.
    SendMessage {
        /// Author.
        user_id: UserId,
        /// Target group.
        group_id: GroupId,
        /// Text payload.
        content: String,
        /// Content kind tag.
        #[serde(rename = "type")]
        content_type: ContentType,
    },

    /// Replace the content of an existing message.
    Edit {
        /// Requesting user (must be the author; enforced server-side).
        user_id: UserId,
        /// Message being edited.
        message_id: MessageId,
        /// Group the message belongs to.
        group_id: GroupId,
        /// Replacement content.
        edited_content: String,
        /// Replacement content kind.
        edited_type: ContentType,
    },

    /// Post a new message that references an earlier one.
    Reply {
        /// Server-assigned id slot for the reply (backend schema field).
        replied_message_id: MessageId,
        /// Target group.
        group_id: GroupId,
        /// The message being replied to.
        replied_to_id: MessageId,
        /// Author of the reply.
        replied_by_id: UserId,
        /// Text payload of the reply.
        reply_content: String,
        /// Content kind of the reply.
        reply_content_type: ContentType,
    },

    /// Remove a message. The record keeps its id and position server-side;
    /// only the content is cleared.
    Delete {
        /// Message being deleted.
        delete_message_id: MessageId,
        /// Group the message belongs to.
        group_id: GroupId,
        /// Requesting user.
        user_id: UserId,
    },
}

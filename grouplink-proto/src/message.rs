//! Identity and message types as they appear on the wire.
//!
//! The backend speaks JSON text frames over a persistent WebSocket. Ids are
//! server-assigned: message and group ids are signed 64-bit integers from the
//! backend's database sequence, user ids are opaque identity-provider strings.

use serde::{Deserialize, Serialize};

/// Opaque identity of a chat participant, issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps an identity-provider user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one study group. Group chat histories are keyed per group, so
/// message id collisions across groups are irrelevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i64);

impl GroupId {
    /// Creates a group id from its backend value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw backend value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier of a message, unique within its group's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// Creates a message id from its backend value.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw backend value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content kind tag carried in the wire `type` field.
///
/// Only `text` exists today; unrecognized tags from newer backends decode to
/// [`ContentType::Unknown`] instead of failing the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Plain text payload.
    Text,
    /// A content kind this client does not understand yet.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One message record as the backend transmits it.
///
/// `replied_to_id` is a weak back-reference: the referent may be older than
/// the loaded history window, and consumers must tolerate it dangling.
/// Extra fields the backend may add are ignored on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server-assigned message id.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Text payload.
    pub content: String,
    /// Content kind tag.
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Message this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_id: Option<MessageId>,
    /// Whether the content has been edited since the original post.
    /// Absent on the wire for untouched messages.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
    /// Whether the message was deleted. A deleted record keeps its id and
    /// position in the history with cleared content, so a history load
    /// after the fact still reconstructs the deletion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

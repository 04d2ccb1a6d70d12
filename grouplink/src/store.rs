//! Local message history for one group session.
//!
//! The store keeps messages in arrival order, not `created_at` order, so
//! clock skew between clients can never reorder the visible list, and
//! deduplicates by server-assigned id. History windows are inherently
//! partial, so every operation that targets an id treats absence as a
//! recoverable no-op rather than an error; nothing in this module panics
//! or returns `Err`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use grouplink_proto::message::{ContentType, MessageId, UserId, WireMessage};

/// One entry in a group's local history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned id, unique within the group's history.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Text payload. Cleared when the message is deleted.
    pub content: String,
    /// Content kind tag.
    pub content_type: ContentType,
    /// Client-observed receipt time. The protocol does not echo a server
    /// timestamp, so this is when *we* first saw the message.
    pub created_at: DateTime<Utc>,
    /// Weak reference to the message this one replies to. May dangle when
    /// the referent is older than the loaded window; render as
    /// "message unavailable" in that case.
    pub replied_to_id: Option<MessageId>,
    /// Set when an edit has been applied locally.
    pub edited_at: Option<DateTime<Utc>>,
    /// Set when the message was deleted. The entry keeps its id and
    /// position; only the content is cleared.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Builds a history entry from its wire form, stamping the given
    /// receipt time.
    ///
    /// Edit and delete flags on the record come from the backend's log, so
    /// a history load after the fact reconstructs edits and deletions that
    /// happened while we were not listening. The flags carry no timestamp
    /// of their own; the receipt time stands in.
    #[must_use]
    pub fn from_wire(wire: WireMessage, received_at: DateTime<Utc>) -> Self {
        Self {
            id: wire.id,
            sender_id: wire.sender_id,
            content: wire.content,
            content_type: wire.content_type,
            created_at: received_at,
            replied_to_id: wire.replied_to_id,
            edited_at: wire.edited.then_some(received_at),
            deleted_at: wire.deleted.then_some(received_at),
        }
    }

    /// Whether this message has been deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Outcome of [`MessageStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// The message was new and is now the tail of the history.
    Inserted,
    /// A message with this id was already present; the store is unchanged.
    /// Guards against duplicate delivery on reconnect re-subscription.
    Duplicate,
}

/// Outcome of an in-place mutation ([`MessageStore::mark_edited`] /
/// [`MessageStore::mark_deleted`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// The target was found and mutated.
    Applied,
    /// The target id is outside the loaded window; the store is unchanged.
    /// A soft inconsistency, not an error.
    NotFound,
}

/// Ordered, deduplicated in-memory history of one group's messages.
///
/// Exclusively owned by the session that created it; never shared across
/// sessions.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<Message>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message at the tail. Idempotent by id.
    pub fn append(&mut self, message: Message) -> Appended {
        if !self.ids.insert(message.id) {
            return Appended::Duplicate;
        }
        self.entries.push(message);
        Appended::Inserted
    }

    /// Inserts an older history page at the head, preserving the page's
    /// internal order and skipping ids already present. Returns how many
    /// entries were actually inserted.
    pub fn prepend_history(&mut self, page: Vec<Message>) -> usize {
        let fresh: Vec<Message> = page
            .into_iter()
            .filter(|m| self.ids.insert(m.id))
            .collect();
        let inserted = fresh.len();
        if inserted > 0 {
            self.entries.splice(0..0, fresh);
        }
        inserted
    }

    /// Replaces the entire history with the given window, deduplicating by
    /// id within the window (first occurrence wins). Used for the initial
    /// load after each (re)connect, which doubles as the catch-up for
    /// messages missed while disconnected.
    pub fn replace_all(&mut self, window: Vec<Message>) {
        self.entries.clear();
        self.ids.clear();
        for message in window {
            if self.ids.insert(message.id) {
                self.entries.push(message);
            }
        }
    }

    /// Replaces a message's content in place. Absent ids are a no-op.
    pub fn mark_edited(
        &mut self,
        id: MessageId,
        content: String,
        content_type: ContentType,
    ) -> Mutation {
        match self.entries.iter_mut().find(|m| m.id == id) {
            Some(entry) => {
                entry.content = content;
                entry.content_type = content_type;
                entry.edited_at = Some(Utc::now());
                Mutation::Applied
            }
            None => Mutation::NotFound,
        }
    }

    /// Clears a message's content and flags it deleted, keeping its id and
    /// position. Absent ids are a no-op.
    pub fn mark_deleted(&mut self, id: MessageId) -> Mutation {
        match self.entries.iter_mut().find(|m| m.id == id) {
            Some(entry) => {
                entry.content.clear();
                entry.deleted_at = Some(Utc::now());
                Mutation::Applied
            }
            None => Mutation::NotFound,
        }
    }

    /// The current history in arrival order. Read-only; safe to call
    /// repeatedly.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Number of entries currently loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a message with this id is in the loaded window.
    #[must_use]
    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    /// Id of the oldest loaded message, the pagination cursor for
    /// requesting the next older page.
    #[must_use]
    pub fn oldest_id(&self) -> Option<MessageId> {
        self.entries.first().map(|m| m.id)
    }
}

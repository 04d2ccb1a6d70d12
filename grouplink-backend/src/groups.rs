//! Per-group message logs and member registries.
//!
//! The [`GroupDirectory`] owns every group's state: an append-only message
//! log with group-local monotonic ids, and the set of currently connected
//! members with a channel sender per member for WebSocket delivery.
//! Groups are created lazily on first join.

use std::collections::HashMap;

use axum::extract::ws::Message;
use grouplink_proto::message::{ContentType, MessageId, UserId, WireMessage};
use tokio::sync::{RwLock, mpsc};

/// Default number of messages returned per history page.
pub const DEFAULT_HISTORY_PAGE_SIZE: usize = 50;

/// State of a single group: its log and connected members.
#[derive(Default)]
struct GroupState {
    /// Next message id to assign. Ids are group-local and start at 1.
    next_id: i64,
    /// Append-only log in id order. Deleted messages keep their slot with
    /// cleared content so reply references stay resolvable.
    log: Vec<WireMessage>,
    /// Connected members, keyed by user id.
    members: HashMap<String, mpsc::UnboundedSender<Message>>,
}

impl GroupState {
    fn assign_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId::new(self.next_id)
    }
}

/// Directory of all groups, keyed by group id.
///
/// Thread-safe via [`RwLock`]. Every operation takes the raw `i64` group id
/// from the connection path.
#[derive(Default)]
pub struct GroupDirectory {
    groups: RwLock<HashMap<i64, GroupState>>,
}

impl GroupDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a member in a group, creating the group if needed.
    ///
    /// If the user was already connected, the old sender is replaced and the
    /// previous writer task shuts down when it observes the channel closure.
    pub async fn join(
        &self,
        group_id: i64,
        user_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        let mut groups = self.groups.write().await;
        let group = groups.entry(group_id).or_default();
        group.members.insert(user_id.to_string(), sender)
    }

    /// Removes a member from a group.
    pub async fn leave(&self, group_id: i64, user_id: &str) {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get_mut(&group_id) {
            group.members.remove(user_id);
        }
    }

    /// Appends a message to a group's log, assigning the next id.
    ///
    /// Returns the stored record with its server-assigned id.
    pub async fn append(
        &self,
        group_id: i64,
        sender_id: &UserId,
        content: String,
        content_type: ContentType,
        replied_to_id: Option<MessageId>,
    ) -> WireMessage {
        let mut groups = self.groups.write().await;
        let group = groups.entry(group_id).or_default();
        let message = WireMessage {
            id: group.assign_id(),
            sender_id: sender_id.clone(),
            content,
            content_type,
            replied_to_id,
            edited: false,
            deleted: false,
        };
        group.log.push(message.clone());
        message
    }

    /// Returns one page of history in ascending id order.
    ///
    /// With no cursor, this is the newest `page_size` messages. With a
    /// cursor, it is the `page_size` messages immediately older than (and
    /// excluding) the cursor id. An unknown group yields an empty page.
    pub async fn history_page(
        &self,
        group_id: i64,
        before: Option<MessageId>,
        page_size: usize,
    ) -> Vec<WireMessage> {
        let groups = self.groups.read().await;
        let Some(group) = groups.get(&group_id) else {
            return Vec::new();
        };
        let end = match before {
            Some(cursor) => group.log.partition_point(|m| m.id < cursor),
            None => group.log.len(),
        };
        let start = end.saturating_sub(page_size);
        group.log[start..end].to_vec()
    }

    /// Replaces the content of a message in place and flags it as edited,
    /// so history pages served later reflect the edit.
    ///
    /// Returns `false` if the group or message does not exist.
    pub async fn edit(
        &self,
        group_id: i64,
        message_id: MessageId,
        content: &str,
        content_type: ContentType,
    ) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get_mut(&group_id) else {
            return false;
        };
        match group.log.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.content = content.to_string();
                message.content_type = content_type;
                message.edited = true;
                true
            }
            None => false,
        }
    }

    /// Clears the content of a message and flags it as deleted, keeping its
    /// id and position, so history pages served later reconstruct the
    /// deletion for clients that did not see the live delete frame.
    ///
    /// Returns `false` if the group or message does not exist.
    pub async fn delete(&self, group_id: i64, message_id: MessageId) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get_mut(&group_id) else {
            return false;
        };
        match group.log.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.content = String::new();
                message.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Sends a frame to every connected member of a group, the originator
    /// included. Send failures are ignored; the member's reader loop handles
    /// its own disconnect.
    pub async fn broadcast(&self, group_id: i64, frame: &Message) {
        let groups = self.groups.read().await;
        if let Some(group) = groups.get(&group_id) {
            for (user_id, sender) in &group.members {
                if sender.send(frame.clone()).is_err() {
                    tracing::debug!(user_id = %user_id, "broadcast to closed channel");
                }
            }
        }
    }

    /// Sends a frame to one member of a group, if connected.
    pub async fn send_to(&self, group_id: i64, user_id: &str, frame: Message) {
        let groups = self.groups.read().await;
        if let Some(sender) = groups.get(&group_id).and_then(|g| g.members.get(user_id)) {
            let _ = sender.send(frame);
        }
    }

    /// Returns the number of connected members in a group.
    pub async fn member_count(&self, group_id: i64) -> usize {
        let groups = self.groups.read().await;
        groups.get(&group_id).map_or(0, |g| g.members.len())
    }
}

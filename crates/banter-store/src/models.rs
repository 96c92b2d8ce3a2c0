//! Records held by the document-store collaborator.
//!
//! These are the authoritative shapes; the engine only ever holds transient
//! projections of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use banter_shared::attachments::Attachment;
use banter_shared::room::RoomId;
use banter_shared::types::{GroupId, MessageId, MessageKind, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Deactivated accounts fail the gateway's resolution step.
    pub active: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredGroup {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserId>,
}

impl StoredGroup {
    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Insert payload for a new message. The store assigns id, timestamp and
/// sequence number at commit time; client-supplied time is never trusted.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub room_id: RoomId,
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
}

/// Authoritative message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub group: Option<GroupId>,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<MessageId>,
    /// Assigned at commit; room ordering key together with `seq`.
    pub timestamp: DateTime<Utc>,
    /// Insertion order, breaks timestamp ties within a room.
    pub seq: u64,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<ReadReceipt>,
}

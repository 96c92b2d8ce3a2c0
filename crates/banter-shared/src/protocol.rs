//! Wire protocol between clients and the session engine.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}`.
//! Inbound frames deserialize into [`ClientEvent`]; unknown event names or
//! malformed payloads fail at the boundary and never reach a component.
//! Outbound frames serialize from [`ServerEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachments::Attachment;
use crate::room::RoomId;
use crate::types::{
    GroupId, MessageId, MessageKind, OnlineUser, UploadId, UserId, UserProfile,
};

/// Conversation target of a send / typing / upload / call-end signal:
/// exactly one of a direct receiver or a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Direct(UserId),
    Group(GroupId),
}

impl ChatTarget {
    /// Enforce the exactly-one-of invariant over the sibling wire fields
    /// `receiver_id` / `group_id`.
    pub fn resolve(
        receiver_id: &Option<UserId>,
        group_id: &Option<GroupId>,
    ) -> Result<Self, TargetError> {
        match (receiver_id, group_id) {
            (Some(user), None) => Ok(Self::Direct(user.clone())),
            (None, Some(group)) => Ok(Self::Group(group.clone())),
            (Some(_), Some(_)) => Err(TargetError::Ambiguous),
            (None, None) => Err(TargetError::Missing),
        }
    }

    /// Room id for this target as seen by `sender`.
    pub fn room_id(&self, sender: &UserId) -> RoomId {
        match self {
            Self::Direct(receiver) => RoomId::direct(sender, receiver),
            Self::Group(group) => RoomId::group(group),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("both receiver_id and group_id were set")]
    Ambiguous,
    #[error("neither receiver_id nor group_id was set")]
    Missing,
}

/// Inbound events (client -> engine).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    SendMessage {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },
    StartTyping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
    StopTyping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
    UploadFile {
        upload_id: UploadId,
        /// Base64-encoded file content.
        file_data: String,
        file_name: String,
        file_size: u64,
        file_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
    MarkMessageRead {
        message_id: MessageId,
    },
    UpdateMessage {
        message_id: MessageId,
        content: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    ReactMessage {
        message_id: MessageId,
        emoji: String,
    },
    RemoveReaction {
        message_id: MessageId,
    },
    VideoCallOffer {
        target_id: UserId,
        payload: serde_json::Value,
    },
    VideoCallAnswer {
        target_id: UserId,
        payload: serde_json::Value,
    },
    VideoCallIceCandidate {
        target_id: UserId,
        payload: serde_json::Value,
    },
    VideoCallEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
    },
}

/// One reaction on a message. At most one per user; a newer reaction from
/// the same user replaces the older one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionView {
    pub user_id: UserId,
    pub emoji: String,
    pub at: DateTime<Utc>,
}

/// One read receipt on a message. At most one per reader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceiptView {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupView {
    pub id: GroupId,
    pub name: String,
}

/// Enriched message payload broadcast to a room and replayed as history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: UserProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupView>,
    pub content: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    pub edited: bool,
    pub deleted: bool,
    pub reactions: Vec<ReactionView>,
    pub read_by: Vec<ReadReceiptView>,
}

/// Outbound events (engine -> client).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        user: UserProfile,
    },
    OnlineUsers {
        users: Vec<OnlineUser>,
    },
    UserOnline {
        user: UserProfile,
    },
    UserOffline {
        user_id: UserId,
        last_seen: DateTime<Utc>,
    },
    /// History replay delivered once to a joining connection.
    LoadMessages {
        room_id: RoomId,
        messages: Vec<MessageView>,
    },
    /// Direct-message fanout to the receiving side of a room.
    MessageReceived {
        message: MessageView,
    },
    /// Group-message fanout to every member except the sender.
    NewGroupMessage {
        message: MessageView,
    },
    /// Acknowledgement to the sender carrying the enriched record.
    MessageSent {
        message: MessageView,
    },
    UserTyping {
        room_id: RoomId,
        user: UserProfile,
    },
    UserStoppedTyping {
        room_id: RoomId,
        user_id: UserId,
    },
    UploadProgress {
        upload_id: UploadId,
        percent: u8,
    },
    UploadComplete {
        upload_id: UploadId,
        message: MessageView,
    },
    UploadError {
        upload_id: UploadId,
        reason: String,
    },
    MessageRead {
        message_id: MessageId,
        room_id: RoomId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    },
    MessageUpdated {
        message: MessageView,
    },
    MessageDeleted {
        message_id: MessageId,
        room_id: RoomId,
    },
    MessageReaction {
        message_id: MessageId,
        room_id: RoomId,
        reactions: Vec<ReactionView>,
    },
    VideoCallOffer {
        from: UserProfile,
        payload: serde_json::Value,
    },
    VideoCallAnswer {
        from: UserId,
        payload: serde_json::Value,
    },
    VideoCallIceCandidate {
        from: UserId,
        payload: serde_json::Value,
    },
    VideoCallEnded {
        room_id: RoomId,
        from: UserId,
    },
    /// Scoped error event, delivered to the originating connection only.
    Error {
        message: String,
    },
}

impl ClientEvent {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        // ServerEvent contains no non-serializable types; this cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"event\":\"error\",\"data\":{\"message\":\"encoding failure\"}}".to_string()
        })
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use banter_shared::room::RoomId;
use banter_shared::types::{GroupId, MessageId, UserId};

use crate::error::{BlobError, Result, TokenError};
use crate::models::{MessageDraft, StoredGroup, StoredMessage, StoredUser};

/// Identity claim produced by a successful token verification.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: UserId,
}

/// Credential verification collaborator. Consulted once per connection, at
/// handshake time.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError>;
}

/// User side of the document-store collaborator.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<StoredUser>>;

    /// Best-effort last-seen update fired on disconnect. Failures are the
    /// caller's to log; they are never surfaced to clients.
    async fn touch_last_seen(&self, id: &UserId, at: DateTime<Utc>) -> Result<()>;
}

/// Group side of the document-store collaborator.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn find_group(&self, id: &GroupId) -> Result<Option<StoredGroup>>;
}

/// Message side of the document-store collaborator.
///
/// `insert` assigns the server-side timestamp and a monotonically
/// increasing sequence number; room ordering is `(timestamp, seq)`.
/// Mutation methods return the updated record and fail with
/// [`crate::StoreError::NotFound`] for unknown ids.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, draft: MessageDraft) -> Result<StoredMessage>;

    async fn find(&self, id: &MessageId) -> Result<Option<StoredMessage>>;

    /// Most recent `limit` messages for a room, ascending by commit order.
    async fn recent_for_room(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>>;

    async fn set_content(
        &self,
        id: &MessageId,
        content: String,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage>;

    async fn mark_deleted(&self, id: &MessageId, at: DateTime<Utc>) -> Result<StoredMessage>;

    /// Idempotent per (message, reader): a second receipt from the same
    /// reader leaves the record unchanged.
    async fn add_read_receipt(
        &self,
        id: &MessageId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage>;

    /// At most one reaction per (message, user); replaces any prior entry.
    async fn set_reaction(
        &self,
        id: &MessageId,
        user: UserId,
        emoji: String,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage>;

    async fn remove_reaction(&self, id: &MessageId, user: &UserId) -> Result<StoredMessage>;
}

/// Options accompanying a blob upload.
#[derive(Debug, Clone)]
pub struct BlobUploadOptions {
    pub filename: String,
    pub mime: String,
}

/// Result of a successful blob upload.
#[derive(Debug, Clone)]
pub struct BlobHandle {
    pub url: String,
}

/// Object-storage collaborator for attachment payloads. One request/response
/// per upload; there is no partial-progress reporting at this interface.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        data: Vec<u8>,
        options: BlobUploadOptions,
    ) -> std::result::Result<BlobHandle, BlobError>;
}

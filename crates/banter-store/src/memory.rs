//! In-memory collaborator implementations.
//!
//! These back the dev server and the engine's test suites. They honor the
//! same contracts a real backend would: server-assigned timestamps and
//! sequence numbers, idempotent read receipts, replace-semantics reactions,
//! and a distinct "not found" failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use banter_shared::room::RoomId;
use banter_shared::types::{GroupId, MessageId, UserId};

use crate::error::{BlobError, Result, StoreError, TokenError};
use crate::models::{
    MessageDraft, Reaction, ReadReceipt, StoredGroup, StoredMessage, StoredUser,
};
use crate::traits::{
    BlobHandle, BlobStore, BlobUploadOptions, Claims, GroupStore, MessageStore, TokenVerifier,
    UserStore,
};

// ---------------------------------------------------------------------------
// Users and groups
// ---------------------------------------------------------------------------

/// In-memory user/group directory.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<UserId, StoredUser>>,
    groups: RwLock<HashMap<GroupId, StoredGroup>>,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add_user(&self, user: StoredUser) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn add_group(&self, group: StoredGroup) {
        self.groups.write().await.insert(group.id.clone(), group);
    }
}

/// Shorthand for seeding an active user.
pub fn active_user(id: &str, display_name: &str) -> StoredUser {
    StoredUser {
        id: UserId::new(id),
        display_name: display_name.to_string(),
        avatar_url: None,
        active: true,
        last_seen: Utc::now(),
    }
}

#[async_trait]
impl UserStore for MemoryDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<StoredUser>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn touch_last_seen(&self, id: &UserId, at: DateTime<Utc>) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.last_seen = at;
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MemoryDirectory {
    async fn find_group(&self, id: &GroupId) -> Result<Option<StoredGroup>> {
        Ok(self.groups.read().await.get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// In-memory message store. Commit order is the `seq` counter.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<HashMap<MessageId, StoredMessage>>,
    seq: AtomicU64,
    fail_next_insert: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Test hook: make the next `insert` fail with a backend error.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, draft: MessageDraft) -> Result<StoredMessage> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("induced write failure".to_string()));
        }

        let message = StoredMessage {
            id: MessageId::new(),
            room_id: draft.room_id,
            sender: draft.sender,
            receiver: draft.receiver,
            group: draft.group,
            content: draft.content,
            kind: draft.kind,
            attachment: draft.attachment,
            reply_to: draft.reply_to,
            timestamp: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            reactions: Vec::new(),
            read_by: Vec::new(),
        };

        self.messages
            .write()
            .await
            .insert(message.id, message.clone());
        Ok(message)
    }

    async fn find(&self, id: &MessageId) -> Result<Option<StoredMessage>> {
        Ok(self.messages.read().await.get(id).cloned())
    }

    async fn recent_for_room(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>> {
        let messages = self.messages.read().await;
        let mut in_room: Vec<StoredMessage> = messages
            .values()
            .filter(|m| &m.room_id == room)
            .cloned()
            .collect();
        in_room.sort_by_key(|m| (m.timestamp, m.seq));

        // Keep the most recent `limit`, still ascending.
        if in_room.len() > limit {
            in_room.drain(..in_room.len() - limit);
        }
        Ok(in_room)
    }

    async fn set_content(
        &self,
        id: &MessageId,
        content: String,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(id).ok_or(StoreError::NotFound)?;
        message.content = content;
        message.edited = true;
        message.edited_at = Some(at);
        Ok(message.clone())
    }

    async fn mark_deleted(&self, id: &MessageId, at: DateTime<Utc>) -> Result<StoredMessage> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(id).ok_or(StoreError::NotFound)?;
        message.deleted = true;
        message.deleted_at = Some(at);
        Ok(message.clone())
    }

    async fn add_read_receipt(
        &self,
        id: &MessageId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(id).ok_or(StoreError::NotFound)?;
        if !message.read_by.iter().any(|r| r.user_id == reader) {
            message.read_by.push(ReadReceipt {
                user_id: reader,
                read_at: at,
            });
        }
        Ok(message.clone())
    }

    async fn set_reaction(
        &self,
        id: &MessageId,
        user: UserId,
        emoji: String,
        at: DateTime<Utc>,
    ) -> Result<StoredMessage> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(id).ok_or(StoreError::NotFound)?;
        message.reactions.retain(|r| r.user_id != user);
        message.reactions.push(Reaction {
            user_id: user,
            emoji,
            at,
        });
        Ok(message.clone())
    }

    async fn remove_reaction(&self, id: &MessageId, user: &UserId) -> Result<StoredMessage> {
        let mut messages = self.messages.write().await;
        let message = messages.get_mut(id).ok_or(StoreError::NotFound)?;
        message.reactions.retain(|r| &r.user_id != user);
        Ok(message.clone())
    }
}

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

/// Record of one accepted upload, for assertions in tests.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub filename: String,
    pub mime: String,
    pub size: usize,
}

/// In-memory blob store. Returns `mem://` urls; can be switched into a
/// failing mode to exercise classified blob errors.
pub struct MemoryBlobStore {
    blobs: RwLock<Vec<StoredBlob>>,
    fail_with: RwLock<Option<BlobError>>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            blobs: RwLock::new(Vec::new()),
            fail_with: RwLock::new(None),
        })
    }

    /// Make every subsequent upload fail with the given error.
    pub async fn fail_with(&self, error: BlobError) {
        *self.fail_with.write().await = Some(error);
    }

    pub async fn stored(&self) -> Vec<StoredBlob> {
        self.blobs.read().await.clone()
    }
}

fn clone_blob_error(error: &BlobError) -> BlobError {
    match error {
        BlobError::Auth(m) => BlobError::Auth(m.clone()),
        BlobError::Config(m) => BlobError::Config(m.clone()),
        BlobError::Unreachable(m) => BlobError::Unreachable(m.clone()),
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        data: Vec<u8>,
        options: BlobUploadOptions,
    ) -> std::result::Result<BlobHandle, BlobError> {
        if let Some(error) = self.fail_with.read().await.as_ref() {
            return Err(clone_blob_error(error));
        }

        let id = uuid::Uuid::new_v4();
        self.blobs.write().await.push(StoredBlob {
            filename: options.filename.clone(),
            mime: options.mime,
            size: data.len(),
        });
        tracing::debug!(id = %id, filename = %options.filename, size = data.len(), "Stored blob");

        Ok(BlobHandle {
            url: format!("mem://blobs/{}/{}", id, options.filename),
        })
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

struct TokenEntry {
    user_id: UserId,
    expires_at: Option<DateTime<Utc>>,
}

/// Token verifier backed by an explicit token table. Suitable for dev and
/// tests; a deployment substitutes a real verifier behind the same trait.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl StaticTokenVerifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn issue(&self, token: &str, user_id: UserId) {
        self.tokens.write().await.insert(
            token.to_string(),
            TokenEntry {
                user_id,
                expires_at: None,
            },
        );
    }

    pub async fn issue_expiring(&self, token: &str, user_id: UserId, expires_at: DateTime<Utc>) {
        self.tokens.write().await.insert(
            token.to_string(),
            TokenEntry {
                user_id,
                expires_at: Some(expires_at),
            },
        );
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let tokens = self.tokens.read().await;
        let entry = tokens.get(token).ok_or(TokenError::Malformed)?;
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                return Err(TokenError::Expired);
            }
        }
        Ok(Claims {
            user_id: entry.user_id.clone(),
        })
    }
}

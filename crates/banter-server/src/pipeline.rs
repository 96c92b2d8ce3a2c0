//! Message pipeline: validate, persist, enrich, broadcast.
//!
//! Lifecycle per message: draft -> persisted -> delivered, with repeatable
//! edits, a terminal delete, and accreting read/reaction sub-states that
//! never block other transitions. Timestamps are assigned by the store at
//! commit; client-supplied time is never trusted. On a persistence failure
//! nothing is broadcast and the sender alone gets a scoped error.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use banter_shared::attachments::Attachment;
use banter_shared::protocol::{
    ChatTarget, GroupView, MessageView, ReactionView, ReadReceiptView, ServerEvent,
};
use banter_shared::room::RoomId;
use banter_shared::types::{MessageId, MessageKind, UserId, UserProfile};
use banter_store::models::{MessageDraft, StoredMessage};
use banter_store::{GroupStore, MessageStore, UserStore};

use crate::connection::ConnectionHandle;
use crate::error::EngineError;
use crate::rooms::RoomRouter;

pub struct MessagePipeline {
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
    groups: Arc<dyn GroupStore>,
    router: Arc<RoomRouter>,
}

impl MessagePipeline {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
        groups: Arc<dyn GroupStore>,
        router: Arc<RoomRouter>,
    ) -> Self {
        Self {
            messages,
            users,
            groups,
            router,
        }
    }

    /// Plain text send.
    pub async fn send(
        &self,
        conn: &ConnectionHandle,
        target: &ChatTarget,
        content: String,
        reply_to: Option<MessageId>,
    ) -> Result<MessageView, EngineError> {
        if content.trim().is_empty() {
            return Err(EngineError::Validation("empty message content".to_string()));
        }
        self.send_inner(conn, target, content, MessageKind::Text, None, reply_to)
            .await
    }

    /// Attachment send, driven by the upload relay after the blob upload
    /// has been confirmed.
    pub async fn send_attachment(
        &self,
        conn: &ConnectionHandle,
        target: &ChatTarget,
        attachment: Attachment,
    ) -> Result<MessageView, EngineError> {
        let kind = attachment.kind;
        let content = attachment.filename.clone();
        self.send_inner(conn, target, content, kind, Some(attachment), None)
            .await
    }

    async fn send_inner(
        &self,
        conn: &ConnectionHandle,
        target: &ChatTarget,
        content: String,
        kind: MessageKind,
        attachment: Option<Attachment>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageView, EngineError> {
        let sender = conn.user_id().clone();
        let room = target.room_id(&sender);

        // Target validation is re-run against the store at send time: any
        // earlier check is stale once a collaborator call has intervened.
        let (receiver, group) = match target {
            ChatTarget::Direct(receiver_id) => {
                self.users
                    .find_user(receiver_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Validation(format!("unknown receiver {}", receiver_id))
                    })?;
                (Some(receiver_id.clone()), None)
            }
            ChatTarget::Group(group_id) => {
                let group = self
                    .groups
                    .find_group(group_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Validation(format!("unknown group {}", group_id))
                    })?;
                if !group.has_member(&sender) {
                    return Err(EngineError::Authorization(format!(
                        "not a member of group {}",
                        group_id
                    )));
                }
                (None, Some(group_id.clone()))
            }
        };

        let stored = self
            .messages
            .insert(MessageDraft {
                room_id: room.clone(),
                sender,
                receiver,
                group,
                content,
                kind,
                attachment,
                reply_to,
            })
            .await?;
        info!(message = %stored.id, room = %room, "Message persisted");

        let view = self.enrich(&stored).await;
        let fanout = match target {
            ChatTarget::Direct(_) => ServerEvent::MessageReceived {
                message: view.clone(),
            },
            ChatTarget::Group(_) => ServerEvent::NewGroupMessage {
                message: view.clone(),
            },
        };
        self.router.broadcast(&room, fanout, Some(conn.id)).await;

        // The sender's copy travels on the ack, not the fanout.
        conn.send(ServerEvent::MessageSent {
            message: view.clone(),
        });
        Ok(view)
    }

    /// Edit: sender-only, repeatable, blocked once the message is deleted.
    pub async fn update(
        &self,
        conn: &ConnectionHandle,
        message_id: &MessageId,
        content: String,
    ) -> Result<(), EngineError> {
        let stored = self.load(message_id).await?;
        self.authorize_sender(conn, &stored)?;
        if stored.deleted {
            return Err(EngineError::Validation(
                "cannot edit a deleted message".to_string(),
            ));
        }
        if content.trim().is_empty() {
            return Err(EngineError::Validation("empty message content".to_string()));
        }

        let updated = self
            .messages
            .set_content(message_id, content, Utc::now())
            .await?;
        let view = self.enrich(&updated).await;
        self.router
            .broadcast(
                &updated.room_id,
                ServerEvent::MessageUpdated { message: view },
                None,
            )
            .await;
        Ok(())
    }

    /// Delete: sender-only, terminal.
    pub async fn delete(
        &self,
        conn: &ConnectionHandle,
        message_id: &MessageId,
    ) -> Result<(), EngineError> {
        let stored = self.load(message_id).await?;
        self.authorize_sender(conn, &stored)?;

        let deleted = self.messages.mark_deleted(message_id, Utc::now()).await?;
        debug!(message = %message_id, "Message deleted");
        self.router
            .broadcast(
                &deleted.room_id,
                ServerEvent::MessageDeleted {
                    message_id: *message_id,
                    room_id: deleted.room_id.clone(),
                },
                None,
            )
            .await;
        Ok(())
    }

    /// Read receipt: idempotent per (message, reader).
    pub async fn mark_read(
        &self,
        conn: &ConnectionHandle,
        message_id: &MessageId,
    ) -> Result<(), EngineError> {
        self.load(message_id).await?;
        let reader = conn.user_id().clone();
        let updated = self
            .messages
            .add_read_receipt(message_id, reader.clone(), Utc::now())
            .await?;

        let read_at = updated
            .read_by
            .iter()
            .find(|r| r.user_id == reader)
            .map(|r| r.read_at)
            .unwrap_or_else(Utc::now);
        self.router
            .broadcast(
                &updated.room_id,
                ServerEvent::MessageRead {
                    message_id: *message_id,
                    room_id: updated.room_id.clone(),
                    user_id: reader,
                    read_at,
                },
                None,
            )
            .await;
        Ok(())
    }

    /// Reaction: at most one per (message, user); latest wins. Broadcasts
    /// the full updated reaction list.
    pub async fn react(
        &self,
        conn: &ConnectionHandle,
        message_id: &MessageId,
        emoji: String,
    ) -> Result<(), EngineError> {
        if emoji.is_empty() {
            return Err(EngineError::Validation("empty reaction".to_string()));
        }
        self.load(message_id).await?;
        let updated = self
            .messages
            .set_reaction(message_id, conn.user_id().clone(), emoji, Utc::now())
            .await?;
        self.broadcast_reactions(&updated).await;
        Ok(())
    }

    pub async fn remove_reaction(
        &self,
        conn: &ConnectionHandle,
        message_id: &MessageId,
    ) -> Result<(), EngineError> {
        self.load(message_id).await?;
        let updated = self
            .messages
            .remove_reaction(message_id, conn.user_id())
            .await?;
        self.broadcast_reactions(&updated).await;
        Ok(())
    }

    /// History replay for a joining connection: most recent `limit`
    /// messages, ascending by commit order, enriched.
    pub async fn history(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> Result<Vec<MessageView>, EngineError> {
        let stored = self.messages.recent_for_room(room, limit).await?;
        let mut views = Vec::with_capacity(stored.len());
        for message in &stored {
            views.push(self.enrich(message).await);
        }
        Ok(views)
    }

    async fn load(&self, message_id: &MessageId) -> Result<StoredMessage, EngineError> {
        self.messages
            .find(message_id)
            .await?
            .ok_or_else(|| EngineError::Validation(format!("unknown message {}", message_id)))
    }

    fn authorize_sender(
        &self,
        conn: &ConnectionHandle,
        stored: &StoredMessage,
    ) -> Result<(), EngineError> {
        if &stored.sender != conn.user_id() {
            return Err(EngineError::Authorization(
                "not the message sender".to_string(),
            ));
        }
        Ok(())
    }

    async fn broadcast_reactions(&self, updated: &StoredMessage) {
        self.router
            .broadcast(
                &updated.room_id,
                ServerEvent::MessageReaction {
                    message_id: updated.id,
                    room_id: updated.room_id.clone(),
                    reactions: reaction_views(updated),
                },
                None,
            )
            .await;
    }

    /// Build the broadcast payload: the stored record plus display
    /// projections of the parties involved. Lookups that fail fall back to
    /// bare ids rather than aborting the delivery.
    async fn enrich(&self, stored: &StoredMessage) -> MessageView {
        let sender = self.profile_for(&stored.sender).await;
        let group = match &stored.group {
            Some(group_id) => {
                let name = self
                    .groups
                    .find_group(group_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|g| g.name)
                    .unwrap_or_else(|| group_id.to_string());
                Some(GroupView {
                    id: group_id.clone(),
                    name,
                })
            }
            None => None,
        };

        MessageView {
            id: stored.id,
            room_id: stored.room_id.clone(),
            sender,
            receiver_id: stored.receiver.clone(),
            group,
            content: stored.content.clone(),
            kind: stored.kind,
            attachment: stored.attachment.clone(),
            reply_to: stored.reply_to,
            timestamp: stored.timestamp,
            edited: stored.edited,
            deleted: stored.deleted,
            reactions: reaction_views(stored),
            read_by: stored
                .read_by
                .iter()
                .map(|r| ReadReceiptView {
                    user_id: r.user_id.clone(),
                    read_at: r.read_at,
                })
                .collect(),
        }
    }

    async fn profile_for(&self, user_id: &UserId) -> UserProfile {
        match self.users.find_user(user_id).await {
            Ok(Some(user)) => UserProfile {
                id: user.id,
                display_name: user.display_name,
                avatar_url: user.avatar_url,
            },
            _ => UserProfile {
                id: user_id.clone(),
                display_name: user_id.to_string(),
                avatar_url: None,
            },
        }
    }
}

fn reaction_views(stored: &StoredMessage) -> Vec<ReactionView> {
    stored
        .reactions
        .iter()
        .map(|r| ReactionView {
            user_id: r.user_id.clone(),
            emoji: r.emoji.clone(),
            at: r.at,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection, drain};
    use banter_shared::types::GroupId;
    use banter_store::memory::{active_user, MemoryDirectory, MemoryMessageStore};
    use banter_store::models::StoredGroup;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        pipeline: MessagePipeline,
        router: Arc<RoomRouter>,
        messages: Arc<MemoryMessageStore>,
    }

    async fn fixture() -> Fixture {
        let directory = MemoryDirectory::new();
        directory.add_user(active_user("alice", "Alice")).await;
        directory.add_user(active_user("bob", "Bob")).await;
        directory.add_user(active_user("carol", "Carol")).await;
        directory
            .add_group(StoredGroup {
                id: GroupId::new("g1"),
                name: "The Group".to_string(),
                members: vec![
                    UserId::new("alice"),
                    UserId::new("bob"),
                    UserId::new("carol"),
                ],
            })
            .await;

        let messages = MemoryMessageStore::new();
        let router = Arc::new(RoomRouter::new());
        let pipeline = MessagePipeline::new(
            messages.clone(),
            directory.clone(),
            directory.clone(),
            router.clone(),
        );
        Fixture {
            pipeline,
            router,
            messages,
        }
    }

    async fn joined(
        fx: &Fixture,
        room: &RoomId,
        id: &str,
        name: &str,
    ) -> (ConnectionHandle, UnboundedReceiver<ServerEvent>) {
        let (conn, rx) = connection(id, name);
        fx.router.join(room, conn.clone()).await;
        (conn, rx)
    }

    fn direct(to: &str) -> ChatTarget {
        ChatTarget::Direct(UserId::new(to))
    }

    #[tokio::test]
    async fn test_direct_send_fans_out_and_acks() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, mut alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (_bob, mut bob_rx) = joined(&fx, &room, "bob", "Bob").await;

        fx.pipeline
            .send(&alice, &direct("bob"), "hi".to_string(), None)
            .await
            .unwrap();

        let bob_events = drain(&mut bob_rx);
        assert_eq!(bob_events.len(), 1);
        match &bob_events[0] {
            ServerEvent::MessageReceived { message } => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.sender.id, UserId::new("alice"));
                assert_eq!(message.sender.display_name, "Alice");
                assert_eq!(message.room_id, room);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Sender receives the ack, not the fanout.
        let alice_events = drain(&mut alice_rx);
        assert_eq!(alice_events.len(), 1);
        assert!(matches!(&alice_events[0], ServerEvent::MessageSent { .. }));
    }

    #[tokio::test]
    async fn test_group_fanout_excludes_sender() {
        let fx = fixture().await;
        let room = RoomId::group(&GroupId::new("g1"));
        let (alice, mut alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (_bob, mut bob_rx) = joined(&fx, &room, "bob", "Bob").await;
        let (_carol, mut carol_rx) = joined(&fx, &room, "carol", "Carol").await;

        fx.pipeline
            .send(
                &alice,
                &ChatTarget::Group(GroupId::new("g1")),
                "hello group".to_string(),
                None,
            )
            .await
            .unwrap();

        for rx in [&mut bob_rx, &mut carol_rx] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], ServerEvent::NewGroupMessage { message }
                if message.group.as_ref().unwrap().name == "The Group"));
        }
        let alice_events = drain(&mut alice_rx);
        assert_eq!(alice_events.len(), 1);
        assert!(matches!(&alice_events[0], ServerEvent::MessageSent { .. }));
    }

    #[tokio::test]
    async fn test_non_member_group_send_rejected() {
        let fx = fixture().await;
        let (mallory, _rx) = connection("mallory", "Mallory");

        let result = fx
            .pipeline
            .send(
                &mallory,
                &ChatTarget::Group(GroupId::new("g1")),
                "let me in".to_string(),
                None,
            )
            .await;
        assert!(matches!(result, Err(EngineError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_unknown_receiver_rejected_before_persist() {
        let fx = fixture().await;
        let (alice, _rx) = connection("alice", "Alice");

        let result = fx
            .pipeline
            .send(&alice, &direct("ghost"), "anyone?".to_string(), None)
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));

        let room = RoomId::direct(&UserId::new("alice"), &UserId::new("ghost"));
        assert!(fx
            .pipeline
            .history(&room, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_scopes_error_no_broadcast() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, _alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (_bob, mut bob_rx) = joined(&fx, &room, "bob", "Bob").await;

        fx.messages.fail_next_insert();
        let result = fx
            .pipeline
            .send(&alice, &direct("bob"), "doomed".to_string(), None)
            .await;

        assert!(matches!(result, Err(EngineError::Store(_))));
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_edit_requires_sender() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, _alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (bob, _bob_rx) = joined(&fx, &room, "bob", "Bob").await;

        let sent = fx
            .pipeline
            .send(&alice, &direct("bob"), "original".to_string(), None)
            .await
            .unwrap();

        let result = fx
            .pipeline
            .update(&bob, &sent.id, "hijacked".to_string())
            .await;
        assert!(matches!(result, Err(EngineError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_delete_is_terminal_blocks_edit() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, _alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (_bob, mut bob_rx) = joined(&fx, &room, "bob", "Bob").await;

        let sent = fx
            .pipeline
            .send(&alice, &direct("bob"), "going away".to_string(), None)
            .await
            .unwrap();
        drain(&mut bob_rx);

        fx.pipeline.delete(&alice, &sent.id).await.unwrap();
        let events = drain(&mut bob_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageDeleted { message_id, .. } if *message_id == sent.id)));

        let result = fx
            .pipeline
            .update(&alice, &sent.id, "resurrect".to_string())
            .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_mark_read_idempotent() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, _alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (bob, _bob_rx) = joined(&fx, &room, "bob", "Bob").await;

        let sent = fx
            .pipeline
            .send(&alice, &direct("bob"), "read me".to_string(), None)
            .await
            .unwrap();

        fx.pipeline.mark_read(&bob, &sent.id).await.unwrap();
        fx.pipeline.mark_read(&bob, &sent.id).await.unwrap();

        let stored = fx.messages.find(&sent.id).await.unwrap().unwrap();
        assert_eq!(
            stored
                .read_by
                .iter()
                .filter(|r| r.user_id == UserId::new("bob"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_message_id_is_validation_not_store_error() {
        let fx = fixture().await;
        let (bob, _rx) = connection("bob", "Bob");
        let missing = MessageId::new();

        let read = fx.pipeline.mark_read(&bob, &missing).await;
        assert!(matches!(read, Err(EngineError::Validation(_))));

        let react = fx.pipeline.react(&bob, &missing, "👍".to_string()).await;
        assert!(matches!(react, Err(EngineError::Validation(_))));

        let removed = fx.pipeline.remove_reaction(&bob, &missing).await;
        assert!(matches!(removed, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reaction_latest_wins_and_broadcasts_full_list() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, _alice_rx) = joined(&fx, &room, "alice", "Alice").await;
        let (bob, mut bob_rx) = joined(&fx, &room, "bob", "Bob").await;

        let sent = fx
            .pipeline
            .send(&alice, &direct("bob"), "react to me".to_string(), None)
            .await
            .unwrap();
        drain(&mut bob_rx);

        fx.pipeline
            .react(&bob, &sent.id, "👍".to_string())
            .await
            .unwrap();
        fx.pipeline
            .react(&bob, &sent.id, "🎉".to_string())
            .await
            .unwrap();

        let events = drain(&mut bob_rx);
        let last = events.last().unwrap();
        match last {
            ServerEvent::MessageReaction { reactions, .. } => {
                assert_eq!(reactions.len(), 1);
                assert_eq!(reactions[0].emoji, "🎉");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_history_in_commit_order() {
        let fx = fixture().await;
        let room = RoomId("alice_bob".to_string());
        let (alice, _alice_rx) = joined(&fx, &room, "alice", "Alice").await;

        for content in ["one", "two", "three"] {
            fx.pipeline
                .send(&alice, &direct("bob"), content.to_string(), None)
                .await
                .unwrap();
        }

        let history = fx.pipeline.history(&room, 10).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        // Enriched: sender carries a display projection.
        assert_eq!(history[0].sender.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_enrich_falls_back_when_sender_unknown() {
        let fx = fixture().await;
        // "ghost" never existed in the directory; the receiver does.
        let (ghost, _rx) = connection("ghost", "Ghost");
        let sent = fx
            .pipeline
            .send(&ghost, &direct("bob"), "boo".to_string(), None)
            .await
            .unwrap();
        assert_eq!(sent.sender.id, UserId::new("ghost"));
        assert_eq!(sent.sender.display_name, "ghost");
    }
}

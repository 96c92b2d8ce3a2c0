//! Typing signal bus.
//!
//! Ephemeral, non-persisted typing state layered on the room router. A
//! transition is broadcast to the room excluding the originator; no
//! delivery guarantee, no retry. Records are cleared on stop-typing and on
//! disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use banter_shared::protocol::ServerEvent;
use banter_shared::room::RoomId;
use banter_shared::types::UserId;

use crate::connection::ConnectionHandle;
use crate::rooms::RoomRouter;

struct TypingRecord {
    room_id: RoomId,
    #[allow(dead_code)]
    started_at: DateTime<Utc>,
}

pub struct TypingBus {
    records: RwLock<HashMap<UserId, TypingRecord>>,
    router: Arc<RoomRouter>,
}

impl TypingBus {
    pub fn new(router: Arc<RoomRouter>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            router,
        }
    }

    /// Set (or overwrite) the typing record and broadcast `user_typing` to
    /// the room, excluding the originator.
    pub async fn start(&self, conn: &ConnectionHandle, room: RoomId) {
        self.records.write().await.insert(
            conn.user_id().clone(),
            TypingRecord {
                room_id: room.clone(),
                started_at: Utc::now(),
            },
        );
        self.router
            .broadcast(
                &room,
                ServerEvent::UserTyping {
                    room_id: room.clone(),
                    user: conn.user.clone(),
                },
                Some(conn.id),
            )
            .await;
    }

    /// Clear the typing record and broadcast `user_stopped_typing`.
    pub async fn stop(&self, conn: &ConnectionHandle, room: RoomId) {
        self.records.write().await.remove(conn.user_id());
        self.router
            .broadcast(
                &room,
                ServerEvent::UserStoppedTyping {
                    room_id: room.clone(),
                    user_id: conn.user_id().clone(),
                },
                Some(conn.id),
            )
            .await;
    }

    /// Disconnect cleanup: if the identity had a live typing record, clear
    /// it and tell the room.
    pub async fn clear_connection(&self, conn: &ConnectionHandle) {
        let removed = self.records.write().await.remove(conn.user_id());
        if let Some(record) = removed {
            self.router
                .broadcast(
                    &record.room_id,
                    ServerEvent::UserStoppedTyping {
                        room_id: record.room_id.clone(),
                        user_id: conn.user_id().clone(),
                    },
                    Some(conn.id),
                )
                .await;
        }
    }

    pub async fn is_typing(&self, user: &UserId) -> bool {
        self.records.read().await.contains_key(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection, drain};

    fn room(id: &str) -> RoomId {
        RoomId(id.to_string())
    }

    async fn setup() -> (
        TypingBus,
        ConnectionHandle,
        tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
        ConnectionHandle,
        tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let router = Arc::new(RoomRouter::new());
        let bus = TypingBus::new(router.clone());
        let (alice, alice_rx) = connection("alice", "Alice");
        let (bob, bob_rx) = connection("bob", "Bob");
        router.join(&room("r"), alice.clone()).await;
        router.join(&room("r"), bob.clone()).await;
        (bus, alice, alice_rx, bob, bob_rx)
    }

    #[tokio::test]
    async fn test_start_typing_excludes_originator() {
        let (bus, alice, mut alice_rx, _bob, mut bob_rx) = setup().await;

        bus.start(&alice, room("r")).await;

        assert!(drain(&mut alice_rx).is_empty());
        let events = drain(&mut bob_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserTyping { user, .. } if user.id == UserId::new("alice"))));
        assert!(bus.is_typing(&UserId::new("alice")).await);
    }

    #[tokio::test]
    async fn test_stop_typing_clears_record() {
        let (bus, alice, _alice_rx, _bob, mut bob_rx) = setup().await;

        bus.start(&alice, room("r")).await;
        bus.stop(&alice, room("r")).await;

        assert!(!bus.is_typing(&UserId::new("alice")).await);
        let events = drain(&mut bob_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserStoppedTyping { user_id, .. } if *user_id == UserId::new("alice"))));
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_stop() {
        let (bus, alice, _alice_rx, _bob, mut bob_rx) = setup().await;

        bus.start(&alice, room("r")).await;
        drain(&mut bob_rx);
        bus.clear_connection(&alice).await;

        assert!(!bus.is_typing(&UserId::new("alice")).await);
        let events = drain(&mut bob_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::UserStoppedTyping { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_without_record_is_silent() {
        let (bus, alice, _alice_rx, _bob, mut bob_rx) = setup().await;
        bus.clear_connection(&alice).await;
        assert!(drain(&mut bob_rx).is_empty());
    }
}

//! Presence registry: who is online, on which connection.
//!
//! Exactly one record per online identity. A second connection from the
//! same identity overwrites the first (last-writer-wins); the unregister
//! path is guarded by connection id so that the stale session's eventual
//! disconnect cannot mark the identity offline while the newer connection
//! is still up.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use banter_shared::protocol::ServerEvent;
use banter_shared::types::{OnlineUser, UserId};

use crate::connection::ConnectionHandle;

struct PresenceEntry {
    handle: ConnectionHandle,
    online_since: DateTime<Utc>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for this identity, then broadcast
    /// `user_online` to every other connection.
    pub async fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id().clone();
        let event = ServerEvent::UserOnline {
            user: handle.user.clone(),
        };

        let mut entries = self.entries.write().await;
        let replaced = entries.insert(
            user_id.clone(),
            PresenceEntry {
                handle,
                online_since: Utc::now(),
            },
        );
        if replaced.is_some() {
            debug!(user = %user_id, "Presence record overwritten by newer connection");
        }

        for (id, entry) in entries.iter() {
            if id != &user_id {
                entry.handle.send(event.clone());
            }
        }
    }

    /// Remove the record owned by `conn` and broadcast `user_offline`.
    ///
    /// Returns the offline timestamp when a record was actually removed.
    /// A stale connection (one already overwritten by a newer session for
    /// the same identity) removes nothing and nothing is broadcast.
    pub async fn unregister(&self, conn: &ConnectionHandle) -> Option<DateTime<Utc>> {
        let mut entries = self.entries.write().await;
        match entries.get(conn.user_id()) {
            Some(entry) if entry.handle.id == conn.id => {}
            _ => return None,
        }
        entries.remove(conn.user_id());

        let last_seen = Utc::now();
        let event = ServerEvent::UserOffline {
            user_id: conn.user_id().clone(),
            last_seen,
        };
        for entry in entries.values() {
            entry.handle.send(event.clone());
        }
        Some(last_seen)
    }

    /// Full current online set, sent once to a newly admitted connection
    /// so it can render presence without racing the broadcast stream.
    pub async fn snapshot(&self) -> Vec<OnlineUser> {
        let entries = self.entries.read().await;
        let mut users: Vec<OnlineUser> = entries
            .values()
            .map(|entry| OnlineUser {
                profile: entry.handle.user.clone(),
                last_seen: entry.online_since,
            })
            .collect();
        users.sort_by(|a, b| a.profile.id.cmp(&b.profile.id));
        users
    }

    /// Current connection for an identity, if any. Used for 1:1 delivery
    /// (call signaling).
    pub async fn handle_for(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .await
            .get(user)
            .map(|entry| entry.handle.clone())
    }

    pub async fn online_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection, drain};

    #[tokio::test]
    async fn test_at_most_one_record_per_identity() {
        let registry = PresenceRegistry::new();
        let (first, _rx1) = connection("u1", "One");
        let (second, _rx2) = connection("u1", "One");

        registry.register(first).await;
        registry.register(second).await;

        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn test_online_broadcast_excludes_self() {
        let registry = PresenceRegistry::new();
        let (alice, mut alice_rx) = connection("alice", "Alice");
        let (bob, mut bob_rx) = connection("bob", "Bob");

        registry.register(alice).await;
        registry.register(bob).await;

        let alice_events = drain(&mut alice_rx);
        assert!(alice_events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserOnline { user } if user.id == UserId::new("bob"))));

        // Bob saw nothing: his own registration is not echoed back.
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_disconnect_keeps_identity_online() {
        let registry = PresenceRegistry::new();
        let (first, _rx1) = connection("u1", "One");
        let (second, _rx2) = connection("u1", "One");
        let stale = first.clone();

        registry.register(first).await;
        registry.register(second).await;

        // The overwritten session disconnecting must not mark u1 offline.
        assert!(registry.unregister(&stale).await.is_none());
        assert_eq!(registry.online_count().await, 1);
        assert!(registry.handle_for(&UserId::new("u1")).await.is_some());
    }

    #[tokio::test]
    async fn test_unregister_broadcasts_offline_to_remaining() {
        let registry = PresenceRegistry::new();
        let (alice, _alice_rx) = connection("alice", "Alice");
        let (bob, mut bob_rx) = connection("bob", "Bob");
        let leaving = alice.clone();

        registry.register(alice).await;
        registry.register(bob).await;
        drain(&mut bob_rx);

        assert!(registry.unregister(&leaving).await.is_some());

        let events = drain(&mut bob_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserOffline { user_id, .. } if *user_id == UserId::new("alice"))));
    }

    #[tokio::test]
    async fn test_snapshot_lists_all_online() {
        let registry = PresenceRegistry::new();
        let (alice, _rx1) = connection("alice", "Alice");
        let (bob, _rx2) = connection("bob", "Bob");
        registry.register(alice).await;
        registry.register(bob).await;

        let snapshot = registry.snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|u| u.profile.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }
}

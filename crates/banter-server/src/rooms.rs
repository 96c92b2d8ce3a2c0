//! Room router: membership tables and best-effort fanout.
//!
//! Membership is purely the set of currently-joined connections; rooms are
//! created on first join and dropped on last leave. Fanout collects the
//! member handles under the read lock and pushes onto their outbound
//! channels synchronously, so no lock is ever held across an await and
//! events from one causal chain reach a room in FIFO order.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use banter_shared::protocol::ServerEvent;
use banter_shared::room::RoomId;
use banter_shared::types::ConnectionId;

use crate::connection::ConnectionHandle;

#[derive(Default)]
pub struct RoomRouter {
    rooms: RwLock<HashMap<RoomId, HashMap<ConnectionId, ConnectionHandle>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent join. Returns `true` when the connection was not already
    /// a member, which is the caller's cue to run the one-time history
    /// replay.
    pub async fn join(&self, room: &RoomId, handle: ConnectionHandle) -> bool {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room.clone()).or_default();
        let newly_joined = !members.contains_key(&handle.id);
        if newly_joined {
            debug!(room = %room, conn = %handle.id, "Joined room");
            members.insert(handle.id, handle);
        }
        newly_joined
    }

    /// Idempotent leave.
    pub async fn leave(&self, room: &RoomId, conn: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&conn).is_some();
        if members.is_empty() {
            rooms.remove(room);
        }
        if removed {
            debug!(room = %room, conn = %conn, "Left room");
        }
        removed
    }

    /// Best-effort fanout to every current member, optionally excluding one
    /// connection (typically the originator). Not atomic with respect to
    /// concurrent join/leave: a member leaving mid-broadcast may or may not
    /// receive the event. Returns the number of deliveries attempted.
    pub async fn broadcast(
        &self,
        room: &RoomId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, handle) in members.iter() {
            if Some(*id) == exclude {
                continue;
            }
            handle.send(event.clone());
            delivered += 1;
        }
        delivered
    }

    /// Drop a disconnecting connection from every room it joined.
    pub async fn purge_connection(&self, conn: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    pub async fn member_count(&self, room: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

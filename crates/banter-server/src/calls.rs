//! Call signaling relay.
//!
//! Pure relay for WebRTC negotiation: offers, answers and ICE candidates
//! are forwarded 1:1 to the target's current connection; end-of-call is
//! broadcast to the call room. No persistence, no validation beyond "the
//! target is online", no buffering for offline targets.

use std::sync::Arc;

use tracing::debug;

use banter_shared::protocol::{ChatTarget, ServerEvent};
use banter_shared::types::UserId;

use crate::connection::ConnectionHandle;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomRouter;

pub struct CallRelay {
    presence: Arc<PresenceRegistry>,
    router: Arc<RoomRouter>,
}

impl CallRelay {
    pub fn new(presence: Arc<PresenceRegistry>, router: Arc<RoomRouter>) -> Self {
        Self { presence, router }
    }

    pub async fn offer(&self, conn: &ConnectionHandle, target: &UserId, payload: serde_json::Value) {
        self.forward(
            target,
            ServerEvent::VideoCallOffer {
                from: conn.user.clone(),
                payload,
            },
        )
        .await;
    }

    pub async fn answer(
        &self,
        conn: &ConnectionHandle,
        target: &UserId,
        payload: serde_json::Value,
    ) {
        self.forward(
            target,
            ServerEvent::VideoCallAnswer {
                from: conn.user_id().clone(),
                payload,
            },
        )
        .await;
    }

    pub async fn ice_candidate(
        &self,
        conn: &ConnectionHandle,
        target: &UserId,
        payload: serde_json::Value,
    ) {
        self.forward(
            target,
            ServerEvent::VideoCallIceCandidate {
                from: conn.user_id().clone(),
                payload,
            },
        )
        .await;
    }

    /// End-of-call goes to the whole call room, not just one peer.
    pub async fn end(&self, conn: &ConnectionHandle, target: &ChatTarget) {
        let room = target.room_id(conn.user_id());
        self.router
            .broadcast(
                &room,
                ServerEvent::VideoCallEnded {
                    room_id: room.clone(),
                    from: conn.user_id().clone(),
                },
                Some(conn.id),
            )
            .await;
    }

    /// 1:1 forward; silently dropped when the target has no connection.
    async fn forward(&self, target: &UserId, event: ServerEvent) {
        match self.presence.handle_for(target).await {
            Some(handle) => handle.send(event),
            None => debug!(target = %target, "Call signal dropped, target offline"),
        }
    }
}

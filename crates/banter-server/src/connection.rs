//! Per-connection outbound handle.
//!
//! A `ConnectionHandle` is the engine's view of one live transport session:
//! the identity bound at admission plus an unbounded sender feeding the
//! socket's writer task. Registries clone the handle; when every clone is
//! gone the writer drains and exits.

use tokio::sync::mpsc;

use banter_shared::protocol::ServerEvent;
use banter_shared::types::{ConnectionId, UserId, UserProfile};

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Identity bound exactly once, at admission, for the connection's
    /// lifetime.
    pub user: UserProfile,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(user: UserProfile) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                user,
                tx,
            },
            rx,
        )
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// Best-effort delivery: a receiver that disconnected concurrently
    /// simply misses the event.
    pub fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }
}

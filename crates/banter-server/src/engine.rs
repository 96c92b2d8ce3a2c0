//! The session engine: admission, per-connection event dispatch, teardown.
//!
//! One `Engine` is constructed at process start with its collaborators
//! injected, and shared by every connection task. Each inbound event is
//! dispatched from its connection's read loop, so events from one
//! connection are handled one at a time in arrival order. Unexpected
//! component errors are converted to a scoped `error` event here and never
//! close the connection.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use banter_shared::protocol::{ChatTarget, ClientEvent, ServerEvent};
use banter_shared::room::RoomId;
use banter_shared::types::UserProfile;
use banter_store::{BlobStore, GroupStore, MessageStore, TokenVerifier, UserStore};

use crate::calls::CallRelay;
use crate::config::ServerConfig;
use crate::connection::ConnectionHandle;
use crate::error::{AuthRejection, EngineError};
use crate::pipeline::MessagePipeline;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomRouter;
use crate::typing::TypingBus;
use crate::upload::{UploadRelay, UploadRequest};

/// External services the engine is wired to.
pub struct Collaborators {
    pub users: Arc<dyn UserStore>,
    pub groups: Arc<dyn GroupStore>,
    pub messages: Arc<dyn MessageStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub verifier: Arc<dyn TokenVerifier>,
}

pub struct Engine {
    config: ServerConfig,
    presence: Arc<PresenceRegistry>,
    router: Arc<RoomRouter>,
    typing: TypingBus,
    pipeline: Arc<MessagePipeline>,
    upload: UploadRelay,
    calls: CallRelay,
    users: Arc<dyn UserStore>,
    verifier: Arc<dyn TokenVerifier>,
}

impl Engine {
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Arc<Self> {
        let presence = Arc::new(PresenceRegistry::new());
        let router = Arc::new(RoomRouter::new());
        let pipeline = Arc::new(MessagePipeline::new(
            collaborators.messages,
            collaborators.users.clone(),
            collaborators.groups,
            router.clone(),
        ));
        let upload = UploadRelay::new(
            collaborators.blobs,
            pipeline.clone(),
            config.max_upload_bytes,
        );
        let calls = CallRelay::new(presence.clone(), router.clone());
        let typing = TypingBus::new(router.clone());

        Arc::new(Self {
            config,
            presence,
            router,
            typing,
            pipeline,
            upload,
            calls,
            users: collaborators.users,
            verifier: collaborators.verifier,
        })
    }

    /// Admit a new transport connection. Verifies the credential, resolves
    /// the identity, binds it to a fresh connection handle, sends the
    /// `authenticated` / `online_users` opening sequence and registers
    /// presence. A rejected connection never reaches any other component.
    pub async fn admit(
        &self,
        token: Option<&str>,
    ) -> Result<(ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>), EngineError> {
        let token = token.ok_or(AuthRejection::MissingToken)?;
        let claims = self
            .verifier
            .verify(token)
            .await
            .map_err(AuthRejection::from)?;

        let user = self
            .users
            .find_user(&claims.user_id)
            .await?
            .ok_or(AuthRejection::UnknownAccount)?;
        if !user.active {
            return Err(AuthRejection::InactiveAccount.into());
        }

        let profile = UserProfile {
            id: user.id,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
        };
        let (conn, rx) = ConnectionHandle::new(profile.clone());
        info!(user = %profile.id, conn = %conn.id, "Connection admitted");

        conn.send(ServerEvent::Authenticated { user: profile });
        self.presence.register(conn.clone()).await;
        conn.send(ServerEvent::OnlineUsers {
            users: self.presence.snapshot().await,
        });
        Ok((conn, rx))
    }

    /// Handle one inbound event. Component failures become a scoped
    /// `error` event for this connection; nothing here closes it.
    pub async fn dispatch(&self, conn: &ConnectionHandle, event: ClientEvent) {
        if let Err(error) = self.handle(conn, event).await {
            warn!(conn = %conn.id, user = %conn.user_id(), error = %error, "Event rejected");
            conn.send(ServerEvent::Error {
                message: error.to_string(),
            });
        }
    }

    async fn handle(&self, conn: &ConnectionHandle, event: ClientEvent) -> Result<(), EngineError> {
        match event {
            ClientEvent::JoinRoom { room_id } => self.join_room(conn, room_id).await,
            ClientEvent::LeaveRoom { room_id } => {
                self.router.leave(&room_id, conn.id).await;
                Ok(())
            }
            ClientEvent::SendMessage {
                content,
                receiver_id,
                group_id,
                reply_to,
            } => {
                let target = ChatTarget::resolve(&receiver_id, &group_id)?;
                self.pipeline.send(conn, &target, content, reply_to).await?;
                Ok(())
            }
            ClientEvent::StartTyping {
                receiver_id,
                group_id,
            } => {
                let target = ChatTarget::resolve(&receiver_id, &group_id)?;
                let room = target.room_id(conn.user_id());
                self.typing.start(conn, room).await;
                Ok(())
            }
            ClientEvent::StopTyping {
                receiver_id,
                group_id,
            } => {
                let target = ChatTarget::resolve(&receiver_id, &group_id)?;
                let room = target.room_id(conn.user_id());
                self.typing.stop(conn, room).await;
                Ok(())
            }
            ClientEvent::UploadFile {
                upload_id,
                file_data,
                file_name,
                file_size,
                file_type,
                receiver_id,
                group_id,
            } => {
                // Upload failures are reported on the upload's own error
                // channel, keyed by upload id, not the generic error event.
                let target = match ChatTarget::resolve(&receiver_id, &group_id) {
                    Ok(target) => target,
                    Err(error) => {
                        conn.send(ServerEvent::UploadError {
                            upload_id,
                            reason: error.to_string(),
                        });
                        return Ok(());
                    }
                };
                self.upload
                    .handle(
                        conn,
                        UploadRequest {
                            upload_id,
                            file_data,
                            file_name,
                            file_size,
                            file_type,
                            target,
                        },
                    )
                    .await;
                Ok(())
            }
            ClientEvent::MarkMessageRead { message_id } => {
                self.pipeline.mark_read(conn, &message_id).await
            }
            ClientEvent::UpdateMessage {
                message_id,
                content,
            } => self.pipeline.update(conn, &message_id, content).await,
            ClientEvent::DeleteMessage { message_id } => {
                self.pipeline.delete(conn, &message_id).await
            }
            ClientEvent::ReactMessage { message_id, emoji } => {
                self.pipeline.react(conn, &message_id, emoji).await
            }
            ClientEvent::RemoveReaction { message_id } => {
                self.pipeline.remove_reaction(conn, &message_id).await
            }
            ClientEvent::VideoCallOffer { target_id, payload } => {
                self.calls.offer(conn, &target_id, payload).await;
                Ok(())
            }
            ClientEvent::VideoCallAnswer { target_id, payload } => {
                self.calls.answer(conn, &target_id, payload).await;
                Ok(())
            }
            ClientEvent::VideoCallIceCandidate { target_id, payload } => {
                self.calls.ice_candidate(conn, &target_id, payload).await;
                Ok(())
            }
            ClientEvent::VideoCallEnd {
                receiver_id,
                group_id,
            } => {
                let target = ChatTarget::resolve(&receiver_id, &group_id)?;
                self.calls.end(conn, &target).await;
                Ok(())
            }
        }
    }

    /// Idempotent join; history is replayed once, to the joiner only.
    async fn join_room(&self, conn: &ConnectionHandle, room: RoomId) -> Result<(), EngineError> {
        let newly_joined = self.router.join(&room, conn.clone()).await;
        if newly_joined {
            let messages = self
                .pipeline
                .history(&room, self.config.history_limit)
                .await?;
            conn.send(ServerEvent::LoadMessages {
                room_id: room,
                messages,
            });
        }
        Ok(())
    }

    /// Teardown for a departed connection: typing records cleared, room
    /// membership purged, presence unregistered (guarded against stale
    /// sessions), and a non-blocking last-seen write fired at the store.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        self.typing.clear_connection(conn).await;
        self.router.purge_connection(conn.id).await;

        if let Some(last_seen) = self.presence.unregister(conn).await {
            let users = self.users.clone();
            let user_id = conn.user_id().clone();
            tokio::spawn(async move {
                if let Err(error) = users.touch_last_seen(&user_id, last_seen).await {
                    warn!(user = %user_id, error = %error, "Last-seen update failed");
                }
            });
        }
        info!(conn = %conn.id, user = %conn.user_id(), "Connection closed");
    }
}

//! # banter-server
//!
//! Real-time session and message-fanout engine for the Banter chat
//! product:
//! - **Connection gateway** admitting WebSocket clients after credential
//!   verification
//! - **Presence registry** with online/offline broadcasts and snapshots
//! - **Room router** partitioning connections into direct and group rooms
//! - **Message pipeline** (send/edit/delete/react/read-receipt) over the
//!   document-store collaborator
//! - **Upload relay** pushing attachments to the blob-store collaborator
//! - **Call signaling relay** for WebRTC negotiation
//!
//! Durable storage, blob storage and credential issuance are external
//! collaborators; this binary wires in the in-memory implementations for
//! local development.

mod calls;
mod config;
mod connection;
mod engine;
mod error;
mod gateway;
mod pipeline;
mod presence;
mod rooms;
mod typing;
mod upload;

use tracing::info;
use tracing_subscriber::EnvFilter;

use banter_store::memory::{
    active_user, MemoryBlobStore, MemoryDirectory, MemoryMessageStore, StaticTokenVerifier,
};

use crate::config::ServerConfig;
use crate::engine::{Collaborators, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,banter_server=debug")),
        )
        .init();

    info!("Starting Banter session engine v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Wire collaborators (in-memory backends for local development)
    // -----------------------------------------------------------------------
    let directory = MemoryDirectory::new();
    let verifier = StaticTokenVerifier::new();

    for id in &config.seed_users {
        directory.add_user(active_user(id, id)).await;
        let token = format!("dev-{id}");
        verifier
            .issue(&token, banter_shared::types::UserId::new(id.clone()))
            .await;
        info!(user = %id, token = %token, "Seeded dev user");
    }

    let collaborators = Collaborators {
        users: directory.clone(),
        groups: directory,
        messages: MemoryMessageStore::new(),
        blobs: MemoryBlobStore::new(),
        verifier,
    };

    // -----------------------------------------------------------------------
    // 4. Construct the engine and serve until shutdown
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let engine = Engine::new(config, collaborators);

    tokio::select! {
        result = gateway::serve(engine, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Gateway failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

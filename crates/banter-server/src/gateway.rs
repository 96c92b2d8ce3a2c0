//! Connection gateway: HTTP/WebSocket surface.
//!
//! A client connects to `/ws?token=...`; the credential is verified before
//! the connection reaches any other component. Admitted sockets get a
//! writer task draining the connection's outbound channel and a read loop
//! that parses each frame at the boundary and hands it to the engine one
//! event at a time.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use banter_shared::protocol::{ClientEvent, ServerEvent};

use crate::engine::Engine;

pub fn build_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

pub async fn serve(engine: Arc<Engine>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(engine, socket, query.token))
}

async fn handle_socket(engine: Arc<Engine>, socket: WebSocket, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    // Admission happens before anything else; a refused connection gets a
    // classified reason and is closed without reaching any component.
    let (conn, mut rx) = match engine.admit(token.as_deref()).await {
        Ok(pair) => pair,
        Err(error) => {
            warn!(error = %error, "Connection refused");
            let refusal = ServerEvent::Error {
                message: error.to_string(),
            };
            let _ = sink.send(Message::Text(refusal.to_json())).await;
            let _ = sink.close().await;
            return;
        }
    };

    // Writer: drains the outbound channel until every handle clone is gone.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sink.send(Message::Text(event.to_json())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: one event at a time, in arrival order.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::from_json(&text) {
                Ok(event) => engine.dispatch(&conn, event).await,
                Err(error) => {
                    debug!(conn = %conn.id, error = %error, "Malformed frame");
                    conn.send(ServerEvent::Error {
                        message: format!("Invalid request: {}", error),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            Ok(_) => {}
            Err(error) => {
                debug!(conn = %conn.id, error = %error, "Socket error");
                break;
            }
        }
    }

    engine.disconnect(&conn).await;
    drop(conn);
    let _ = writer.await;
}

//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Ceiling on the decoded size of one uploaded attachment, in bytes.
    /// Env: `MAX_UPLOAD_BYTES`
    /// Default: 25 MiB.
    pub max_upload_bytes: usize,

    /// Number of messages replayed to a connection joining a room.
    /// Env: `HISTORY_LIMIT`
    /// Default: `50`
    pub history_limit: usize,

    /// Comma-separated user ids seeded into the in-memory directory at
    /// startup, each with a `dev-<id>` token. Dev convenience only.
    /// Env: `DEV_SEED_USERS`
    /// Default: empty.
    pub seed_users: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            max_upload_bytes: 25 * 1024 * 1024, // 25 MiB
            history_limit: 50,
            seed_users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(val) = std::env::var("MAX_UPLOAD_BYTES") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_upload_bytes = n;
            }
        }

        if let Ok(val) = std::env::var("HISTORY_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.history_limit = n;
            }
        }

        if let Ok(val) = std::env::var("DEV_SEED_USERS") {
            config.seed_users = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

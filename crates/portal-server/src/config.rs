//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development. Malformed values are logged and
//! ignored.

use std::net::SocketAddr;
use std::path::PathBuf;

use portal_shared::constants::{DEFAULT_HTTP_PORT, MAX_HISTORY_LIMIT, MAX_UPLOAD_SIZE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8001`
    pub http_addr: SocketAddr,

    /// SQLite database file holding message history.
    /// Env: `DATABASE_PATH`
    /// Default: `./portal.db`
    pub database_path: PathBuf,

    /// Directory where uploaded files are kept.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./files`
    pub blob_storage_path: PathBuf,

    /// Maximum upload size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 50 MiB
    pub max_upload_size: usize,

    /// Externally visible origin, used to build file download URLs.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8001`
    pub public_base_url: String,

    /// Upper bound on `limit` for history queries.
    /// Env: `HISTORY_LIMIT_MAX`
    /// Default: `500`
    pub history_limit_max: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./portal.db"),
            blob_storage_path: PathBuf::from("./files"),
            max_upload_size: MAX_UPLOAD_SIZE,
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            history_limit_max: MAX_HISTORY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.public_base_url = url.to_string();
            }
        }

        if let Some(val) = lookup("HISTORY_LIMIT_MAX") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.history_limit_max = n,
                _ => tracing::warn!(value = %val, "Invalid HISTORY_LIMIT_MAX, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

//! # portal-server
//!
//! Realtime core of the employee portal.
//!
//! This binary provides:
//! - **WebSocket sessions** (`/api/ws/:user_id`) with one live connection per
//!   user
//! - **Presence tracking** (online / busy / offline) broadcast to every
//!   connected client
//! - **Message routing** for direct, channel and global chat, persisted to
//!   SQLite before fan-out
//! - **REST API** (axum) for statuses, message history, and file
//!   upload/download

mod api;
mod blob_store;
mod config;
mod error;
mod hub;
mod persistence;
mod presence;
mod registry;
mod router;
mod session;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::persistence::SqliteMessageStore;
use crate::router::MessageRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,portal_server=debug")),
        )
        .init();

    info!(
        "Starting {} server v{}",
        portal_shared::constants::APP_NAME,
        env!("CARGO_PKG_VERSION")
    );

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let store = SqliteMessageStore::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "Message store ready");

    let blob_store = Arc::new(
        BlobStore::new(
            config.blob_storage_path.clone(),
            config.max_upload_size,
            config.public_base_url.clone(),
        )
        .await?,
    );

    let hub = Hub::new();
    let router = Arc::new(MessageRouter::new(hub.clone(), Arc::new(store)));

    let http_addr = config.http_addr;
    let app_state = AppState {
        hub,
        router,
        blob_store,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

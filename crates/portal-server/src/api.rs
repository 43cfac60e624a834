use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use portal_shared::constants::{DEFAULT_HISTORY_LIMIT, MAX_FRAME_BYTES};
use portal_shared::{ChatMessage, FileAttachment, UserStatus};
use portal_store::MessageFilter;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::router::{FileUpload, MessageRouter};
use crate::session;

/// Slack on top of the upload limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub router: Arc<MessageRouter>,
    pub blob_store: Arc<BlobStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/users/status", get(list_statuses))
        .route("/users/:user_id/status", get(user_status).post(set_user_status))
        .route("/messages", get(message_history))
        .route("/files/upload", post(file_upload))
        .route("/files/download/:file_id", get(file_download))
        .route("/ws/:user_id", get(ws_upgrade));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(state.config.max_upload_size + MULTIPART_OVERHEAD))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
    online_users: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct StatusEntry {
    user_id: String,
    status: UserStatus,
}

#[derive(Deserialize)]
struct StatusUpdateRequest {
    client_name: String,
    status: String,
}

#[derive(Deserialize, Default)]
struct HistoryQuery {
    channel_id: Option<String>,
    sender_id: Option<String>,
    recipient_id: Option<String>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct FileUploadResponse {
    message: &'static str,
    message_id: Uuid,
    file_id: Uuid,
    file_url: String,
    file_name: String,
    file_size: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let online_users = state.hub.connected_users().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: online_users.len(),
        online_users,
    })
}

async fn list_statuses(State(state): State<AppState>) -> Json<Vec<StatusEntry>> {
    let statuses = state
        .hub
        .list_all_statuses()
        .await
        .into_iter()
        .map(|(user_id, status)| StatusEntry { user_id, status })
        .collect();
    Json(statuses)
}

async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<StatusEntry>, ServerError> {
    let status = state
        .hub
        .status_of(&user_id)
        .await
        .ok_or_else(|| ServerError::UnknownUser(user_id.clone()))?;
    Ok(Json(StatusEntry { user_id, status }))
}

/// HTTP equivalent of the `set_status` frame. Only the user themselves may
/// change their status.
async fn set_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<StatusEntry>, ServerError> {
    if req.client_name != user_id {
        return Err(ServerError::BadRequest(
            "client_name does not match user id".to_string(),
        ));
    }
    let status = state
        .hub
        .set_status_str(&user_id, &req.status)
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    Ok(Json(StatusEntry { user_id, status }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn message_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let filter = match (
        non_empty(query.channel_id),
        non_empty(query.sender_id),
        non_empty(query.recipient_id),
    ) {
        (Some(channel), _, _) => MessageFilter::channel(channel),
        (None, Some(a), Some(b)) => MessageFilter::conversation(a, b),
        _ => {
            return Err(ServerError::BadRequest(
                "either channel_id or both sender_id and recipient_id are required".to_string(),
            ))
        }
    };
    let limit = match query.limit {
        None | Some(0) => DEFAULT_HISTORY_LIMIT,
        Some(n) => n,
    }
    .min(state.config.history_limit_max);

    let messages = state.router.history(&filter, limit).await?;
    Ok(Json(messages))
}

async fn file_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FileUploadResponse>, ServerError> {
    let mut file: Option<(Bytes, String, String)> = None;
    let mut sender_id = None;
    let mut sender_name = None;
    let mut channel_id = None;
    let mut recipient_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
            file = Some((data, file_name, mime));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
        match name.as_str() {
            "sender_id" => sender_id = Some(value),
            "sender_name" => sender_name = Some(value),
            "channel_id" => channel_id = Some(value),
            "recipient_id" => recipient_id = Some(value),
            _ => {}
        }
    }

    let (data, file_name, mime) = file.ok_or_else(|| {
        ServerError::BadRequest("Missing 'file' field in multipart form".to_string())
    })?;
    let sender_id = non_empty(sender_id)
        .ok_or_else(|| ServerError::BadRequest("Missing 'sender_id' field".to_string()))?;

    let stored = state.blob_store.upload(&data, &file_name, &mime).await?;
    if let Err(e) = state.blob_store.set_public_read(stored.id).await {
        warn!(id = %stored.id, error = %e, "Could not make file public");
    }

    let delivery = state
        .router
        .publish_file(FileUpload {
            sender_id: sender_id.clone(),
            sender_name,
            channel_id: non_empty(channel_id),
            recipient_id: non_empty(recipient_id),
            attachment: FileAttachment {
                url: stored.url.clone(),
                name: file_name.clone(),
                id: stored.id.to_string(),
                size: data.len() as u64,
                mime,
            },
        })
        .await?;

    info!(id = %stored.id, sender = %sender_id, size = data.len(), "File uploaded via API");

    Ok(Json(FileUploadResponse {
        message: "File uploaded successfully",
        message_id: delivery.message_id,
        file_id: stored.id,
        file_url: stored.url,
        file_name,
        file_size: data.len() as u64,
    }))
}

async fn file_download(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, ServerError> {
    let file = state.blob_store.download(file_id).await?;

    let content_type = HeaderValue::from_str(&file.meta.mime)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.meta.file_name.replace(['"', '\\'], "_")
    );
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    Ok((
        [(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)],
        file.data,
    )
        .into_response())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if let Some(existing) = state.hub.lookup(&user_id).await {
        info!(user = %user_id, old_conn = %existing.conn_id(), "New socket will replace live connection");
    }

    // Accept frames above the per-frame limit so the session can answer
    // them with an error instead of the transport dropping the connection.
    ws.max_message_size(MAX_FRAME_BYTES * 4)
        .on_upgrade(move |socket| session::serve_socket(socket, user_id, state.hub, state.router))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! Per-connection session loop.
//!
//! `connecting → open → closed`. Opening registers the connection and
//! announces the user online; the loop then reads one frame at a time and
//! hands text frames to the router. Bad frames are logged and skipped. The
//! loop ends on a close frame, end of stream, or a transport error, and all
//! three go through the same cleanup, which runs exactly once.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use portal_shared::constants::MAX_FRAME_BYTES;
use portal_shared::ServerEvent;

use crate::hub::{ConnectionHandle, Hub};
use crate::router::{Caller, MessageRouter, RouteError, RouteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

pub struct Session {
    caller: Caller,
    hub: Hub,
    router: Arc<MessageRouter>,
    state: SessionState,
}

impl Session {
    pub fn new(user_id: String, handle: ConnectionHandle, hub: Hub, router: Arc<MessageRouter>) -> Self {
        Self {
            caller: Caller {
                user_id,
                reply: handle,
            },
            hub,
            router,
            state: SessionState::Connecting,
        }
    }

    async fn open(&mut self) {
        self.hub
            .connect(&self.caller.user_id, self.caller.reply.clone())
            .await;
        self.state = SessionState::Open;
    }

    /// Run the session to completion over `inbound`.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        self.open().await;

        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_text(&text).await,
                Ok(Message::Close(_)) => {
                    debug!(user = %self.caller.user_id, "Client sent close frame");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(user = %self.caller.user_id, error = %e, "Transport error");
                    break;
                }
            }
        }

        self.close().await;
    }

    async fn handle_text(&self, text: &str) {
        let user = &self.caller.user_id;

        if text.len() > MAX_FRAME_BYTES {
            warn!(user = %user, size = text.len(), "Frame too large, dropped");
            self.reply(ServerEvent::error(
                "frame_too_large",
                format!("frames are limited to {MAX_FRAME_BYTES} bytes"),
            ));
            return;
        }

        match self.router.route(&self.caller, text).await {
            Ok(RouteOutcome::Delivered(delivery)) => {
                debug!(
                    user = %user,
                    message = %delivery.message_id,
                    route = ?delivery.route,
                    delivered = delivery.delivered,
                    persisted = delivery.persisted,
                    "Chat message routed"
                );
            }
            Ok(outcome) => debug!(user = %user, ?outcome, "Command handled"),
            Err(err @ RouteError::Decode(_)) => {
                warn!(user = %user, error = %err, "Dropping malformed frame");
            }
            Err(err @ RouteError::UnknownCommand(_)) => {
                warn!(user = %user, error = %err, "Ignoring unrecognized command");
            }
            Err(RouteError::Validation { code, reason }) => {
                warn!(user = %user, code, reason = %reason, "Rejected command");
                self.reply(ServerEvent::error(code, reason));
            }
            Err(err) => {
                warn!(user = %user, error = %err, "Command failed");
            }
        }
    }

    fn reply(&self, event: ServerEvent) {
        match event.to_json() {
            Ok(payload) => {
                if !self.caller.reply.send(&payload) {
                    debug!(user = %self.caller.user_id, "Reply dropped: connection closed");
                }
            }
            Err(e) => warn!(user = %self.caller.user_id, error = %e, "Failed to encode reply"),
        }
    }

    /// Single cleanup path. Returns `false` if the session was already closed.
    pub async fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;

        let conn = self.caller.reply.conn_id();
        let was_live = self.hub.disconnect(&self.caller.user_id, conn).await;
        let secs = (chrono::Utc::now() - self.caller.reply.connected_at()).num_seconds();
        info!(
            user = %self.caller.user_id,
            conn = %conn,
            was_live,
            duration_secs = secs,
            "Session closed"
        );
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Covers a session future dropped mid-loop (e.g. its task aborted).
        if self.state == SessionState::Closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let hub = self.hub.clone();
        let user_id = self.caller.user_id.clone();
        let conn = self.caller.reply.conn_id();
        runtime.spawn(async move {
            hub.disconnect(&user_id, conn).await;
        });
    }
}

/// Drive a WebSocket for `user_id`: a writer task drains the outbound queue
/// into the socket while the session reads from it.
pub async fn serve_socket(socket: WebSocket, user_id: String, hub: Hub, router: Arc<MessageRouter>) {
    let (mut ws_tx, ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_user = user_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                debug!(user = %writer_user, "Write loop closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    info!(user = %user_id, "WebSocket session starting");
    Session::new(user_id, ConnectionHandle::new(tx), hub, router)
        .run(ws_rx)
        .await;

    writer.abort();
}

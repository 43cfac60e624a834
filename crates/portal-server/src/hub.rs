//! Process-wide realtime state.
//!
//! The [`Hub`] owns both the connection table (who is connected, and how to
//! reach them) and the presence table (what status each user last had). Both
//! live behind a single lock so a status read never observes a connection
//! change halfway through. Registry operations are in `registry.rs`, presence
//! transitions in `presence.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use portal_shared::{ServerEvent, UserStatus};

/// Sending half of a session's outbound frame queue.
pub type OutboundSender = mpsc::UnboundedSender<String>;

/// Transport handle for one live session.
///
/// Cloning shares the same outbound queue; the session's writer task drains
/// it into the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    sender: OutboundSender,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn new(sender: OutboundSender) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            sender,
            connected_at: Utc::now(),
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a serialized frame. Returns `false` if the session is gone.
    pub fn send(&self, payload: &str) -> bool {
        self.sender.send(payload.to_string()).is_ok()
    }
}

#[derive(Debug, Default)]
pub(crate) struct HubState {
    pub(crate) connections: HashMap<String, ConnectionHandle>,
    pub(crate) presence: HashMap<String, UserStatus>,
}

impl HubState {
    /// Write `payload` to every connection except `exclude`. A failed write
    /// is logged and does not stop delivery to the rest.
    pub(crate) fn broadcast(&self, payload: &str, exclude: Option<&str>) -> usize {
        let mut delivered = 0;
        for (user_id, handle) in &self.connections {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            if handle.send(payload) {
                delivered += 1;
            } else {
                warn!(user = %user_id, conn = %handle.conn_id(), "Delivery failure: connection closed");
            }
        }
        delivered
    }

    /// Broadcast a `status_update` frame to everyone, the subject included.
    pub(crate) fn broadcast_status(&self, user_id: &str, status: UserStatus) -> usize {
        let event = ServerEvent::StatusUpdate {
            user_id: user_id.to_string(),
            status,
        };
        match event.to_json() {
            Ok(payload) => self.broadcast(&payload, None),
            Err(e) => {
                warn!(user = %user_id, error = %e, "Failed to encode status update");
                0
            }
        }
    }
}

/// Shared registry + presence tracker. Cheap to clone.
#[derive(Clone, Default)]
pub struct Hub {
    pub(crate) state: Arc<RwLock<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }
}

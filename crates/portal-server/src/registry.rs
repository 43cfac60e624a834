//! Connection registry: one live transport handle per user id.
//!
//! The table mutations live on [`HubState`] so the presence tracker can run
//! them under the same write lock as its status change. Registering never
//! broadcasts; presence announcements belong to the session lifecycle (see
//! `presence.rs`).

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{ConnectionHandle, Hub, HubState};

impl HubState {
    /// Install `handle` for `user_id`, returning the handle it replaced.
    ///
    /// A replaced handle is abandoned, not closed: its session notices on its
    /// own when the transport goes away.
    pub(crate) fn register(&mut self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.conn_id();
        let replaced = self.connections.insert(user_id.to_string(), handle);
        if let Some(old) = &replaced {
            info!(user = %user_id, old_conn = %old.conn_id(), new_conn = %conn_id, "Replaced existing connection");
        }
        debug!(user = %user_id, conn = %conn_id, total = self.connections.len(), "Connection registered");
        replaced
    }

    /// Remove the mapping for `user_id`. Removing an absent id is a no-op.
    pub(crate) fn unregister(&mut self, user_id: &str) -> bool {
        let removed = self.connections.remove(user_id).is_some();
        if removed {
            debug!(user = %user_id, total = self.connections.len(), "Connection unregistered");
        }
        removed
    }

    /// Remove the mapping only if it still belongs to `conn_id`, so a
    /// superseded session never evicts the connection that replaced it.
    pub(crate) fn unregister_connection(&mut self, user_id: &str, conn_id: Uuid) -> bool {
        match self.lookup(user_id) {
            Some(current) if current.conn_id() == conn_id => self.unregister(user_id),
            _ => {
                debug!(user = %user_id, conn = %conn_id, "Unregister ignored: not the live connection");
                false
            }
        }
    }

    pub(crate) fn lookup(&self, user_id: &str) -> Option<&ConnectionHandle> {
        self.connections.get(user_id)
    }
}

impl Hub {
    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.state.read().await.lookup(user_id).cloned()
    }

    /// Best-effort write to one user. `false` if absent or the write failed.
    pub async fn send_to(&self, user_id: &str, payload: &str) -> bool {
        let state = self.state.read().await;
        let Some(handle) = state.lookup(user_id) else {
            debug!(user = %user_id, "Delivery skipped: user not connected");
            return false;
        };
        let delivered = handle.send(payload);
        if !delivered {
            warn!(user = %user_id, conn = %handle.conn_id(), "Delivery failure: connection closed");
        }
        delivered
    }

    /// Best-effort write to every connection except `exclude`.
    /// Returns how many connections accepted the frame.
    pub async fn broadcast(&self, payload: &str, exclude: Option<&str>) -> usize {
        self.state.read().await.broadcast(payload, exclude)
    }

    pub async fn connected_users(&self) -> Vec<String> {
        let mut users: Vec<_> = self.state.read().await.connections.keys().cloned().collect();
        users.sort();
        users
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

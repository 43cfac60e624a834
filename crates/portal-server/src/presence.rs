//! Presence tracker.
//!
//! Per-user state machine over `online` / `offline` / `busy`:
//!
//! - `connect` forces `online`, discarding any earlier `busy`.
//! - `disconnect` forces `offline`; busy never survives a disconnect.
//! - `set_status` writes any of the three directly.
//!
//! Every transition broadcasts a `status_update` to all connections,
//! including the subject's own. Entries are created lazily and never removed.

use std::collections::BTreeMap;

use tracing::info;
use uuid::Uuid;

use portal_shared::{ProtocolError, UserStatus};

use crate::hub::{ConnectionHandle, Hub, HubState};

/// What the read model reports for a stored status.
///
/// A connected user is never `offline` and a disconnected user is never
/// `online` or `busy`.
fn effective_status(stored: Option<UserStatus>, connected: bool) -> UserStatus {
    match (connected, stored) {
        (true, Some(UserStatus::Busy)) => UserStatus::Busy,
        (true, _) => UserStatus::Online,
        (false, _) => UserStatus::Offline,
    }
}

impl HubState {
    fn effective_status(&self, user_id: &str) -> UserStatus {
        effective_status(
            self.presence.get(user_id).copied(),
            self.connections.contains_key(user_id),
        )
    }
}

impl Hub {
    /// Register `handle` and mark the user `online`, atomically, then
    /// announce it. Returns the handle this connection replaced, if any.
    pub async fn connect(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut state = self.state.write().await;
        let conn_id = handle.conn_id();
        let replaced = state.register(user_id, handle);
        state.presence.insert(user_id.to_string(), UserStatus::Online);

        info!(
            user = %user_id,
            conn = %conn_id,
            replaced = replaced.is_some(),
            total = state.connections.len(),
            "User connected"
        );
        state.broadcast_status(user_id, UserStatus::Online);
        replaced
    }

    /// Drop the user's connection and mark them `offline`, if `conn_id` is
    /// still their live connection. Returns `false` (and changes nothing)
    /// otherwise, which makes repeated cleanup harmless.
    pub async fn disconnect(&self, user_id: &str, conn_id: Uuid) -> bool {
        let mut state = self.state.write().await;
        if !state.unregister_connection(user_id, conn_id) {
            return false;
        }
        state.presence.insert(user_id.to_string(), UserStatus::Offline);

        info!(user = %user_id, conn = %conn_id, total = state.connections.len(), "User disconnected");
        state.broadcast_status(user_id, UserStatus::Offline);
        true
    }

    /// Explicitly set a user's status and announce it.
    ///
    /// The announcement carries the status as set, even for a user who is
    /// not connected; reads through [`Hub::list_all_statuses`] still report
    /// such a user as `offline`.
    pub async fn set_status(&self, user_id: &str, status: UserStatus) {
        let mut state = self.state.write().await;
        state.presence.insert(user_id.to_string(), status);
        info!(user = %user_id, status = %status, "Status set");
        state.broadcast_status(user_id, status);
    }

    /// Parse `raw` against the status enum, then [`Hub::set_status`].
    pub async fn set_status_str(&self, user_id: &str, raw: &str) -> Result<UserStatus, ProtocolError> {
        let status: UserStatus = raw.parse()?;
        self.set_status(user_id, status).await;
        Ok(status)
    }

    /// Effective status of every user ever seen.
    pub async fn list_all_statuses(&self) -> BTreeMap<String, UserStatus> {
        let state = self.state.read().await;
        state
            .presence
            .keys()
            .chain(state.connections.keys())
            .map(|user_id| (user_id.clone(), state.effective_status(user_id)))
            .collect()
    }

    /// Effective status of one user, or `None` if they were never seen.
    pub async fn status_of(&self, user_id: &str) -> Option<UserStatus> {
        let state = self.state.read().await;
        let known = state.presence.contains_key(user_id) || state.connections.contains_key(user_id);
        known.then(|| state.effective_status(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::test_support::{drain, handle};

    #[test]
    fn test_effective_status_table() {
        use UserStatus::*;
        assert_eq!(effective_status(Some(Busy), true), Busy);
        assert_eq!(effective_status(Some(Offline), true), Online);
        assert_eq!(effective_status(None, true), Online);
        assert_eq!(effective_status(Some(Busy), false), Offline);
        assert_eq!(effective_status(Some(Online), false), Offline);
    }

    #[tokio::test]
    async fn test_connect_busy_disconnect_read_model() {
        let hub = Hub::new();
        let (h, _rx) = handle();
        let conn = h.conn_id();

        hub.connect("alice", h).await;
        assert_eq!(hub.list_all_statuses().await["alice"], UserStatus::Online);

        hub.set_status("alice", UserStatus::Busy).await;
        assert_eq!(hub.list_all_statuses().await["alice"], UserStatus::Busy);

        assert!(hub.disconnect("alice", conn).await);
        assert_eq!(hub.list_all_statuses().await["alice"], UserStatus::Offline);
    }

    #[tokio::test]
    async fn test_busy_set_while_offline_is_reported_offline() {
        let hub = Hub::new();
        hub.set_status("carol", UserStatus::Busy).await;
        assert_eq!(hub.status_of("carol").await, Some(UserStatus::Offline));
        assert_eq!(hub.status_of("nobody").await, None);
    }

    #[tokio::test]
    async fn test_status_set_while_disconnected_is_announced_as_set() {
        let hub = Hub::new();
        let (hb, mut rx_b) = handle();
        hub.connect("bob", hb).await;
        drain(&mut rx_b);

        hub.set_status("carol", UserStatus::Online).await;

        let pushed = drain(&mut rx_b);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0]["user_id"], "carol");
        assert_eq!(pushed[0]["status"], "online");
        assert_eq!(hub.list_all_statuses().await["carol"], UserStatus::Offline);
        assert_eq!(hub.status_of("carol").await, Some(UserStatus::Offline));
    }

    #[tokio::test]
    async fn test_reconnect_overrides_busy() {
        let hub = Hub::new();
        let (h1, _rx1) = handle();
        let c1 = h1.conn_id();
        hub.connect("alice", h1).await;
        hub.set_status("alice", UserStatus::Busy).await;
        hub.disconnect("alice", c1).await;

        let (h2, _rx2) = handle();
        hub.connect("alice", h2).await;
        assert_eq!(hub.status_of("alice").await, Some(UserStatus::Online));
    }

    #[tokio::test]
    async fn test_transitions_broadcast_to_everyone_including_subject() {
        let hub = Hub::new();
        let (hb, mut rx_b) = handle();
        hub.connect("bob", hb).await;
        drain(&mut rx_b);

        let (ha, mut rx_a) = handle();
        let conn_a = ha.conn_id();
        hub.connect("alice", ha).await;
        hub.set_status("alice", UserStatus::Busy).await;

        let seen_by_alice = drain(&mut rx_a);
        assert_eq!(seen_by_alice[0]["type"], "status_update");
        assert_eq!(seen_by_alice[0]["status"], "online");
        assert_eq!(seen_by_alice[1]["status"], "busy");

        hub.disconnect("alice", conn_a).await;
        let seen_by_bob = drain(&mut rx_b);
        let statuses: Vec<_> = seen_by_bob
            .iter()
            .map(|f| (f["user_id"].as_str().unwrap(), f["status"].as_str().unwrap()))
            .collect();
        assert_eq!(
            statuses,
            vec![("alice", "online"), ("alice", "busy"), ("alice", "offline")]
        );
    }

    #[tokio::test]
    async fn test_disconnect_twice_changes_nothing() {
        let hub = Hub::new();
        let (hb, mut rx_b) = handle();
        hub.connect("bob", hb).await;
        let (ha, _rx_a) = handle();
        let conn_a = ha.conn_id();
        hub.connect("alice", ha).await;

        assert!(hub.disconnect("alice", conn_a).await);
        let before = hub.list_all_statuses().await;
        let users_before = hub.connected_users().await;
        drain(&mut rx_b);

        assert!(!hub.disconnect("alice", conn_a).await);
        assert_eq!(hub.list_all_statuses().await, before);
        assert_eq!(hub.connected_users().await, users_before);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_superseded_session_cleanup_keeps_user_online() {
        let hub = Hub::new();
        let (old, _rx_old) = handle();
        let old_conn = old.conn_id();
        hub.connect("alice", old).await;
        let (new, _rx_new) = handle();
        hub.connect("alice", new).await;

        assert!(!hub.disconnect("alice", old_conn).await);
        assert_eq!(hub.status_of("alice").await, Some(UserStatus::Online));
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_set_status_str_validates() {
        let hub = Hub::new();
        assert_eq!(hub.set_status_str("a", "BUSY").await.unwrap(), UserStatus::Busy);
        assert!(matches!(
            hub.set_status_str("a", "sleeping").await,
            Err(ProtocolError::InvalidStatus(_))
        ));
        assert_eq!(hub.state.read().await.presence["a"], UserStatus::Busy);
    }
}

//! Message router.
//!
//! Decodes client frames into commands and dispatches them. Chat messages
//! are classified by routing key (recipient beats channel beats nothing),
//! persisted, and then fanned out through the hub. Persistence comes first
//! but is not a gate: if the store fails, live chat is still delivered.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use portal_shared::{
    ChatMessage, ChatRequest, ClientCommand, FileAttachment, ProtocolError, ServerEvent, UserStatus,
};
use portal_store::MessageFilter;

use crate::hub::{ConnectionHandle, Hub};
use crate::persistence::{MessageStore, PersistenceError};

/// Where a chat message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// To one recipient, echoed back to the sender.
    Direct(String),
    /// Tagged with a channel id; delivered to every connection.
    Channel(String),
    /// Delivered to every connection.
    Global,
}

impl Route {
    /// Recipient takes precedence over channel. Empty strings count as absent.
    pub fn classify(recipient_id: Option<&str>, channel_id: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_owned);
        if let Some(recipient) = present(recipient_id) {
            Route::Direct(recipient)
        } else if let Some(channel) = present(channel_id) {
            Route::Channel(channel)
        } else {
            Route::Global
        }
    }

    /// Rewrite the message's routing keys so only the winning one remains.
    fn apply(&self, message: &mut ChatMessage) {
        match self {
            Route::Direct(recipient) => {
                message.recipient_id = Some(recipient.clone());
                message.channel_id = None;
            }
            Route::Channel(channel) => {
                message.recipient_id = None;
                message.channel_id = Some(channel.clone());
            }
            Route::Global => {
                message.recipient_id = None;
                message.channel_id = None;
            }
        }
    }
}

/// Result of delivering one chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: Uuid,
    pub route: Route,
    /// Connections that accepted the frame (the sender's echo included).
    pub delivered: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(Delivery),
    StatusChanged(UserStatus),
    StatusesSent { count: usize },
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("decode error: {0}")]
    Decode(ProtocolError),

    #[error("unknown command: {0}")]
    UnknownCommand(ProtocolError),

    /// Rejected with `code`, which is echoed to the client in an `error` frame.
    #[error("validation error: {reason}")]
    Validation { code: &'static str, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ProtocolError> for RouteError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidStatus(_) => RouteError::Validation {
                code: "invalid_status",
                reason: err.to_string(),
            },
            e if e.is_unknown_command() => RouteError::UnknownCommand(e),
            e => RouteError::Decode(e),
        }
    }
}

/// The session on whose behalf a frame is routed.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    /// The caller's own connection, for replies that must not go to a newer
    /// session registered under the same user id.
    pub reply: ConnectionHandle,
}

/// A file that has already been uploaded to the blob store and now needs a
/// chat message announcing it.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub channel_id: Option<String>,
    pub recipient_id: Option<String>,
    pub attachment: FileAttachment,
}

pub struct MessageRouter {
    hub: Hub,
    store: Arc<dyn MessageStore>,
}

impl MessageRouter {
    pub fn new(hub: Hub, store: Arc<dyn MessageStore>) -> Self {
        Self { hub, store }
    }

    /// Decode and dispatch one raw client frame.
    pub async fn route(&self, caller: &Caller, raw: &str) -> Result<RouteOutcome, RouteError> {
        let command = ClientCommand::decode(raw)?;

        match command {
            ClientCommand::ChatMessage(request) => {
                let delivery = self.handle_chat(&caller.user_id, request).await?;
                Ok(RouteOutcome::Delivered(delivery))
            }
            ClientCommand::SetStatus { status } => {
                let raw_status = status.as_deref().unwrap_or(UserStatus::Online.as_str());
                let status = self.hub.set_status_str(&caller.user_id, raw_status).await?;
                Ok(RouteOutcome::StatusChanged(status))
            }
            ClientCommand::GetAllStatuses {} => {
                let statuses = self.hub.list_all_statuses().await;
                let count = statuses.len();
                let payload = ServerEvent::AllStatuses { statuses }.to_json()?;
                if !caller.reply.send(&payload) {
                    warn!(user = %caller.user_id, "Delivery failure: could not reply with statuses");
                }
                Ok(RouteOutcome::StatusesSent { count })
            }
        }
    }

    async fn handle_chat(&self, sender_id: &str, request: ChatRequest) -> Result<Delivery, RouteError> {
        let mut message = ChatMessage::new(sender_id, request.sender_name, request.content)
            .with_kind(request.message_type);
        let route = Route::classify(request.recipient_id.as_deref(), request.channel_id.as_deref());
        route.apply(&mut message);

        let persisted = match self.store.insert(&message).await {
            Ok(id) => {
                debug!(message = %id, sender = %sender_id, "Message persisted");
                true
            }
            Err(e) => {
                error!(
                    message = %message.id,
                    sender = %sender_id,
                    error = %e,
                    "Persistence failure: delivering chat message without storing it"
                );
                false
            }
        };

        let delivered = self.fan_out(&message, &route).await?;
        Ok(Delivery {
            message_id: message.id,
            route,
            delivered,
            persisted,
        })
    }

    /// Announce an uploaded file as a `file` chat message.
    ///
    /// Unlike live chat, a storage failure here fails the whole operation
    /// and nothing is delivered.
    pub async fn publish_file(&self, upload: FileUpload) -> Result<Delivery, RouteError> {
        let content = format!("Shared a file: {}", upload.attachment.name);
        let mut message = ChatMessage::new(&upload.sender_id, upload.sender_name, content)
            .with_attachment(upload.attachment);
        let route = Route::classify(upload.recipient_id.as_deref(), upload.channel_id.as_deref());
        route.apply(&mut message);

        self.store.insert(&message).await.map_err(|e| {
            error!(
                message = %message.id,
                sender = %upload.sender_id,
                error = %e,
                "Persistence failure: file message not stored"
            );
            e
        })?;

        let delivered = self.fan_out(&message, &route).await?;
        info!(
            message = %message.id,
            sender = %upload.sender_id,
            file = ?message.file_id,
            delivered,
            "File message published"
        );
        Ok(Delivery {
            message_id: message.id,
            route,
            delivered,
            persisted: true,
        })
    }

    async fn fan_out(&self, message: &ChatMessage, route: &Route) -> Result<usize, RouteError> {
        let payload = message.to_json()?;

        let delivered = match route {
            Route::Direct(recipient) => {
                let to_recipient = self.hub.send_to(recipient, &payload).await;
                if !to_recipient {
                    debug!(message = %message.id, recipient = %recipient, "Direct message not delivered live");
                }
                let echoed = self.hub.send_to(&message.sender_id, &payload).await;
                usize::from(to_recipient) + usize::from(echoed)
            }
            Route::Channel(channel) => {
                let n = self.hub.broadcast(&payload, None).await;
                debug!(message = %message.id, channel = %channel, delivered = n, "Channel message broadcast");
                n
            }
            Route::Global => {
                let n = self.hub.broadcast(&payload, None).await;
                debug!(message = %message.id, delivered = n, "Global message broadcast");
                n
            }
        };

        Ok(delivered)
    }

    /// History for `filter` in chronological (oldest first) order.
    pub async fn history(
        &self,
        filter: &MessageFilter,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, PersistenceError> {
        let mut messages = self.store.query(filter, limit).await?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use portal_store::{Database, StoreError};

    use super::*;
    use crate::hub::test_support::{drain, handle};
    use crate::persistence::SqliteMessageStore;

    /// A store whose writes always fail.
    pub(crate) struct BrokenStore;

    #[async_trait]
    impl MessageStore for BrokenStore {
        async fn insert(&self, _message: &ChatMessage) -> Result<Uuid, PersistenceError> {
            Err(PersistenceError::Store(StoreError::Migration("disk full".into())))
        }

        async fn query(
            &self,
            _filter: &MessageFilter,
            _limit: u32,
        ) -> Result<Vec<ChatMessage>, PersistenceError> {
            Err(PersistenceError::Poisoned)
        }
    }

    /// Records inserts in memory, in insertion order.
    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn insert(&self, message: &ChatMessage) -> Result<Uuid, PersistenceError> {
            self.inserted.lock().unwrap().push(message.clone());
            Ok(message.id)
        }

        async fn query(
            &self,
            _filter: &MessageFilter,
            _limit: u32,
        ) -> Result<Vec<ChatMessage>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn sqlite_router(hub: &Hub) -> MessageRouter {
        let store = SqliteMessageStore::new(Database::open_in_memory().unwrap());
        MessageRouter::new(hub.clone(), Arc::new(store))
    }

    async fn connect(hub: &Hub, user: &str) -> (Caller, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (h, mut rx) = handle();
        hub.connect(user, h.clone()).await;
        drain(&mut rx);
        (
            Caller {
                user_id: user.to_string(),
                reply: h,
            },
            rx,
        )
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(
            Route::classify(Some("bob"), Some("general")),
            Route::Direct("bob".into())
        );
        assert_eq!(Route::classify(None, Some("general")), Route::Channel("general".into()));
        assert_eq!(Route::classify(Some(""), Some("general")), Route::Channel("general".into()));
        assert_eq!(Route::classify(None, None), Route::Global);
        assert_eq!(Route::classify(Some(""), Some("")), Route::Global);
    }

    #[tokio::test]
    async fn test_direct_wins_over_channel() {
        let hub = Hub::new();
        let store = Arc::new(RecordingStore::default());
        let router = MessageRouter::new(hub.clone(), store.clone());
        let (alice, mut rx_a) = connect(&hub, "A").await;
        let (_bob, mut rx_b) = connect(&hub, "B").await;
        let (_carol, mut rx_c) = connect(&hub, "C").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let outcome = router
            .route(
                &alice,
                r#"{"type":"chat_message","recipient_id":"B","channel_id":"general","content":"psst"}"#,
            )
            .await
            .unwrap();

        let RouteOutcome::Delivered(delivery) = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(delivery.route, Route::Direct("B".into()));
        assert_eq!(delivery.delivered, 2);
        assert!(delivery.persisted);

        let to_b = drain(&mut rx_b);
        let to_a = drain(&mut rx_a);
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b, to_a);
        assert_eq!(to_b[0]["content"], "psst");
        assert_eq!(to_b[0]["sender_id"], "A");
        assert!(to_b[0]["channel_id"].is_null());
        assert!(drain(&mut rx_c).is_empty());

        let stored = store.inserted.lock().unwrap();
        assert_eq!(stored[0].recipient_id.as_deref(), Some("B"));
        assert_eq!(stored[0].channel_id, None);
    }

    #[tokio::test]
    async fn test_channel_and_global_reach_everyone_including_sender() {
        let hub = Hub::new();
        let router = sqlite_router(&hub);
        let (alice, mut rx_a) = connect(&hub, "alice").await;
        let (_bob, mut rx_b) = connect(&hub, "bob").await;
        drain(&mut rx_a);

        router
            .route(&alice, r#"{"type":"chat_message","channel_id":"general","content":"hi all"}"#)
            .await
            .unwrap();
        router
            .route(&alice, r#"{"type":"chat_message","content":"global"}"#)
            .await
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0]["channel_id"], "general");
            assert!(frames[1]["channel_id"].is_null());
            assert!(frames[1]["recipient_id"].is_null());
        }
    }

    #[tokio::test]
    async fn test_channel_broadcast_survives_dead_connection() {
        let hub = Hub::new();
        let router = sqlite_router(&hub);
        let (sender, _rx_s) = connect(&hub, "s").await;
        let (_x, rx_x) = connect(&hub, "x").await;
        let (_y, mut rx_y) = connect(&hub, "y").await;
        let (_z, mut rx_z) = connect(&hub, "z").await;
        drop(rx_x);
        drain(&mut rx_y);
        drain(&mut rx_z);

        router
            .route(&sender, r#"{"type":"chat_message","channel_id":"ops","content":"deploy"}"#)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx_y)[0]["content"], "deploy");
        assert_eq!(drain(&mut rx_z)[0]["content"], "deploy");
    }

    #[tokio::test]
    async fn test_persistence_failure_still_delivers() {
        let hub = Hub::new();
        let router = MessageRouter::new(hub.clone(), Arc::new(BrokenStore));
        let (alice, mut rx_a) = connect(&hub, "alice").await;
        let (_bob, mut rx_b) = connect(&hub, "bob").await;
        drain(&mut rx_a);

        let outcome = router
            .route(&alice, r#"{"type":"chat_message","recipient_id":"bob","content":"still here"}"#)
            .await
            .unwrap();

        let RouteOutcome::Delivered(delivery) = outcome else {
            panic!("expected delivery");
        };
        assert!(!delivery.persisted);
        assert_eq!(drain(&mut rx_b)[0]["content"], "still here");
        assert_eq!(drain(&mut rx_a)[0]["content"], "still here");
    }

    #[tokio::test]
    async fn test_file_publish_fails_without_delivery_when_store_fails() {
        let hub = Hub::new();
        let router = MessageRouter::new(hub.clone(), Arc::new(BrokenStore));
        let (_bob, mut rx_b) = connect(&hub, "bob").await;

        let result = router
            .publish_file(FileUpload {
                sender_id: "alice".into(),
                sender_name: Some("Alice".into()),
                channel_id: Some("general".into()),
                recipient_id: None,
                attachment: FileAttachment {
                    url: "u".into(),
                    name: "a.txt".into(),
                    id: "f".into(),
                    size: 1,
                    mime: "text/plain".into(),
                },
            })
            .await;

        assert!(matches!(result, Err(RouteError::Persistence(_))));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_file_publish_follows_direct_rule() {
        let hub = Hub::new();
        let router = sqlite_router(&hub);
        let (_alice, mut rx_a) = connect(&hub, "alice").await;
        let (_bob, mut rx_b) = connect(&hub, "bob").await;
        let (_carol, mut rx_c) = connect(&hub, "carol").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let delivery = router
            .publish_file(FileUpload {
                sender_id: "alice".into(),
                sender_name: Some("Alice".into()),
                channel_id: Some("general".into()),
                recipient_id: Some("bob".into()),
                attachment: FileAttachment {
                    url: "http://localhost:8001/api/files/download/f1".into(),
                    name: "report.pdf".into(),
                    id: "f1".into(),
                    size: 2048,
                    mime: "application/pdf".into(),
                },
            })
            .await
            .unwrap();

        assert_eq!(delivery.route, Route::Direct("bob".into()));
        let to_b = drain(&mut rx_b);
        assert_eq!(to_b[0]["type"], "file");
        assert_eq!(to_b[0]["content"], "Shared a file: report.pdf");
        assert_eq!(to_b[0]["file_name"], "report.pdf");
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn test_status_commands() {
        let hub = Hub::new();
        let router = sqlite_router(&hub);
        let (alice, mut rx_a) = connect(&hub, "alice").await;

        let outcome = router
            .route(&alice, r#"{"type":"set_status","status":"Busy"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::StatusChanged(UserStatus::Busy));

        let outcome = router.route(&alice, r#"{"type":"set_status"}"#).await.unwrap();
        assert_eq!(outcome, RouteOutcome::StatusChanged(UserStatus::Online));

        drain(&mut rx_a);
        let outcome = router
            .route(&alice, r#"{"type":"get_all_statuses"}"#)
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::StatusesSent { count: 1 });
        let reply = drain(&mut rx_a);
        assert_eq!(reply[0]["type"], "all_statuses");
        assert_eq!(reply[0]["statuses"]["alice"], "online");
    }

    #[tokio::test]
    async fn test_error_classes() {
        let hub = Hub::new();
        let router = sqlite_router(&hub);
        let (alice, _rx) = connect(&hub, "alice").await;

        let err = router.route(&alice, "{oops").await.unwrap_err();
        assert!(matches!(err, RouteError::Decode(_)));

        let err = router.route(&alice, r#"{"type":"typing"}"#).await.unwrap_err();
        assert!(matches!(err, RouteError::UnknownCommand(_)));

        let err = router.route(&alice, r#"{"content":"no type"}"#).await.unwrap_err();
        assert!(matches!(err, RouteError::UnknownCommand(_)));

        let err = router
            .route(&alice, r#"{"type":"set_status","status":"napping"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Validation { code: "invalid_status", .. }));
    }

    #[tokio::test]
    async fn test_history_is_chronological() {
        let hub = Hub::new();
        let store = Arc::new(SqliteMessageStore::new(Database::open_in_memory().unwrap()));
        let router = MessageRouter::new(hub, store.clone());

        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut messages = Vec::new();
        for (i, text) in ["t1", "t2", "t3"].iter().enumerate() {
            let mut msg = ChatMessage::new("alice", None, *text);
            msg.channel_id = Some("general".into());
            msg.timestamp = base + Duration::minutes(i as i64);
            messages.push(msg);
        }
        for idx in [2, 0, 1] {
            store.insert(&messages[idx]).await.unwrap();
        }

        let contents: Vec<_> = router
            .history(&MessageFilter::channel("general"), 50)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["t1", "t2", "t3"]);
    }
}

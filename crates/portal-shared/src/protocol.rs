use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    CMD_CHAT_MESSAGE, CMD_GET_ALL_STATUSES, CMD_SET_STATUS, DEFAULT_SENDER_NAME,
};
use crate::error::ProtocolError;
use crate::types::{MessageKind, UserStatus};

/// Commands a client may send over its realtime socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Send a chat message (direct, channel, or global).
    ChatMessage(ChatRequest),

    /// Explicitly set the sender's presence status.
    SetStatus {
        #[serde(default)]
        status: Option<String>,
    },

    /// Ask for a snapshot of every known user's status.
    GetAllStatuses {},
}

/// Body of a `chat_message` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub message_type: MessageKind,
}

impl ClientCommand {
    /// Decode a raw text frame.
    ///
    /// Discriminator problems ([`ProtocolError::MissingType`],
    /// [`ProtocolError::UnknownType`]) are reported separately from bodies
    /// that fail to parse so callers can log them under different categories.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or(ProtocolError::MissingType)?;

        match kind.as_str() {
            CMD_CHAT_MESSAGE | CMD_SET_STATUS | CMD_GET_ALL_STATUSES => {
                Ok(serde_json::from_value(value)?)
            }
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

/// Unsolicited or reply frames pushed by the server (everything except chat
/// envelopes, which are serialized from [`ChatMessage`] directly).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    StatusUpdate {
        user_id: String,
        status: UserStatus,
    },
    AllStatuses {
        statuses: BTreeMap<String, UserStatus>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A chat message, as persisted and as delivered to clients.
///
/// The router guarantees that `channel_id` and `recipient_id` are never both
/// set on a message it has classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub channel_id: Option<String>,
    pub recipient_id: Option<String>,
    pub content: String,
    /// Creation time; serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// Metadata of an uploaded file attached to a `file` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub url: String,
    pub name: String,
    pub id: String,
    pub size: u64,
    pub mime: String,
}

impl ChatMessage {
    /// Build a text message stamped with the current time and a fresh id.
    ///
    /// The timestamp is truncated to microseconds, the precision the store
    /// keeps, so a persisted message reads back with its creation time intact.
    pub fn new(
        sender_id: impl Into<String>,
        sender_name: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: sender_id.into(),
            sender_name: sender_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_SENDER_NAME.to_string()),
            channel_id: None,
            recipient_id: None,
            content: content.into(),
            timestamp: Utc::now().trunc_subsecs(6),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
            file_id: None,
            file_size: None,
            file_type: None,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_attachment(mut self, file: FileAttachment) -> Self {
        self.kind = MessageKind::File;
        self.file_url = Some(file.url);
        self.file_name = Some(file.name);
        self.file_id = Some(file.id);
        self.file_size = Some(file.size);
        self.file_type = Some(file.mime);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

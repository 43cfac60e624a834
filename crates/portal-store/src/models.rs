//! Query types for the message store.

/// Which messages a history query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Every message tagged with this channel id.
    Channel(String),
    /// Direct messages exchanged between two users, in either direction.
    Conversation { user_a: String, user_b: String },
}

impl MessageFilter {
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self::Channel(channel_id.into())
    }

    pub fn conversation(user_a: impl Into<String>, user_b: impl Into<String>) -> Self {
        Self::Conversation {
            user_a: user_a.into(),
            user_b: user_b.into(),
        }
    }
}

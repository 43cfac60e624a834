//! # portal-shared
//!
//! Wire types shared by the portal server and its store: the JSON frames
//! exchanged over the realtime socket, the chat message envelope, and the
//! presence status enum.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ChatMessage, ChatRequest, ClientCommand, FileAttachment, ServerEvent};
pub use types::{MessageKind, UserStatus};

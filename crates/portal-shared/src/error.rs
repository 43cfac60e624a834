use thiserror::Error;

/// Errors raised while decoding client frames or validating their values.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame is not valid JSON, or a recognized command has a malformed body.
    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The frame parsed but is not a JSON object.
    #[error("Frame is not a JSON object")]
    NotAnObject,

    /// The frame has no string `type` field.
    #[error("Frame has no 'type' discriminator")]
    MissingType,

    /// The `type` field names a command this server does not handle.
    #[error("Unknown command type: {0}")]
    UnknownType(String),

    /// A status value outside `online` / `offline` / `busy`.
    #[error("Invalid status '{0}'. Must be 'online', 'offline', or 'busy'")]
    InvalidStatus(String),
}

impl ProtocolError {
    /// `true` for discriminator problems (the frame was structurally fine).
    pub fn is_unknown_command(&self) -> bool {
        matches!(self, Self::MissingType | Self::UnknownType(_))
    }
}

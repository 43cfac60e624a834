/// Application name
pub const APP_NAME: &str = "Employee Portal";

/// Maximum inbound realtime frame size in bytes (256 KiB)
pub const MAX_FRAME_BYTES: usize = 262_144;

/// Maximum file upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8001;

/// Display name used when a chat frame omits `sender_name`
pub const DEFAULT_SENDER_NAME: &str = "Unknown User";

/// Number of messages returned by a history query when no limit is given
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Upper bound on a single history query
pub const MAX_HISTORY_LIMIT: u32 = 500;

/// Frame discriminators accepted from clients
pub const CMD_CHAT_MESSAGE: &str = "chat_message";
pub const CMD_SET_STATUS: &str = "set_status";
pub const CMD_GET_ALL_STATUSES: &str = "get_all_statuses";

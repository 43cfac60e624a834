//! v001 -- Initial schema creation.
//!
//! Creates the append-only `messages` table and the two indexes that back
//! channel and conversation history queries.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id    TEXT NOT NULL,
    sender_name  TEXT NOT NULL,
    channel_id   TEXT,                        -- set for channel messages
    recipient_id TEXT,                        -- set for direct messages
    content      TEXT NOT NULL,
    timestamp    TEXT NOT NULL,               -- RFC 3339, UTC, microseconds
    kind         TEXT NOT NULL DEFAULT 'text',
    file_url     TEXT,
    file_name    TEXT,
    file_id      TEXT,
    file_size    INTEGER,
    file_type    TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ts
    ON messages(channel_id, timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, recipient_id, timestamp DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

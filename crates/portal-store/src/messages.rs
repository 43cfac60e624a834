//! Append-only persistence for [`ChatMessage`] records.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use portal_shared::{ChatMessage, MessageKind};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::MessageFilter;

const SELECT_COLUMNS: &str = "SELECT id, sender_id, sender_name, channel_id, recipient_id,
        content, timestamp, kind, file_url, file_name, file_id, file_size, file_type
     FROM messages";

impl Database {
    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, sender_name, channel_id, recipient_id,
                                   content, timestamp, kind, file_url, file_name, file_id,
                                   file_size, file_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                message.id.to_string(),
                message.sender_id,
                message.sender_name,
                message.channel_id,
                message.recipient_id,
                message.content,
                format_timestamp(&message.timestamp),
                message.kind.as_str(),
                message.file_url,
                message.file_name,
                message.file_id,
                message.file_size.map(|s| s as i64),
                message.file_type,
            ],
        )?;
        Ok(())
    }

    /// Messages matching `filter`, newest first, at most `limit` rows.
    pub fn get_messages(&self, filter: &MessageFilter, limit: u32) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::new();

        match filter {
            MessageFilter::Channel(channel_id) => {
                let mut stmt = self.conn().prepare(&format!(
                    "{SELECT_COLUMNS}
                     WHERE channel_id = ?1
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![channel_id, limit], row_to_message)?;
                for row in rows {
                    messages.push(row?);
                }
            }
            MessageFilter::Conversation { user_a, user_b } => {
                let mut stmt = self.conn().prepare(&format!(
                    "{SELECT_COLUMNS}
                     WHERE (sender_id = ?1 AND recipient_id = ?2)
                        OR (sender_id = ?2 AND recipient_id = ?1)
                     ORDER BY timestamp DESC, rowid DESC
                     LIMIT ?3"
                ))?;
                let rows = stmt.query_map(params![user_a, user_b, limit], row_to_message)?;
                for row in rows {
                    messages.push(row?);
                }
            }
        }

        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Result<ChatMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn count_messages(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Fixed-width UTC form so that text ordering matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    index: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err.into())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id_str: String = row.get(0)?;
    let ts_str: String = row.get(6)?;
    let kind_str: String = row.get(7)?;
    let file_size: Option<i64> = row.get(11)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(6, e))?;

    let kind: MessageKind = kind_str.parse().map_err(|e: String| conversion_error(7, e))?;

    Ok(ChatMessage {
        id,
        sender_id: row.get(1)?,
        sender_name: row.get(2)?,
        channel_id: row.get(3)?,
        recipient_id: row.get(4)?,
        content: row.get(5)?,
        timestamp,
        kind,
        file_url: row.get(8)?,
        file_name: row.get(9)?,
        file_id: row.get(10)?,
        file_size: file_size.map(|s| s as u64),
        file_type: row.get(12)?,
    })
}

//! Persistence gateway seam.
//!
//! The router only needs "append a message" and "read messages back,
//! newest first". [`SqliteMessageStore`] provides both on top of
//! `portal-store`, running the blocking SQLite calls off the async runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use portal_shared::ChatMessage;
use portal_store::{Database, MessageFilter, StoreError};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("database handle poisoned")]
    Poisoned,
}

/// Append-only message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message` and return its id.
    async fn insert(&self, message: &ChatMessage) -> Result<Uuid, PersistenceError>;

    /// Up to `limit` messages matching `filter`, newest first.
    async fn query(
        &self,
        filter: &MessageFilter,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, PersistenceError>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| PersistenceError::Poisoned)?;
            f(&guard).map_err(PersistenceError::from)
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: &ChatMessage) -> Result<Uuid, PersistenceError> {
        let message = message.clone();
        self.with_db(move |db| {
            db.insert_message(&message)?;
            Ok(message.id)
        })
        .await
    }

    async fn query(
        &self,
        filter: &MessageFilter,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, PersistenceError> {
        let filter = filter.clone();
        self.with_db(move |db| db.get_messages(&filter, limit)).await
    }
}

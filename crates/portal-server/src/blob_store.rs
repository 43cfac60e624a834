//! Local-disk file store backing uploads and downloads.
//!
//! Each file lives at `<base>/<uuid>` with a `<uuid>.json` sidecar holding
//! its original name, MIME type and visibility. Client-supplied names are
//! only ever stored in the sidecar, never used to build a path.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMeta {
    pub file_name: String,
    pub mime: String,
    pub size: u64,
    pub public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub id: Uuid,
    pub url: String,
}

#[derive(Debug)]
pub struct DownloadedFile {
    pub data: Vec<u8>,
    pub meta: FileMeta,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
    public_base_url: String,
}

impl BlobStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        public_base_url: impl Into<String>,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create storage directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "File store initialized");

        Ok(Self {
            base_path,
            max_size,
            public_base_url: public_base_url.into(),
        })
    }

    /// Download URL handed out to clients for `id`.
    pub fn url_for(&self, id: Uuid) -> String {
        format!("{}/api/files/download/{}", self.public_base_url, id)
    }

    /// Store `data` privately and return its id and download URL.
    pub async fn upload(&self, data: &[u8], file_name: &str, mime: &str) -> Result<StoredFile, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let meta = FileMeta {
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            size: data.len() as u64,
            public: false,
            created_at: Utc::now(),
        };

        fs::write(self.data_path(&id), data)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to write file {}: {}", id, e)))?;
        self.write_meta(&id, &meta).await?;

        debug!(id = %id, size = data.len(), mime = %mime, "Stored file");
        Ok(StoredFile {
            id,
            url: self.url_for(id),
        })
    }

    /// Mark a stored file as publicly downloadable.
    pub async fn set_public_read(&self, id: Uuid) -> Result<(), ServerError> {
        let mut meta = self.read_meta(&id).await?;
        if !meta.public {
            meta.public = true;
            self.write_meta(&id, &meta).await?;
        }
        debug!(id = %id, "File made public");
        Ok(())
    }

    pub async fn download(&self, id: Uuid) -> Result<DownloadedFile, ServerError> {
        let meta = self.read_meta(&id).await?;
        if !meta.public {
            return Err(ServerError::Forbidden(format!("File {id} is not shared")));
        }

        let data = match fs::read(self.data_path(&id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(id = %id, "Sidecar present but file data missing");
                return Err(ServerError::FileNotFound(id));
            }
            Err(e) => {
                return Err(ServerError::FileStorage(format!("Failed to read file {}: {}", id, e)));
            }
        };

        debug!(id = %id, size = data.len(), "Retrieved file");
        Ok(DownloadedFile { data, meta })
    }

    async fn read_meta(&self, id: &Uuid) -> Result<FileMeta, ServerError> {
        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::FileNotFound(*id));
            }
            Err(e) => {
                return Err(ServerError::FileStorage(format!("Failed to read metadata {}: {}", id, e)));
            }
        };
        serde_json::from_slice(&raw)
            .map_err(|e| ServerError::FileStorage(format!("Corrupt metadata for {}: {}", id, e)))
    }

    async fn write_meta(&self, id: &Uuid, meta: &FileMeta) -> Result<(), ServerError> {
        let raw = serde_json::to_vec(meta)
            .map_err(|e| ServerError::Internal(format!("Failed to encode metadata: {e}")))?;
        fs::write(self.meta_path(id), raw)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to write metadata {}: {}", id, e)))
    }

    fn data_path(&self, id: &Uuid) -> PathBuf {
        self.base_path.join(id.to_string())
    }

    fn meta_path(&self, id: &Uuid) -> PathBuf {
        self.base_path.join(format!("{id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf(), 1024, "http://portal.test")
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_upload_publish_download() {
        let (store, _dir) = test_store().await;

        let stored = store.upload(b"quarterly numbers", "q3 report.pdf", "application/pdf").await.unwrap();
        assert_eq!(stored.url, format!("http://portal.test/api/files/download/{}", stored.id));

        store.set_public_read(stored.id).await.unwrap();
        let file = store.download(stored.id).await.unwrap();
        assert_eq!(file.data, b"quarterly numbers");
        assert_eq!(file.meta.file_name, "q3 report.pdf");
        assert_eq!(file.meta.mime, "application/pdf");
        assert_eq!(file.meta.size, 17);
    }

    #[tokio::test]
    async fn test_private_file_is_forbidden() {
        let (store, _dir) = test_store().await;
        let stored = store.upload(b"secret", "a.txt", "text/plain").await.unwrap();
        assert!(matches!(store.download(stored.id).await, Err(ServerError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (store, _dir) = test_store().await;
        let missing = Uuid::new_v4();
        assert!(matches!(store.download(missing).await, Err(ServerError::FileNotFound(_))));
        assert!(matches!(store.set_public_read(missing).await, Err(ServerError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_and_oversized_rejected() {
        let (store, _dir) = test_store().await;
        assert!(matches!(store.upload(b"", "a", "text/plain").await, Err(ServerError::BadRequest(_))));
        assert!(matches!(
            store.upload(&[0u8; 1025], "a", "text/plain").await,
            Err(ServerError::FileTooLarge { size: 1025, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_file_name_never_becomes_a_path() {
        let (store, dir) = test_store().await;
        let stored = store.upload(b"x", "../../etc/passwd", "text/plain").await.unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec![stored.id.to_string(), format!("{}.json", stored.id)]);
    }
}

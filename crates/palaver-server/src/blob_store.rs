//! On-disk store for uploaded images and files.
//!
//! Each upload is one file named by its UUID under the upload directory.
//! Messages reference uploads through `AssetRef::blob_id`; deleting such a
//! message removes the file. Uploads never attached to a message are purged
//! once they are older than a grace period.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ServerError;

/// Resolve `name` under `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            _ => {
                return Err(ServerError::UploadStorage(format!(
                    "refusing path component in '{name}'"
                )));
            }
        }
    }
    if !resolved.starts_with(base) || resolved == base {
        return Err(ServerError::UploadStorage(format!("refusing path '{name}'")));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::UploadStorage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Upload store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn store_blob(&self, data: &[u8]) -> Result<Uuid, ServerError> {
        if data.is_empty() {
            return Err(ServerError::Chat(palaver_shared::ChatError::Validation(
                "upload is empty".into(),
            )));
        }
        if data.len() > self.max_size {
            return Err(ServerError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let id = Uuid::new_v4();
        let path = self.blob_path(&id)?;

        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::UploadStorage(format!("Failed to write upload {id}: {e}")))?;

        debug!(id = %id, size = data.len(), "Stored upload");
        Ok(id)
    }

    pub async fn get_blob(&self, id: Uuid) -> Result<Vec<u8>, ServerError> {
        let path = self.blob_path(&id)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::UploadNotFound(id))
            }
            Err(e) => Err(ServerError::UploadStorage(format!(
                "Failed to read upload {id}: {e}"
            ))),
        }
    }

    pub async fn delete_blob(&self, id: Uuid) -> Result<(), ServerError> {
        let path = self.blob_path(&id)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id = %id, "Deleted upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServerError::UploadNotFound(id))
            }
            Err(e) => Err(ServerError::UploadStorage(format!(
                "Failed to delete upload {id}: {e}"
            ))),
        }
    }

    /// Remove the files behind deleted messages. Missing files are ignored;
    /// other failures are logged and do not fail the caller.
    pub async fn discard(&self, ids: &[Uuid]) {
        for id in ids {
            match self.delete_blob(*id).await {
                Ok(()) | Err(ServerError::UploadNotFound(_)) => {}
                Err(e) => warn!(id = %id, error = %e, "Failed to discard upload"),
            }
        }
    }

    /// Delete uploads that no message references and that are at least
    /// `min_age` old. Files not named by a UUID are left alone. Returns the
    /// number of files removed.
    pub async fn purge_unreferenced(
        &self,
        referenced: &HashSet<Uuid>,
        min_age: Duration,
    ) -> Result<usize, ServerError> {
        let storage = |e: std::io::Error| {
            ServerError::UploadStorage(format!("Failed to scan upload directory: {e}"))
        };
        let mut entries = fs::read_dir(&self.base_path).await.map_err(storage)?;
        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(storage)? {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            if referenced.contains(&id) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(id = %id, error = %e, "Cannot stat upload");
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or_default() < min_age {
                continue;
            }
            match self.delete_blob(id).await {
                Ok(()) => removed += 1,
                Err(ServerError::UploadNotFound(_)) => {}
                Err(e) => warn!(id = %id, error = %e, "Failed to purge upload"),
            }
        }

        if removed > 0 {
            info!(removed, "Purged unreferenced uploads");
        }
        Ok(removed)
    }

    fn blob_path(&self, id: &Uuid) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, &id.to_string())
    }
}

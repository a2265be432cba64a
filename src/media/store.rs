use std::{io::ErrorKind, path::PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{AppError, AppResult};

/// Media bytes on local disk, one file per media id.
///
/// Stands in for an object store; callers only ever put, get and delete whole
/// blobs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> AppResult<Self> {
        fs::create_dir_all(&base_path).await?;
        info!(path = %base_path.display(), "blob store ready");
        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub async fn put(&self, id: Uuid, data: &[u8]) -> AppResult<()> {
        if data.is_empty() {
            return Err(AppError::BadRequest("file cannot be empty".to_owned()));
        }
        if data.len() > self.max_size {
            return Err(AppError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        fs::write(self.path(id), data).await?;
        debug!(%id, size = data.len(), "stored blob");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Vec<u8>> {
        match fs::read(self.path(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound("media")),
            Err(e) => Err(e.into()),
        }
    }

    /// Deleting a missing blob is not an error.
    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        match fs::remove_file(self.path(id)).await {
            Ok(()) => {
                debug!(%id, "deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(id.simple().to_string())
    }
}

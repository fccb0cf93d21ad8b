use async_trait::async_trait;
use std::{io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::fs;
use tracing::{debug, warn};

use super::{FileStorage, FileStorageBackend, StorageKey, StoredFile};
use crate::errors::{Error, Result};

/// Stores files in a single flat directory, one file per key.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    location: PathBuf,
}

impl LocalFileStorage {
    pub async fn open(location: impl Into<PathBuf>) -> anyhow::Result<FileStorage> {
        let location = location.into();

        fs::create_dir_all(&location).await?;

        debug!(location = %location.display(), "Opened local file storage");

        Ok(Arc::new(LocalFileStorage { location }))
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.location.join(key.as_str())
    }

    fn temp_path(&self) -> PathBuf {
        // Leading dot keeps temp names outside the StorageKey namespace
        self.location.join(format!(".upload-{}.tmp", uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl FileStorageBackend for LocalFileStorage {
    async fn store(&self, key: &StorageKey, data: &[u8]) -> Result<u64> {
        let path = self.path_for(key);
        let temp_path = self.temp_path();

        let written = match fs::write(&temp_path, data).await {
            Ok(()) => fs::rename(&temp_path, &path).await,
            Err(e) => Err(e),
        };

        if let Err(source) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp upload file");
            }

            return Err(Error::Storage {
                operation: "save file".to_string(),
                source,
            });
        }

        Ok(data.len() as u64)
    }

    async fn open(&self, key: &StorageKey) -> Result<StoredFile> {
        let not_found = || Error::NotFound {
            filename: key.to_string(),
        };
        let read_error = |source| Error::Storage {
            operation: "read file".to_string(),
            source,
        };

        let file = match fs::File::open(self.path_for(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(read_error(e)),
        };

        let metadata = file.metadata().await.map_err(read_error)?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        Ok(StoredFile {
            size: metadata.len(),
            content: Box::new(file),
        })
    }
}

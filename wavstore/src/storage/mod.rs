//! Stored file persistence.
//!
//! Handlers talk to a [`FileStorage`] and never build filesystem paths themselves. Every lookup
//! goes through a [`StorageKey`], which is the client-supplied filename once it has been checked
//! to be a single plain path component.

use async_trait::async_trait;
use std::{fmt, fmt::Debug, sync::Arc};
use tokio::io::{AsyncRead, AsyncSeek};

use crate::errors::Result;

pub mod local;

pub use local::LocalFileStorage;

pub type FileStorage = Arc<dyn FileStorageBackend>;

#[async_trait]
pub trait FileStorageBackend: Debug + Send + Sync {
    /// Persist `data` under `key`, replacing any existing file. Returns the number of bytes written.
    ///
    /// Readers never observe a partially written file.
    async fn store(&self, key: &StorageKey, data: &[u8]) -> Result<u64>;

    /// Open a stored file for reading. Fails with [`crate::errors::Error::NotFound`] if absent.
    async fn open(&self, key: &StorageKey) -> Result<StoredFile>;
}

/// Readable, seekable file content.
pub trait ContentReader: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ContentReader for T {}

/// An opened stored file.
pub struct StoredFile {
    /// Size in bytes at the time the file was opened
    pub size: u64,
    pub content: Box<dyn ContentReader>,
}

impl Debug for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFile").field("size", &self.size).finish_non_exhaustive()
    }
}

/// A filename that is safe to use as a path segment under the storage directory.
///
/// The key is the client's filename verbatim, so a file is always retrieved by exactly the name
/// it was uploaded under. Names that could escape the directory or collide with in-flight temp
/// files (leading `.`) are refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn parse(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\', '\0'])
            && name.chars().all(|c| !c.is_control());

        valid.then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

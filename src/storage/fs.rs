//! Filesystem storage backend.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::{ArchiverError, Result};
use crate::storage::Storage;

/// Storage backend that writes files to the local filesystem.
///
/// Intermediate directories are created automatically. The `key` provided to
/// [`Storage::put`] is joined with the base directory to form the final path.
/// Files are synced before `put` returns, so a caller may record the write as
/// done (e.g. in the visited ledger) right after.
///
/// # Example
///
/// ```rust,no_run
/// use post_archiver::FsStorage;
///
/// let storage = FsStorage::new("./archive/2024");
/// ```
#[derive(Clone, Debug)]
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    /// Create a new `FsStorage` rooted at the given directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_of(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

impl Storage for FsStorage {
    async fn put(&self, key: &str, content: &[u8], _content_type: &str) -> Result<()> {
        let path = self.base_dir.join(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArchiverError::Storage(Box::new(e)))?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ArchiverError::Storage(Box::new(e)))?;
        file.write_all(content)
            .await
            .map_err(|e| ArchiverError::Storage(Box::new(e)))?;
        file.sync_all()
            .await
            .map_err(|e| ArchiverError::Storage(Box::new(e)))?;

        tracing::debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::AppError;
use crate::filesys::dir::Dir;

/// On-disk layout of the daemon's state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Per-build working directories
    pub fn workspace_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("builds"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AppError> {
        self.workspace_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/deployd")
    }
}

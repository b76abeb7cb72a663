//! Directory operations

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};

use crate::errors::AppError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), AppError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Create a uniquely named directory below this one that is removed
    /// again when the returned guard goes away
    pub async fn create_scoped(&self, prefix: &str) -> Result<ScopedDir, AppError> {
        let dir = self.subdir(&format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        dir.create().await?;
        debug!("Created working directory {}", dir.path().display());
        Ok(ScopedDir {
            dir,
            removed: false,
            abandoned: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// A directory owned by one unit of work.
///
/// Removed by [`ScopedDir::remove`] on the normal path, or synchronously on
/// drop if the owner is cancelled or unwinds.
#[derive(Debug)]
pub struct ScopedDir {
    dir: Dir,
    removed: bool,
    abandoned: Arc<AtomicBool>,
}

impl ScopedDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn subdir(&self, name: &str) -> Dir {
        self.dir.subdir(name)
    }

    /// Flag set when the guard is dropped without [`ScopedDir::remove`].
    /// Blocking writers check it and clean up after themselves once set.
    pub fn abandoned(&self) -> Arc<AtomicBool> {
        self.abandoned.clone()
    }

    /// Remove the directory and everything in it
    pub async fn remove(mut self) -> Result<(), AppError> {
        self.try_remove().await
    }

    /// Stays armed for the drop fallback unless the delete succeeded
    async fn try_remove(&mut self) -> Result<(), AppError> {
        self.dir.delete().await?;
        self.removed = true;
        debug!("Removed working directory {}", self.dir.path().display());
        Ok(())
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        self.abandoned.store(true, Ordering::SeqCst);
        match std::fs::remove_dir_all(self.dir.path()) {
            Ok(()) => debug!("Removed working directory {}", self.dir.path().display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove working directory {}: {}",
                self.dir.path().display(),
                e
            ),
        }
    }
}

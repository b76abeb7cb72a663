//! Source bundle extraction

use std::fs;
use std::io::{self, Cursor, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::errors::ExtractionError;
use crate::filesys::dir::ScopedDir;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Summary of an extracted bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub bytes: u64,
}

/// Name of the build context directory inside a working directory
pub const CONTEXT_DIR: &str = "context";

/// Unpack `bundle` into the [`CONTEXT_DIR`] of `workdir` on a blocking
/// thread.
///
/// If `workdir` is dropped while the extraction runs, the blocking thread
/// stops at the next entry and removes the directory once it no longer
/// writes to it.
pub async fn extract(
    bundle: Vec<u8>,
    workdir: &ScopedDir,
    max_bytes: u64,
) -> Result<ExtractStats, ExtractionError> {
    let root = workdir.path().to_path_buf();
    let abandoned = workdir.abandoned();

    tokio::task::spawn_blocking(move || {
        let target = root.join(CONTEXT_DIR);
        let result = extract_zip(Cursor::new(bundle), &target, max_bytes, &abandoned);
        if abandoned.load(Ordering::SeqCst) {
            remove_abandoned(&root);
        }
        result
    })
    .await
    .map_err(|e| ExtractionError::Io(io::Error::other(e)))?
}

fn remove_abandoned(workdir: &Path) {
    match fs::remove_dir_all(workdir) {
        Ok(()) => debug!("Removed abandoned working directory {}", workdir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove abandoned working directory {}: {}",
            workdir.display(),
            e
        ),
    }
}

/// Create `relative` below `target` one level at a time. Never re-creates
/// `target` itself, so a removed working directory stays removed.
fn create_dirs_within(target: &Path, relative: &Path) -> io::Result<()> {
    let mut dir = target.to_path_buf();
    for component in relative.components() {
        dir.push(component);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Unpack a zip archive into `target`, whose parent must exist.
///
/// Rejects entries that would land outside `target`, symlink entries, and
/// archives whose content exceeds `max_bytes` once inflated. Stops with
/// [`ExtractionError::Cancelled`] once `cancelled` is set. On error the
/// target may hold a partial extraction; the caller owns its cleanup.
pub fn extract_zip<R: Read + Seek>(
    archive: R,
    target: &Path,
    max_bytes: u64,
    cancelled: &AtomicBool,
) -> Result<ExtractStats, ExtractionError> {
    let mut zip = ZipArchive::new(archive)?;
    match fs::create_dir(target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    let mut stats = ExtractStats { files: 0, bytes: 0 };

    for index in 0..zip.len() {
        if cancelled.load(Ordering::SeqCst) {
            return Err(ExtractionError::Cancelled);
        }

        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_string();

        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            return Err(ExtractionError::UnsupportedEntry(name));
        }

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ExtractionError::PathTraversal(name.clone()))?;
        let out_path = target.join(&relative);
        if !out_path.starts_with(target) {
            return Err(ExtractionError::PathTraversal(name));
        }

        if entry.is_dir() {
            create_dirs_within(target, &relative)?;
            continue;
        }

        if let Some(parent) = relative.parent() {
            create_dirs_within(target, parent)?;
        }

        let remaining = max_bytes.saturating_sub(stats.bytes);
        let mut out = fs::File::create(&out_path)?;
        let mut limited = (&mut entry).take(remaining.saturating_add(1));
        let written = std::io::copy(&mut limited, &mut out)?;
        stats.bytes += written;
        if stats.bytes > max_bytes {
            return Err(ExtractionError::TooLarge { limit: max_bytes });
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o755 | 0o600))?;
        }

        stats.files += 1;
    }

    debug!(
        "Extracted {} files ({} bytes) into {}",
        stats.files,
        stats.bytes,
        target.display()
    );
    Ok(stats)
}

//! Atomic configuration persistence.
//!
//! # Responsibilities
//! - Read the currently applied configuration (missing file = empty)
//! - Stage new content in a temp file beside the target, fsync it
//! - Rename over the target so readers see old or new, never a mix
//!
//! # Design Decisions
//! - Temp file lives in the target directory (rename must not cross filesystems)
//! - An uncommitted stage is deleted on drop; the target is never touched
//! - Existing file permissions are carried over to the replacement

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::sync::error::{SyncError, SyncResult};
use crate::upstream::EffectiveConfiguration;

/// New content written and synced, waiting to replace its target.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    /// Path of the temp file holding the staged content.
    pub fn temp_path(&self) -> &Path {
        self.file.path()
    }

    /// Atomically replace the target with the staged content.
    pub fn commit(self) -> io::Result<()> {
        let dir = parent_dir(&self.target).to_path_buf();
        self.file.persist(&self.target).map_err(|e| e.error)?;

        // The rename is done; a failed directory sync only weakens durability.
        if let Err(e) = sync_dir(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to sync directory after rename");
        }
        Ok(())
    }
}

/// Write `contents` to a temp file next to `target` without replacing it.
pub fn stage_atomic(target: &Path, contents: &[u8]) -> io::Result<StagedFile> {
    let dir = parent_dir(target);
    let prefix = format!(
        ".{}.",
        target.file_name().and_then(|n| n.to_str()).unwrap_or("upstream")
    );

    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    copy_permissions(target, file.as_file())?;

    Ok(StagedFile {
        file,
        target: target.to_path_buf(),
    })
}

/// Replace `target` with `contents` atomically.
pub fn write_atomic(target: &Path, contents: &[u8]) -> io::Result<()> {
    stage_atomic(target, contents)?.commit()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn copy_permissions(target: &Path, file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = match fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::Permissions::from_mode(0o644),
        Err(e) => return Err(e),
    };
    file.set_permissions(permissions)
}

#[cfg(not(unix))]
fn copy_permissions(_target: &Path, _file: &File) -> io::Result<()> {
    Ok(())
}

/// Reads and atomically replaces the persisted proxy configuration.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    path: PathBuf,
}

impl ConfigWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last applied configuration; empty if none was ever written.
    pub fn read_current(&self) -> SyncResult<EffectiveConfiguration> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(EffectiveConfiguration::new(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(EffectiveConfiguration::default()),
            Err(source) => Err(SyncError::ReadFailed {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Stage `candidate` without replacing the current file.
    pub fn stage(&self, candidate: &EffectiveConfiguration) -> SyncResult<StagedFile> {
        let mut document = candidate.as_str().to_string();
        document.push('\n');
        stage_atomic(&self.path, document.as_bytes()).map_err(|source| self.write_failed(source))
    }

    /// Atomically replace the current file with `candidate`.
    pub fn write(&self, candidate: &EffectiveConfiguration) -> SyncResult<()> {
        self.stage(candidate)?
            .commit()
            .map_err(|source| self.write_failed(source))?;

        tracing::info!(path = %self.path.display(), bytes = candidate.as_str().len() + 1, "Wrote upstream configuration");
        Ok(())
    }

    fn write_failed(&self, source: io::Error) -> SyncError {
        SyncError::WriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}

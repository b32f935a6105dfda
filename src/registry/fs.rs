//! Directory-backed registry store.
//!
//! Objects live at `<root>/<bucket>/<key>`. The version token is built from
//! the file's modification time and length, the same shape nginx uses for
//! static-file ETags.
//!
//! # Conditional writes
//! ```text
//! Always   → temp file + rename
//! Absent   → temp file + hard link (fails if the name exists) → Conflict
//! Matches  → exclusive `.<name>.lock` (create_new), compare token, rename
//! ```
//! The lock file is only ever held across a compare and a rename. A writer
//! that dies in between leaves it behind; later conditional writes to that
//! object report Conflict until it is removed.

use std::fs::{self, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::registry::types::{
    CacheToken, FetchResult, RegistryStore, StoreError, StoreResult, WriteCondition,
};
use crate::sync::writer::{stage_atomic, write_atomic};

/// Registry store over a local or network-mounted directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for segment in key.split('/').filter(|s| !s.is_empty() && *s != "..") {
            path.push(segment);
        }
        path
    }
}

fn token_of(meta: &Metadata) -> CacheToken {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    CacheToken::new(format!("\"{:x}-{:x}\"", mtime, meta.len()))
}

fn not_found_or_io(error: io::Error, bucket: &str, key: &str) -> StoreError {
    if error.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StoreError::Io(error)
    }
}

fn conflict(bucket: &str, key: &str) -> StoreError {
    StoreError::Conflict {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

/// Exclusive per-object write lock, released on drop.
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    /// Take the lock, or `None` if another writer holds it.
    fn try_acquire(target: &Path) -> io::Result<Option<Self>> {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let path = target.with_file_name(format!(".{}.lock", name));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Some(Self { path })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release registry write lock");
        }
    }
}

/// Blocking body of [`FsStore::put`].
fn put_blocking(
    path: &Path,
    content: &[u8],
    condition: &WriteCondition,
    bucket: &str,
    key: &str,
) -> StoreResult<CacheToken> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match condition {
        WriteCondition::Always => write_atomic(path, content)?,
        WriteCondition::Absent => {
            // The staged temp file is removed on drop; the link survives it.
            let staged = stage_atomic(path, content)?;
            match fs::hard_link(staged.temp_path(), path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(conflict(bucket, key))
                }
                Err(e) => return Err(e.into()),
            }
        }
        WriteCondition::Matches(expected) => {
            let _lock = WriteLock::try_acquire(path)?.ok_or_else(|| conflict(bucket, key))?;
            let current = match fs::metadata(path) {
                Ok(meta) => token_of(&meta),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(conflict(bucket, key)),
                Err(e) => return Err(e.into()),
            };
            if &current != expected {
                return Err(conflict(bucket, key));
            }
            write_atomic(path, content)?;
        }
    }

    Ok(token_of(&fs::metadata(path)?))
}

impl RegistryStore for FsStore {
    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        if_none_match: Option<&CacheToken>,
    ) -> StoreResult<FetchResult> {
        let path = self.object_path(bucket, key);

        // Token is taken before the read: a write racing in between yields
        // newer content under an older token, which the next pass refetches.
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;
        let token = token_of(&meta);
        if if_none_match == Some(&token) {
            return Ok(FetchResult::NotModified);
        }

        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, bucket, key))?;

        Ok(FetchResult::Modified {
            content,
            token: Some(token),
        })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<Option<CacheToken>> {
        let path = self.object_path(bucket, key);
        let (bucket, key) = (bucket.to_string(), key.to_string());

        // Staging, fsync and rename are all blocking calls.
        let token = tokio::task::spawn_blocking(move || {
            put_blocking(&path, &content, &condition, &bucket, &key)
        })
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e.to_string())))??;

        Ok(Some(token))
    }
}

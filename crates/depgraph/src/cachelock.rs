//! # Cache Locking
//!
//! Concurrent kiln processes share the package cache on disk. Every
//! mutation of a revision folder (writing a downloaded package,
//! finalizing a build) happens under an advisory file lock keyed by the
//! revision, so two processes installing the same revision serialize
//! instead of interleaving half-written trees. Readers take the shared
//! flavor of the same lock.
//!
//! Locks live as empty files under `locks/` in the cache root and are
//! released on drop; a crashed process leaves only a stale lock file
//! that the OS no longer holds.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::trace;

//================================================================================================
// Types
//================================================================================================

/// An error acquiring a cache lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock file could not be created or locked.
    #[error("cache lock `{path}`: {source}")]
    Io {
        /// The lock file path.
        path: PathBuf,
        /// The underlying failure.
        source: std::io::Error,
    },
}

/// A held advisory lock; released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

//================================================================================================
// Impls
//================================================================================================

impl CacheLock {
    /// Takes the exclusive lock for a resource, blocking until granted.
    pub fn exclusive(cache_root: &Path, resource: &str) -> Result<Self, LockError> {
        let (file, path) = open_lock_file(cache_root, resource)?;
        file.lock_exclusive()
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
        trace!(path = %path.display(), "exclusive cache lock acquired");
        Ok(CacheLock { file, path })
    }

    /// Takes the shared lock for a resource, blocking until granted.
    pub fn shared(cache_root: &Path, resource: &str) -> Result<Self, LockError> {
        let (file, path) = open_lock_file(cache_root, resource)?;
        file.lock_shared().map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        trace!(path = %path.display(), "shared cache lock acquired");
        Ok(CacheLock { file, path })
    }

    /// Attempts the exclusive lock without blocking. `None` means
    /// another process holds it.
    pub fn try_exclusive(cache_root: &Path, resource: &str) -> Result<Option<Self>, LockError> {
        let (file, path) = open_lock_file(cache_root, resource)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(CacheLock { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            trace!(path = %self.path.display(), error = %e, "cache unlock failed");
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Opens (creating if needed) the lock file for a resource key.
fn open_lock_file(cache_root: &Path, resource: &str) -> Result<(File, PathBuf), LockError> {
    let dir = cache_root.join("locks");
    std::fs::create_dir_all(&dir).map_err(|source| LockError::Io {
        path: dir.clone(),
        source,
    })?;
    let path = dir.join(format!("{}.lock", sanitize(resource)));
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
    Ok((file, path))
}

/// Flattens a reference string into a safe file name.
fn sanitize(resource: &str) -> String {
    resource
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exclusive_excludes_and_releases() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let held = CacheLock::exclusive(dir.path(), "zlib/1.2#r1")?;
        assert!(CacheLock::try_exclusive(dir.path(), "zlib/1.2#r1")?.is_none());
        // An unrelated resource is not affected.
        assert!(CacheLock::try_exclusive(dir.path(), "zstd/1.5#r1")?.is_some());

        drop(held);
        assert!(CacheLock::try_exclusive(dir.path(), "zlib/1.2#r1")?.is_some());
        Ok(())
    }

    #[test]
    fn shared_locks_coexist() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let _a = CacheLock::shared(dir.path(), "zlib/1.2#r1")?;
        let _b = CacheLock::shared(dir.path(), "zlib/1.2#r1")?;
        assert!(CacheLock::try_exclusive(dir.path(), "zlib/1.2#r1")?.is_none());
        Ok(())
    }
}

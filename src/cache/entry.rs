//! Cache entry definitions and file fingerprinting.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::media::{MediaKind, Metadata};

/// Errors that can occur while fingerprinting a file.
///
/// A stat failure is never cached; the caller reports "unknown".
#[derive(thiserror::Error, Debug)]
pub enum StatError {
    /// The file vanished or never existed.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// The path exists but is not a regular file.
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    /// Any other I/O failure while reading file metadata.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl StatError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Cheap proxy for content identity: modification time plus byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Modification time in nanoseconds relative to the Unix epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: u64,
}

impl Fingerprint {
    /// Build a fingerprint from raw parts.
    #[must_use]
    pub fn new(mtime_ns: i64, size: u64) -> Self {
        Self { mtime_ns, size }
    }

    /// Stat `path` (following symlinks) and fingerprint it.
    pub fn of(path: &Path) -> Result<Self, StatError> {
        let meta = fs::metadata(path).map_err(|e| StatError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(StatError::NotAFile(path.to_path_buf()));
        }
        let modified = meta.modified().map_err(|e| StatError::from_io(path, e))?;
        Ok(Self {
            mtime_ns: system_time_to_ns(modified),
            size: meta.len(),
        })
    }
}

/// Convert a `SystemTime` to signed nanoseconds since the Unix epoch.
///
/// Saturates at the `i64` range (roughly years 1677 to 2262).
#[must_use]
pub fn system_time_to_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// Normalize a path into the key the cache stores it under.
///
/// Relative paths are resolved against the current directory. Symlinks are
/// not resolved, so a link and its target are cached separately.
pub fn cache_key(path: &Path) -> io::Result<PathBuf> {
    std::path::absolute(path)
}

/// One file's last-known derived metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Absolute path, unique across the store.
    pub path: PathBuf,
    /// Fingerprint the metadata was computed against.
    pub fingerprint: Fingerprint,
    /// Capability class (always equal to `metadata.kind()`).
    pub kind: MediaKind,
    /// Probe result.
    pub metadata: Metadata,
    /// Refreshed on every valid read-through.
    pub last_access: DateTime<Utc>,
    /// Set once at insertion.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a fresh entry with both timestamps set to `now`.
    #[must_use]
    pub fn new(
        path: PathBuf,
        fingerprint: Fingerprint,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            path,
            fingerprint,
            kind: metadata.kind(),
            metadata,
            last_access: now,
            created_at: now,
        }
    }

    /// Whether this entry still describes a file with `current` fingerprint.
    #[must_use]
    pub fn is_valid_for(&self, current: &Fingerprint) -> bool {
        self.fingerprint == *current
    }
}

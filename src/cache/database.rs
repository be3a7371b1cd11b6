//! SQLite-backed metadata cache database.
//!
//! The store keeps one row per absolute path. Each row carries the
//! fingerprint the metadata was computed against plus the bookkeeping
//! timestamps the eviction engine orders by.
//!
//! # Concurrency
//!
//! The database runs in WAL mode with a small pool of reader connections and
//! one writer, each behind its own mutex. Readers see the last committed
//! snapshot and are never blocked by an in-progress write transaction, and
//! concurrent lookups spread across the pool. Every mutation runs inside a
//! transaction, so a crash leaves the file in its pre-write or post-write
//! state.
//!
//! # Keys
//!
//! Paths are stored as raw bytes (`BLOB`), so names that are not valid
//! UTF-8 keep distinct keys.
//!
//! # Recovery
//!
//! * A file that is not a SQLite database (or fails a page check) surfaces
//!   as [`StoreError::Corrupt`]; [`MetadataStore::rebuild`] deletes it and
//!   starts empty.
//! * A database file deleted from under a running store is recreated empty
//!   on the next access.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::time::Duration;

use super::entry::{CacheEntry, Fingerprint};
use crate::media::{ImageMetadata, MediaKind, Metadata, VideoMetadata};

/// File name of the cache database inside the cache directory.
pub const DATABASE_FILE_NAME: &str = "media.sqlite3";

/// Current on-disk schema version (stored in `PRAGMA user_version`).
///
/// Version 1 keyed rows by lossy UTF-8 text; those rows are discarded.
const SCHEMA_VERSION: i64 = 2;

/// Reader connections per store.
const READER_POOL_SIZE: usize = 4;

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

const ENTRY_COLUMNS: &str = "path, mtime_ns, size, kind, width, height, \
                             duration_secs, frame_rate, last_access, created_at";

const UPSERT_SQL: &str = "
    INSERT INTO media_entries (
        path, mtime_ns, size, kind, width, height,
        duration_secs, frame_rate, last_access, created_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(path) DO UPDATE SET
        mtime_ns = excluded.mtime_ns,
        size = excluded.size,
        kind = excluded.kind,
        width = excluded.width,
        height = excluded.height,
        duration_secs = excluded.duration_secs,
        frame_rate = excluded.frame_rate,
        last_access = excluded.last_access
";

const TOUCH_SQL: &str = "
    UPDATE media_entries
    SET last_access = MAX(last_access, ?2)
    WHERE path = ?1
";

/// Errors raised by the cache database.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The database cannot be opened or written right now.
    #[error("Cache database unavailable at {path}: {reason}")]
    Unavailable {
        /// Database file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// The database file is unreadable and should be rebuilt.
    #[error("Cache database corrupt at {path}: {reason}")]
    Corrupt {
        /// Database file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
}

impl StoreError {
    fn classify(path: &Path, err: rusqlite::Error) -> Self {
        let corrupt = matches!(
            err.sqlite_error_code(),
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
        ) || matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
        );

        if corrupt {
            Self::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        } else {
            Self::Unavailable {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
    }

    fn io(path: &Path, err: &io::Error) -> Self {
        Self::Unavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Returns true for [`StoreError::Corrupt`].
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

struct Connections {
    readers: Vec<Mutex<Connection>>,
    writer: Mutex<Connection>,
    // Where a caller that finds every reader busy starts waiting.
    next_reader: AtomicUsize,
}

impl Connections {
    /// First idle reader, or the next one in rotation if all are busy.
    fn reader(&self) -> MutexGuard<'_, Connection> {
        for reader in &self.readers {
            match reader.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(e)) => return e.into_inner(),
                Err(TryLockError::WouldBlock) => {}
            }
        }
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        lock(&self.readers[index])
    }
}

/// Persistent metadata cache backed by SQLite.
pub struct MetadataStore {
    path: PathBuf,
    // None after a failed reopen; every operation then reports Unavailable
    // until the next successful reopen.
    conns: RwLock<Option<Connections>>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Default database location inside the platform cache directory.
    ///
    /// On Linux this is `~/.cache/media-columns/media.sqlite3`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "media-columns")
            .map(|dirs| dirs.cache_dir().join(DATABASE_FILE_NAME))
    }

    /// Opens or creates the cache database at `path`.
    ///
    /// Missing parent directories are created. The schema is created or
    /// upgraded on the writer connection before the readers open.
    ///
    /// # Arguments
    ///
    /// * `path` - Database file, usually [`MetadataStore::default_path`]
    ///
    /// # Errors
    ///
    /// * [`StoreError::Corrupt`] if the file exists but is not a usable cache
    ///   database (see [`MetadataStore::open_or_rebuild`])
    /// * [`StoreError::Unavailable`] if the file or its directory cannot be
    ///   created or locked
    ///
    /// # Example
    ///
    /// ```no_run
    /// use media_columns::cache::MetadataStore;
    /// use std::path::Path;
    ///
    /// let store = MetadataStore::open(Path::new("/tmp/media.sqlite3"))?;
    /// println!("{} cached entries", store.count()?);
    /// # Ok::<(), media_columns::cache::StoreError>(())
    /// ```
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conns = open_connections(path)?;
        log::info!("Opened metadata cache at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conns: RwLock::new(Some(conns)),
        })
    }

    /// Opens the database, replacing it with an empty one if it is corrupt.
    pub fn open_or_rebuild(path: &Path) -> StoreResult<Self> {
        match Self::open(path) {
            Err(e) if e.is_corrupt() => {
                log::warn!("{e}; rebuilding empty cache");
                remove_database_files(path)?;
                Self::open(path)
            }
            other => other,
        }
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the database file and recreates it empty.
    pub fn rebuild(&self) -> StoreResult<()> {
        let mut guard = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        // Connections must be closed before their files are removed.
        *guard = None;
        remove_database_files(&self.path)?;
        *guard = Some(open_connections(&self.path)?);
        log::info!("Rebuilt metadata cache at {}", self.path.display());
        Ok(())
    }

    /// Look up the entry stored for `path`.
    pub fn get(&self, path: &Path) -> StoreResult<Option<CacheEntry>> {
        let key = path_to_sql(path);
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ENTRY_COLUMNS} FROM media_entries WHERE path = ?1"
            ))?;
            stmt.query_row(params![&*key], row_to_entry).optional()
        })
    }

    /// Insert or replace the entry for `entry.path`.
    ///
    /// Fingerprint, metadata and `last_access` are replaced; `created_at`
    /// of an existing row is kept.
    pub fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        self.put_many(std::slice::from_ref(entry)).map(|_| ())
    }

    /// Upsert several entries in one transaction.
    pub fn put_many(&self, entries: &[CacheEntry]) -> StoreResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
                for entry in entries {
                    let (width, height, duration_secs, frame_rate) =
                        metadata_columns(&entry.metadata);
                    stmt.execute(params![
                        &*path_to_sql(&entry.path),
                        entry.fingerprint.mtime_ns,
                        size_to_sql(entry.fingerprint.size),
                        entry.kind.as_i64(),
                        width,
                        height,
                        duration_secs,
                        frame_rate,
                        time_to_sql(entry.last_access),
                        time_to_sql(entry.created_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
    }

    /// Refresh `last_access` for one path. Never moves it backwards.
    ///
    /// Returns false if no entry exists for `path`.
    pub fn touch(&self, path: &Path, at: DateTime<Utc>) -> StoreResult<bool> {
        self.touch_many(&[(path.to_path_buf(), at)])
            .map(|updated| updated > 0)
    }

    /// Refresh `last_access` for several paths in one transaction.
    pub fn touch_many(&self, touches: &[(PathBuf, DateTime<Utc>)]) -> StoreResult<usize> {
        if touches.is_empty() {
            return Ok(0);
        }
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare_cached(TOUCH_SQL)?;
                for (path, at) in touches {
                    updated +=
                        stmt.execute(params![&*path_to_sql(path), time_to_sql(*at)])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    /// Delete the entries for `paths`, returning how many rows went away.
    pub fn delete_many(&self, paths: &[PathBuf]) -> StoreResult<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM media_entries WHERE path = ?1")?;
                for path in paths {
                    deleted += stmt.execute(params![&*path_to_sql(path)])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    /// Number of live entries.
    pub fn count(&self) -> StoreResult<u64> {
        self.with_reader(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM media_entries", [], |row| {
                row.get(0)
            })?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    /// Up to `n` paths ordered from least to most recently accessed.
    ///
    /// Ties on `last_access` are broken by `created_at`, then by path.
    pub fn least_recently_used(&self, n: usize) -> StoreResult<Vec<PathBuf>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT path FROM media_entries
                 ORDER BY last_access ASC, created_at ASC, path ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit_to_sql(n)], |row| {
                row.get::<_, Vec<u8>>(0).map(path_from_sql)
            })?;
            rows.collect()
        })
    }

    /// Up to `limit` paths whose `last_access` is strictly before `cutoff`.
    pub fn idle_since(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<PathBuf>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT path FROM media_entries
                 WHERE last_access < ?1
                 ORDER BY last_access ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![time_to_sql(cutoff), limit_to_sql(limit)], |row| {
                row.get::<_, Vec<u8>>(0).map(path_from_sql)
            })?;
            rows.collect()
        })
    }

    /// Remove every entry.
    pub fn clear(&self) -> StoreResult<usize> {
        self.with_writer(|conn| conn.execute("DELETE FROM media_entries", []))
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        self.ensure_present()?;
        let guard = self.conns.read().unwrap_or_else(PoisonError::into_inner);
        let conns = guard.as_ref().ok_or_else(|| self.closed())?;
        let conn = conns.reader();
        f(&conn).map_err(|e| StoreError::classify(&self.path, e))
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        self.ensure_present()?;
        let guard = self.conns.read().unwrap_or_else(PoisonError::into_inner);
        let conns = guard.as_ref().ok_or_else(|| self.closed())?;
        let mut conn = lock(&conns.writer);
        f(&mut conn).map_err(|e| StoreError::classify(&self.path, e))
    }

    /// Reopen when the file was deleted externally or a reopen failed earlier.
    fn ensure_present(&self) -> StoreResult<()> {
        let missing = !self.path.exists();
        let closed = self
            .conns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none();
        if !missing && !closed {
            return Ok(());
        }

        let mut guard = self.conns.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have reopened while we waited for the lock.
        if self.path.exists() && guard.is_some() {
            return Ok(());
        }
        if missing {
            log::info!(
                "Metadata cache {} disappeared; recreating",
                self.path.display()
            );
        }
        *guard = None;
        *guard = Some(open_connections(&self.path)?);
        Ok(())
    }

    fn closed(&self) -> StoreError {
        StoreError::Unavailable {
            path: self.path.clone(),
            reason: "database is closed".to_string(),
        }
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open_connections(path: &Path) -> StoreResult<Connections> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(path, &e))?;
        }
    }

    let writer = open_connection(path)?;
    migrate(path, &writer)?;
    let readers = (0..READER_POOL_SIZE)
        .map(|_| open_connection(path).map(Mutex::new))
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Connections {
        readers,
        writer: Mutex::new(writer),
        next_reader: AtomicUsize::new(0),
    })
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    let classify = |e: rusqlite::Error| StoreError::classify(path, e);
    let conn = Connection::open(path).map_err(classify)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(classify)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        ",
    )
    .map_err(classify)?;
    Ok(conn)
}

fn migrate(path: &Path, conn: &Connection) -> StoreResult<()> {
    let classify = |e: rusqlite::Error| StoreError::classify(path, e);
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(classify)?;

    if version > SCHEMA_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unknown schema version {version}"),
        });
    }

    if version > 0 && version < SCHEMA_VERSION {
        log::info!("Discarding metadata cache schema version {version}");
        conn.execute_batch("DROP TABLE IF EXISTS media_entries;")
            .map_err(classify)?;
    }

    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS media_entries (
            path BLOB PRIMARY KEY NOT NULL,
            mtime_ns INTEGER NOT NULL,
            size INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            width INTEGER,
            height INTEGER,
            duration_secs REAL,
            frame_rate INTEGER,
            last_access INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_media_entries_lru
            ON media_entries(last_access, created_at);

        PRAGMA user_version = {SCHEMA_VERSION};
        "
    ))
    .map_err(classify)?;

    log::debug!("Metadata cache schema verified (version {SCHEMA_VERSION})");
    Ok(())
}

/// Remove the database and its WAL side files. Missing files are fine.
fn remove_database_files(path: &Path) -> StoreResult<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(PathBuf::from(name));
    }

    for file in candidates {
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(path, &e)),
        }
    }
    Ok(())
}

fn metadata_columns(metadata: &Metadata) -> (Option<u32>, Option<u32>, Option<f64>, Option<u32>) {
    match metadata {
        Metadata::Image(image) => (Some(image.width), Some(image.height), None, None),
        Metadata::Video(video) => (
            video.width,
            video.height,
            video.duration_secs,
            video.frame_rate,
        ),
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let kind_tag: i64 = row.get(3)?;
    let kind = MediaKind::from_i64(kind_tag).ok_or_else(|| conversion_error(3, "media kind"))?;

    let width: Option<u32> = row.get(4)?;
    let height: Option<u32> = row.get(5)?;
    let metadata = match kind {
        MediaKind::Image => match (width, height) {
            (Some(width), Some(height)) => Metadata::Image(ImageMetadata { width, height }),
            _ => return Err(conversion_error(4, "image dimensions")),
        },
        MediaKind::Video => Metadata::Video(VideoMetadata {
            width,
            height,
            duration_secs: row.get(6)?,
            frame_rate: row.get(7)?,
        }),
    };

    let size: i64 = row.get(2)?;
    Ok(CacheEntry {
        path: path_from_sql(row.get(0)?),
        fingerprint: Fingerprint {
            mtime_ns: row.get(1)?,
            size: u64::try_from(size).map_err(|_| conversion_error(2, "file size"))?,
        },
        kind,
        metadata,
        last_access: time_from_sql(row.get(8)?),
        created_at: time_from_sql(row.get(9)?),
    })
}

fn conversion_error(column: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Integer,
        format!("invalid {what}").into(),
    )
}

/// Key bytes for `path`. Unix paths are stored verbatim.
#[cfg(unix)]
fn path_to_sql(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_to_sql(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(unix)]
fn path_from_sql(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_from_sql(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn limit_to_sql(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Timestamps are stored as nanoseconds since the Unix epoch.
fn time_to_sql(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(if time.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn time_from_sql(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

//! Cache orchestrator: validate-or-recompute for list-view metadata.
//!
//! [`MetadataCache`] is the facade a file-manager integration talks to. For
//! each request it:
//!
//! 1. stats the file for its current fingerprint (a failed stat is "unknown"),
//! 2. serves a stored entry whose fingerprint still matches (queuing a
//!    batched `last_access` refresh),
//! 3. otherwise probes the file, stores the result and gives the evictor a
//!    chance to run.
//!
//! Concurrent requests for the same path share one probe. Store trouble
//! never fails a request: corrupt databases are rebuilt, unavailable ones
//! are skipped and the file is probed directly.
//!
//! # Example
//!
//! ```no_run
//! use media_columns::config::Config;
//! use media_columns::media::MediaKind;
//! use media_columns::resolver::MetadataCache;
//! use std::path::Path;
//!
//! let cache = MetadataCache::from_config(&Config::load());
//! let display = cache.resolve(Path::new("/photos/a.png"), MediaKind::Image);
//! if let Some((w, h)) = display.dimensions {
//!     println!("{w}x{h}");
//! }
//! ```

pub mod flight;
pub mod touch;

use chrono::Utc;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::{
    cache_key, CacheEntry, EvictionPolicy, Evictor, Fingerprint, MetadataStore, StoreError,
};
use crate::config::Config;
use crate::media::{DisplayMetadata, MediaKind, Metadata};
use crate::probe::Prober;

pub use flight::SingleFlight;
pub use touch::{TouchBatch, TouchBuffer, DEFAULT_TOUCH_BATCH_SIZE};

/// Counters describing cache effectiveness since construction.
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    probe_failures: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    store_errors: AtomicU64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Requests served from a valid stored entry
    pub hits: u64,
    /// Requests that needed a probe (absent or stale entry)
    pub misses: u64,
    /// Misses that shared another caller's in-flight probe
    pub coalesced: u64,
    /// Probes that failed or timed out
    pub probe_failures: u64,
    /// Entries written after a successful probe
    pub stores: u64,
    /// Entries removed by eviction
    pub evictions: u64,
    /// Store operations that failed
    pub store_errors: u64,
}

impl CacheStatsSnapshot {
    /// Percentage of lookups served from the cache.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Lookup-or-probe facade over the store, the prober and the evictor.
#[derive(Debug)]
pub struct MetadataCache {
    store: Option<MetadataStore>,
    prober: Prober,
    evictor: Evictor,
    flights: SingleFlight<PathBuf, Option<Metadata>>,
    touches: TouchBuffer,
    stats: CacheStats,
}

impl MetadataCache {
    /// Create a cache with no persistent store; every miss probes.
    ///
    /// Attach a store with [`MetadataCache::with_store`].
    #[must_use]
    pub fn new(prober: Prober) -> Self {
        Self {
            store: None,
            prober,
            evictor: Evictor::default(),
            flights: SingleFlight::new(),
            touches: TouchBuffer::default(),
            stats: CacheStats::default(),
        }
    }

    /// Wire the default store, probe chains and eviction policy from `config`.
    ///
    /// If the database cannot be opened the cache runs degraded (probing
    /// every request) instead of failing.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let prober = Prober::with_defaults(config.ffprobe_path.clone(), config.probe_timeout());
        let mut cache = Self::new(prober)
            .with_eviction_policy(config.eviction_policy())
            .with_touch_batch_size(config.touch_batch_size);

        match config.resolved_database_path() {
            Some(path) => match MetadataStore::open_or_rebuild(&path) {
                Ok(store) => cache = cache.with_store(store),
                Err(e) => log::warn!("{e}; metadata will not be cached"),
            },
            None => log::warn!("No cache directory available; metadata will not be cached"),
        }
        cache
    }

    /// Persist results in `store`.
    #[must_use]
    pub fn with_store(mut self, store: MetadataStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the eviction policy.
    #[must_use]
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.evictor = Evictor::new(policy);
        self
    }

    /// Set how many distinct hits are buffered before `last_access` is written.
    #[must_use]
    pub fn with_touch_batch_size(mut self, size: usize) -> Self {
        self.touches = TouchBuffer::new(size);
        self
    }

    /// The backing store, if one is attached.
    #[must_use]
    pub fn store(&self) -> Option<&MetadataStore> {
        self.store.as_ref()
    }

    /// True when results are not being persisted.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolve list-view metadata for `path`, probed as `kind`.
    ///
    /// A valid stored entry is returned without probing. Otherwise the file
    /// is probed once, however many callers ask for it concurrently, and a
    /// successful result is stored.
    ///
    /// # Arguments
    ///
    /// * `path` - File to describe; relative paths are made absolute
    /// * `kind` - Which probe chain to use
    ///
    /// # Returns
    ///
    /// The metadata to display. Never fails: any stat, probe or store error
    /// yields [`DisplayMetadata::unknown`] for this file only.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use media_columns::{Config, MediaKind, MetadataCache};
    /// use std::path::Path;
    ///
    /// let cache = MetadataCache::from_config(&Config::load());
    /// let display = cache.resolve(Path::new("/photos/cat.png"), MediaKind::Image);
    /// if let Some((width, height)) = display.dimensions {
    ///     println!("{width}x{height}");
    /// }
    /// ```
    pub fn resolve(&self, path: &Path, kind: MediaKind) -> DisplayMetadata {
        let key = match cache_key(path) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("Cannot build cache key for {}: {}", path.display(), e);
                return DisplayMetadata::unknown();
            }
        };

        let fingerprint = match Fingerprint::of(&key) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                log::debug!("Skipping {}: {}", key.display(), e);
                return DisplayMetadata::unknown();
            }
        };

        if let Some(metadata) = self.lookup(&key, kind, &fingerprint) {
            CacheStats::bump(&self.stats.hits);
            self.maybe_evict();
            return metadata.into();
        }
        CacheStats::bump(&self.stats.misses);

        let (result, shared) = self
            .flights
            .run(key.clone(), || self.compute(&key, kind, fingerprint));
        if shared {
            CacheStats::bump(&self.stats.coalesced);
        }

        result.map(DisplayMetadata::from).unwrap_or_default()
    }

    /// Resolve a path whose kind is inferred from its extension.
    ///
    /// Unrecognised extensions are "unknown" without touching the disk.
    pub fn resolve_path(&self, path: &Path) -> DisplayMetadata {
        match MediaKind::from_path(path) {
            Some(kind) => self.resolve(path, kind),
            None => DisplayMetadata::unknown(),
        }
    }

    /// Resolve every file of a listing. Files are processed in parallel so
    /// one slow probe does not hold up its siblings.
    pub fn resolve_many(&self, files: &[(PathBuf, MediaKind)]) -> Vec<DisplayMetadata> {
        files
            .par_iter()
            .map(|(path, kind)| self.resolve(path, *kind))
            .collect()
    }

    /// Write buffered `last_access` refreshes now.
    pub fn flush(&self) {
        let batch = self.touches.drain();
        self.write_touches(batch);
    }

    /// Run a full eviction pass immediately. Returns the rows removed.
    pub fn prune(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        self.flush();
        match self.evictor.run(store, Utc::now()) {
            Ok(report) => {
                self.record_evictions(report.total());
                report.total()
            }
            Err(e) => {
                self.handle_store_error(store, e);
                0
            }
        }
    }

    /// Stored metadata for `key` if it is still valid for `fingerprint`.
    fn lookup(&self, key: &Path, kind: MediaKind, fingerprint: &Fingerprint) -> Option<Metadata> {
        let store = self.store.as_ref()?;
        match store.get(key) {
            Ok(Some(entry)) if entry.kind == kind && entry.is_valid_for(fingerprint) => {
                log::trace!("Metadata cache hit: {}", key.display());
                self.record_touch(key);
                Some(entry.metadata)
            }
            Ok(Some(_)) => {
                log::trace!("Metadata cache stale: {}", key.display());
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.handle_store_error(store, e);
                None
            }
        }
    }

    /// Probe and, on success, persist. Runs once per in-flight key.
    ///
    /// A leader that finished between our lookup and taking the flight has
    /// already stored the entry, so the store is checked again first.
    fn compute(&self, key: &Path, kind: MediaKind, fingerprint: Fingerprint) -> Option<Metadata> {
        if let Some(metadata) = self.lookup(key, kind, &fingerprint) {
            log::trace!("Stored by an earlier flight: {}", key.display());
            return Some(metadata);
        }

        match self.prober.probe(key, kind) {
            Ok(metadata) => {
                self.persist(key, fingerprint, metadata);
                Some(metadata)
            }
            Err(e) => {
                // Not cached: the next request probes again.
                CacheStats::bump(&self.stats.probe_failures);
                log::debug!("Probe failed for {}: {}", key.display(), e);
                None
            }
        }
    }

    fn persist(&self, key: &Path, fingerprint: Fingerprint, metadata: Metadata) {
        let Some(store) = &self.store else {
            return;
        };

        let entry = CacheEntry::new(key.to_path_buf(), fingerprint, metadata, Utc::now());
        if let Err(e) = store.put(&entry) {
            log::warn!("Failed to update cache for {}: {}", key.display(), e);
            self.handle_store_error(store, e);
            return;
        }
        CacheStats::bump(&self.stats.stores);
        self.maybe_evict();
    }

    /// Count one store access and run an eviction pass when one is due.
    fn maybe_evict(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if !self.evictor.tick() {
            return;
        }
        self.flush();
        match self.evictor.run(store, Utc::now()) {
            Ok(report) => self.record_evictions(report.total()),
            Err(e) => self.handle_store_error(store, e),
        }
    }

    fn record_touch(&self, key: &Path) {
        if let Some(batch) = self.touches.record(key.to_path_buf(), Utc::now()) {
            self.write_touches(batch);
        }
    }

    fn write_touches(&self, batch: TouchBatch) {
        let Some(store) = &self.store else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        match store.touch_many(&batch) {
            Ok(updated) => log::trace!("Refreshed last access for {updated} entries"),
            Err(e) => self.handle_store_error(store, e),
        }
    }

    fn record_evictions(&self, count: usize) {
        self.stats
            .evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn handle_store_error(&self, store: &MetadataStore, err: StoreError) {
        CacheStats::bump(&self.stats.store_errors);
        if err.is_corrupt() {
            log::warn!("{err}; rebuilding empty cache");
            if let Err(e) = store.rebuild() {
                log::warn!("Failed to rebuild metadata cache: {e}");
            }
        } else {
            log::warn!("{err}");
        }
    }
}

impl Drop for MetadataCache {
    fn drop(&mut self) {
        self.flush();
    }
}

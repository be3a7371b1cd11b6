//! Persistent metadata cache.
//!
//! This module stores probe results so that unchanged files are never
//! probed twice.
//!
//! # Architecture
//!
//! The caching system is split into three components:
//!
//! * [`database`]: SQLite persistence, schema management and CRUD operations.
//! * [`entry`]: the data stored per file and its fingerprint validation.
//! * [`eviction`]: TTL and LRU-cap pruning, run opportunistically.
//!
//! # Cache Invalidation
//!
//! Entries are validated using:
//! * File path (primary key)
//! * File size
//! * Modification time (nanoseconds)
//!
//! If either fingerprint field changes, the entry is stale and the file is
//! probed again; the new result overwrites the old row.

pub mod database;
pub mod entry;
pub mod eviction;

pub use database::{MetadataStore, StoreError, StoreResult};
pub use entry::{cache_key, CacheEntry, Fingerprint, StatError};
pub use eviction::{EvictionPolicy, EvictionReport, Evictor};

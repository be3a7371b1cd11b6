//! media-columns - Cached media metadata for file-manager list columns
//!
//! Resolves pixel dimensions, duration and frame rate for images and videos,
//! persisting results in a SQLite cache keyed by path and validated by the
//! file's (mtime, size) fingerprint.

pub mod cache;
pub mod columns;
pub mod config;
pub mod logging;
pub mod media;
pub mod probe;
pub mod resolver;

pub use cache::{MetadataStore, StoreError};
pub use columns::ColumnValues;
pub use config::Config;
pub use media::{DisplayMetadata, MediaKind, Metadata};
pub use probe::{MetadataSource, ProbeError, Prober};
pub use resolver::{CacheStatsSnapshot, MetadataCache};

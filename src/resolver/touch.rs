//! Coalescing buffer for `last_access` refreshes.
//!
//! Cache hits dominate steady-state listing traffic, and writing one row per
//! hit would turn every directory refresh into a burst of small write
//! transactions. Hits are recorded here instead and written as one batch
//! once the buffer fills (or on an explicit flush).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of distinct paths buffered before a flush.
pub const DEFAULT_TOUCH_BATCH_SIZE: usize = 64;

/// A batch of `(path, last_access)` refreshes ready to be written.
pub type TouchBatch = Vec<(PathBuf, DateTime<Utc>)>;

/// Pending `last_access` refreshes keyed by path; the latest time wins.
#[derive(Debug)]
pub struct TouchBuffer {
    pending: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
    capacity: usize,
}

impl TouchBuffer {
    /// Buffer up to `capacity` distinct paths. A capacity of 1 writes every
    /// touch immediately.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record a touch. Returns the full batch when the buffer reached
    /// capacity; the caller writes it outside the buffer lock.
    pub fn record(&self, path: PathBuf, at: DateTime<Utc>) -> Option<TouchBatch> {
        let mut pending = self.lock();
        pending
            .entry(path)
            .and_modify(|existing| *existing = (*existing).max(at))
            .or_insert(at);

        if pending.len() >= self.capacity {
            Some(pending.drain().collect())
        } else {
            None
        }
    }

    /// Take everything buffered so far.
    pub fn drain(&self) -> TouchBatch {
        self.lock().drain().collect()
    }

    /// Number of distinct paths waiting to be written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, DateTime<Utc>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TouchBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TOUCH_BATCH_SIZE)
    }
}

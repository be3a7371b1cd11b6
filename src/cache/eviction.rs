//! TTL and LRU-cap eviction for the metadata cache.
//!
//! Eviction has no background thread. The orchestrator calls
//! [`Evictor::tick`] on every cache hit and every successful store; every
//! `interval` calls (and on the very first one) a bounded pass runs. A
//! read-mostly workload therefore still expires idle entries. Skipping a pass is
//! always safe because the next due pass picks up where it left off.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::database::{MetadataStore, StoreResult};

/// Default maximum idle time before an entry is evicted (90 days).
pub const DEFAULT_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Default maximum number of live entries.
pub const DEFAULT_MAX_ENTRIES: u64 = 50_000;

/// Default number of hits and stores between eviction passes.
pub const DEFAULT_INTERVAL: u64 = 256;

/// Default maximum rows deleted by each pass of one run.
pub const DEFAULT_BATCH_LIMIT: usize = 10_000;

/// Retention limits enforced by the [`Evictor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Entries idle longer than this are removed.
    pub ttl: Duration,
    /// Upper bound on live entries.
    pub max_entries: u64,
    /// A run is due every `interval` calls to [`Evictor::run_if_due`].
    pub interval: u64,
    /// Maximum rows deleted by the TTL pass and by the cap pass of one run.
    pub batch_limit: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            interval: DEFAULT_INTERVAL,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

impl EvictionPolicy {
    /// Set the idle TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the row-count cap.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set how many calls pass between runs.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Set the per-pass deletion bound.
    #[must_use]
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    /// Oldest `last_access` that survives a run at `now`.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::MAX);
        now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// What one eviction run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Rows removed because they were idle past the TTL.
    pub expired: usize,
    /// Rows removed to bring the count down to the cap.
    pub over_capacity: usize,
}

impl EvictionReport {
    /// Total rows removed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.expired + self.over_capacity
    }
}

/// Opportunistic eviction engine.
#[derive(Debug)]
pub struct Evictor {
    policy: EvictionPolicy,
    calls: AtomicU64,
}

impl Evictor {
    /// Create an evictor enforcing `policy`.
    #[must_use]
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            calls: AtomicU64::new(0),
        }
    }

    /// The enforced policy.
    #[must_use]
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Count one call and run a pass when due. Returns the rows evicted.
    pub fn run_if_due(&self, store: &MetadataStore) -> StoreResult<usize> {
        if !self.tick() {
            return Ok(0);
        }
        self.run(store, Utc::now()).map(|report| report.total())
    }

    /// Count one opportunity to evict. Returns true when a run is due.
    pub fn tick(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        call % self.policy.interval.max(1) == 0
    }

    /// Run one bounded TTL pass then one bounded cap pass as of `now`.
    pub fn run(&self, store: &MetadataStore, now: DateTime<Utc>) -> StoreResult<EvictionReport> {
        let mut report = EvictionReport::default();

        let idle = store.idle_since(self.policy.cutoff(now), self.policy.batch_limit)?;
        if !idle.is_empty() {
            report.expired = store.delete_many(&idle)?;
        }

        let count = store.count()?;
        if count > self.policy.max_entries {
            let excess = usize::try_from(count - self.policy.max_entries).unwrap_or(usize::MAX);
            let victims = store.least_recently_used(excess.min(self.policy.batch_limit))?;
            report.over_capacity = store.delete_many(&victims)?;
        }

        if report.total() > 0 {
            log::debug!(
                "Evicted {} cache entries ({} expired, {} over capacity)",
                report.total(),
                report.expired,
                report.over_capacity
            );
        }
        Ok(report)
    }
}

impl Default for Evictor {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

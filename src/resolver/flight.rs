//! Per-key de-duplication of concurrent work.
//!
//! When several callers ask for the same key at once, the first becomes the
//! leader and runs the computation; the rest block on the leader's pending
//! slot and receive a clone of its value.
//!
//! ```text
//! resolve(a.png) ─┐
//!                 │                         one probe
//! resolve(a.png) ─┼──► SingleFlight ───────► of a.png
//!                 │        │                     │
//! resolve(a.png) ─┘        ▼                     │
//!                   all three receive  ◄─────────┘
//!                   the same result
//! ```
//!
//! The map mutex is only held to register or remove a key, never while the
//! computation runs, so work for different keys proceeds in parallel. A key
//! is removed as soon as its leader finishes, including when the leader
//! panics; waiters of a panicked leader compute the value themselves.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

enum Slot<V> {
    Waiting,
    Done(V),
    Abandoned,
}

struct Pending<V> {
    slot: Mutex<Slot<V>>,
    ready: Condvar,
}

impl<V: Clone> Pending<V> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, slot: Slot<V>) {
        let mut guard = lock(&self.slot);
        if matches!(*guard, Slot::Waiting) {
            *guard = slot;
        }
        self.ready.notify_all();
    }

    /// Block until the leader publishes. `None` means the leader panicked.
    fn wait(&self) -> Option<V> {
        let mut guard = lock(&self.slot);
        loop {
            match &*guard {
                Slot::Waiting => {
                    guard = self
                        .ready
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Slot::Done(value) => return Some(value.clone()),
                Slot::Abandoned => return None,
            }
        }
    }
}

/// Map of in-flight keys to their pending results.
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, Arc<Pending<V>>>>,
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &lock(&self.in_flight).len())
            .finish()
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently being computed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Run `compute` for `key` unless another caller already is.
    ///
    /// Returns the value and whether it was shared from another caller's
    /// computation.
    pub fn run<F>(&self, key: K, compute: F) -> (V, bool)
    where
        F: FnOnce() -> V,
    {
        let registration = {
            let mut map = lock(&self.in_flight);
            match map.entry(key.clone()) {
                Entry::Occupied(entry) => Err(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    let pending = Arc::new(Pending::new());
                    entry.insert(Arc::clone(&pending));
                    Ok(pending)
                }
            }
        };

        match registration {
            Ok(pending) => {
                let leader = Leader {
                    flight: self,
                    key,
                    pending,
                };
                let value = compute();
                leader.pending.publish(Slot::Done(value.clone()));
                (value, false)
            }
            Err(pending) => match pending.wait() {
                Some(value) => (value, true),
                None => (compute(), false),
            },
        }
    }
}

/// Removes the leader's key on every exit path, panics included.
struct Leader<'a, K: Eq + Hash, V: Clone> {
    flight: &'a SingleFlight<K, V>,
    key: K,
    pending: Arc<Pending<V>>,
}

impl<K: Eq + Hash, V: Clone> Drop for Leader<'_, K, V> {
    fn drop(&mut self) {
        {
            let mut map = lock(&self.flight.in_flight);
            if map
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.pending))
            {
                map.remove(&self.key);
            }
        }
        // No-op after a successful publish.
        self.pending.publish(Slot::Abandoned);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

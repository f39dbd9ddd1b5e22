//! Lightweight observability handle: what's in flight right now, and
//! running counters since startup. Consumed by the control-plane
//! `GetStats`/`GetStatus` calls, not by the log facade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rangefs_models::StatusCallback;

/// One in-flight operation's human-readable status line.
struct State {
    description: String,
    status: Mutex<String>,
    started: Instant,
}

/// A handle for a single operation's lifetime; dropping it removes the
/// operation from the tracker's in-flight table.
pub struct Handle {
    id: u64,
    tracker: Tracker,
}

impl StatusCallback for Handle {
    fn set_status(&self, status: &str) {
        if let Some(state) = self.tracker.inner.lock().in_flight.get(&self.id) {
            *state.status.lock() = status.to_string();
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.tracker.inner.lock().in_flight.remove(&self.id);
    }
}

/// A snapshot line for the control plane's `GetStatus` response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InFlightOp {
    pub description: String,
    pub status: String,
    pub running_for: std::time::Duration,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    in_flight: HashMap<u64, State>,
}

/// Cheap to clone; every clone shares the same in-flight table and
/// counters.
#[derive(Clone, Default)]
pub struct Tracker {
    inner: std::sync::Arc<Mutex<Inner>>,
    stats: std::sync::Arc<Stats>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight operation, returning a handle that removes
    /// it again on drop (typically at the end of the calling scope).
    pub fn begin(&self, description: impl Into<String>) -> Handle {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.in_flight.insert(
            id,
            State { description: description.into(), status: Mutex::new(String::new()), started: Instant::now() },
        );
        Handle { id, tracker: self.clone() }
    }

    pub fn snapshot(&self) -> Vec<InFlightOp> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .in_flight
            .values()
            .map(|s| InFlightOp {
                description: s.description.clone(),
                status: s.status.lock().clone(),
                running_for: now.duration_since(s.started),
            })
            .collect()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Running counters since process start. Bounded samples (last N fetch
/// latencies) would live here too if the control plane needed them; the
/// spec only calls for the counters below.
#[derive(Default)]
pub struct Stats {
    pub bytes_fetched: AtomicU64,
    pub fetches_succeeded: AtomicU64,
    pub fetches_failed: AtomicU64,
    pub list_dir_calls: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl Stats {
    pub fn record_fetch(&self, bytes: u64, ok: bool) {
        if ok {
            self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
            self.fetches_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fetches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_list_dir(&self) {
        self.list_dir_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            list_dir_calls: self.list_dir_calls.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StatsSnapshot {
    pub bytes_fetched: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub list_dir_calls: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

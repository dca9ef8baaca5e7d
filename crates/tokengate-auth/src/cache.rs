//! TTL cache shared by the discovery resolver and the key-set provider
//!
//! Entries are immutable `Arc<T>` snapshots replaced wholesale on refresh, so
//! a reader holds either the old value or the new one, never a mix. Refreshes
//! are single-flight per key: concurrent misses queue behind one fetch and
//! take its outcome, success or failure, instead of fetching again. A failure
//! is only shared with callers that were already waiting; the next caller
//! after it fetches anew.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokengate_auth::cache::TtlCache;
//! use tokengate_auth::clock::ManualClock;
//!
//! let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
//! let cache: TtlCache<String> = TtlCache::new("demo", Duration::from_secs(60), clock.clone());
//!
//! tokio_test::block_on(async {
//!     let fetch = || async { Ok::<_, std::convert::Infallible>("v1".to_string()) };
//!     cache.get_or_fetch("k", fetch).await.unwrap();
//!     cache.get_or_fetch("k", fetch).await.unwrap();
//!     assert_eq!(cache.stats().await.fetches, 1);
//!
//!     clock.advance(Duration::from_secs(60));
//!     cache.get_or_fetch("k", fetch).await.unwrap();
//!     assert_eq!(cache.stats().await.fetches, 2);
//! });
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::clock::Clock;

/// A cached value with its fetch time
#[derive(Debug)]
pub struct CacheEntry<T> {
    value: Arc<T>,
    fetched_at: SystemTime,
    ttl: Duration,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            ttl: self.ttl,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Fresh while `now - fetched_at < ttl`
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        match now.duration_since(self.fetched_at) {
            Ok(age) => age < self.ttl,
            Err(_) => false, // Clock went backwards, invalidate
        }
    }

    /// The cached snapshot
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// When the snapshot was stored
    pub fn fetched_at(&self) -> SystemTime {
        self.fetched_at
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry
    pub hits: u64,
    /// Lookups that found no fresh entry
    pub misses: u64,
    /// Upstream fetches that completed successfully
    pub fetches: u64,
    /// Entries currently stored (fresh or stale)
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
}

type SharedFailure = Arc<dyn Any + Send + Sync>;

/// Per-key fetch slot; holding the lock means owning the fetch
#[derive(Default)]
struct Flight {
    /// Fetches finished on this key, bumped under the lock
    completed: AtomicU64,
    last_failure: Mutex<Option<SharedFailure>>,
}

impl Flight {
    /// The failure of a fetch that finished after `joined` was read
    fn failure_since<E: Clone + 'static>(
        &self,
        joined: u64,
        last: Option<&SharedFailure>,
    ) -> Option<E> {
        if self.completed.load(Ordering::Acquire) == joined {
            return None;
        }
        last?.downcast_ref::<E>().cloned()
    }
}

/// Keyed TTL cache with single-flight refresh
pub struct TtlCache<T> {
    name: &'static str,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    flights: Mutex<HashMap<String, Arc<Flight>>>,
    counters: Counters,
}

impl<T> std::fmt::Debug for TtlCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync> TtlCache<T> {
    /// Create an empty cache; `name` only appears in logs
    pub fn new(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl,
            clock,
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The clock used for freshness checks
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Return the fresh value for `key`, fetching it if absent or stale
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `fetch`, or by the concurrent fetch
    /// this call waited on. The previous entry (if any) is left untouched and
    /// is not served.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.fresh(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!(cache = self.name, key = key, "Cache hit");
            return Ok(value);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let flight = self.flight(key).await;
        let joined = flight.completed.load(Ordering::Acquire);
        let mut last_failure = flight.last_failure.lock().await;

        // Another task may have refreshed while we waited for the lock
        if let Some(value) = self.fresh(key).await {
            debug!(cache = self.name, key = key, "Entry refreshed by concurrent fetch");
            return Ok(value);
        }
        if let Some(e) = flight.failure_since::<E>(joined, (*last_failure).as_ref()) {
            debug!(cache = self.name, key = key, "Concurrent fetch failed, sharing its error");
            return Err(e);
        }

        self.run(key, &flight, &mut last_failure, fetch).await
    }

    /// Replace the entry for `key` unconditionally
    ///
    /// When `seen` is given and the current entry is already a different,
    /// fresh snapshot, someone else refreshed in the meantime and that
    /// snapshot is returned without fetching.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `fetch`, or by the concurrent
    /// refresh this call waited on.
    pub async fn refresh<F, Fut, E>(
        &self,
        key: &str,
        seen: Option<&Arc<T>>,
        fetch: F,
    ) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let flight = self.flight(key).await;
        let joined = flight.completed.load(Ordering::Acquire);
        let mut last_failure = flight.last_failure.lock().await;

        if let Some(seen) = seen
            && let Some(current) = self.peek(key).await
            && !Arc::ptr_eq(current.value(), seen)
            && current.is_fresh(self.clock.now())
        {
            debug!(cache = self.name, key = key, "Entry already replaced, skipping refresh");
            return Ok(Arc::clone(current.value()));
        }
        if let Some(e) = flight.failure_since::<E>(joined, (*last_failure).as_ref()) {
            debug!(cache = self.name, key = key, "Concurrent refresh failed, sharing its error");
            return Err(e);
        }

        self.run(key, &flight, &mut last_failure, fetch).await
    }

    /// The stored entry for `key`, fresh or not
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Drop the entry for `key`
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
        debug!(cache = self.name, key = key, "Cache entry invalidated");
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        debug!(cache = self.name, "Cache cleared");
    }

    /// Snapshot of the counters
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            entries: self.entries.read().await.len(),
        }
    }

    async fn fresh(&self, key: &str) -> Option<Arc<T>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| Arc::clone(entry.value()))
    }

    async fn store(&self, key: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let entry = CacheEntry {
            value: Arc::clone(&value),
            fetched_at: self.clock.now(),
            ttl: self.ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(
            cache = self.name,
            key = key,
            ttl_secs = self.ttl.as_secs(),
            "Cache entry replaced"
        );
        value
    }

    /// Fetch while holding the flight lock and publish the outcome
    async fn run<F, Fut, E>(
        &self,
        key: &str,
        flight: &Flight,
        last_failure: &mut Option<SharedFailure>,
        fetch: F,
    ) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let outcome = fetch().await;
        let result = match outcome {
            Ok(value) => {
                *last_failure = None;
                Ok(self.store(key, value).await)
            }
            Err(e) => {
                *last_failure = Some(Arc::new(e.clone()));
                Err(e)
            }
        };
        flight.completed.fetch_add(1, Ordering::Release);
        result
    }

    async fn flight(&self, key: &str) -> Arc<Flight> {
        let mut flights = self.flights.lock().await;
        Arc::clone(flights.entry(key.to_string()).or_default())
    }
}

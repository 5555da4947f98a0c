//! TTL cache with single-flight fetches and stale-while-revalidate
//!
//! An entry is **fresh** while younger than its TTL, **stale** until
//! `ttl + stale_grace` (the hard TTL) and gone afterwards:
//!
//! - fresh hit: returned immediately
//! - stale hit: returned immediately, one background refresh is started
//! - miss or past hard TTL: the caller waits for a fetch
//!
//! Concurrent callers for a key share one upstream fetch. The fetch runs as
//! its own task which stores the result and clears the in-flight marker when
//! it settles, so callers that are cancelled or dropped while waiting never
//! strand the key. A fetch that panics settles as an error the same way.
//! Failed fetches are not stored.

pub mod layer;

pub use layer::{CacheConfig, CacheLayer, ClaimsKey, ExtractedClaims, SnapshotKey};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::any::Any;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SourceError;

/// Freshness rules for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub ttl: Duration,
    pub stale_grace: Duration,
}

impl TtlPolicy {
    pub fn new(ttl: Duration, stale_grace: Duration) -> Self {
        Self { ttl, stale_grace }
    }

    /// Age past which an entry is never served
    pub fn hard_ttl(&self) -> Duration {
        self.ttl.saturating_add(self.stale_grace)
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    /// Callers that joined a fetch already in flight
    pub coalesced: u64,
    /// Upstream fetches started (foreground and background)
    pub fetches: u64,
    pub expired: u64,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    expired: AtomicU64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, SourceError>>>;

struct Entry<V> {
    value: V,
    stored_at: Instant,
    policy: TtlPolicy,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    in_flight: HashMap<K, SharedFetch<V>>,
}

enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Absent,
}

/// Keyed TTL cache; cloning shares the underlying store
pub struct TtlCache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
    stats: Arc<CacheStats>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            stats: Arc::new(CacheStats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value for `key`, fetching it with `fetch` when
    /// needed
    ///
    /// `fetch` is only invoked when this caller starts the upstream call;
    /// callers joining an in-flight fetch drop theirs unused.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, policy: TtlPolicy, fetch: F) -> Result<V, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SourceError>> + Send + 'static,
    {
        let pending = {
            let mut inner = self.lock();
            let now = Instant::now();

            let lookup = match inner.entries.get(&key) {
                Some(entry) => {
                    let age = now.saturating_duration_since(entry.stored_at);
                    if age < entry.policy.ttl {
                        Lookup::Fresh(entry.value.clone())
                    } else if age < entry.policy.hard_ttl() {
                        Lookup::Stale(entry.value.clone())
                    } else {
                        Lookup::Absent
                    }
                }
                None => Lookup::Absent,
            };

            match lookup {
                Lookup::Fresh(value) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Lookup::Stale(value) => {
                    self.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
                    if !inner.in_flight.contains_key(&key) {
                        debug!(key = ?key, "Stale hit, scheduling background refresh");
                        let _ = self.start_fetch(&mut inner, key, policy, fetch());
                    }
                    return Ok(value);
                }
                Lookup::Absent => {
                    if inner.entries.remove(&key).is_some() {
                        self.stats.expired.fetch_add(1, Ordering::Relaxed);
                    }
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    match inner.in_flight.get(&key) {
                        Some(existing) => {
                            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                            existing.clone()
                        }
                        None => self.start_fetch(&mut inner, key, policy, fetch()),
                    }
                }
            }
        };

        pending.await
    }

    /// Spawn the upstream call and register it as in flight
    ///
    /// Must be called with the lock held; the spawned task needs the same
    /// lock to settle, so it cannot clear the marker before it is inserted.
    fn start_fetch<Fut>(
        &self,
        inner: &mut Inner<K, V>,
        key: K,
        policy: TtlPolicy,
        fetch: Fut,
    ) -> SharedFetch<V>
    where
        Fut: Future<Output = Result<V, SourceError>> + Send + 'static,
    {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let store = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = match AssertUnwindSafe(fetch).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(key = ?task_key, "Cache fetch panicked: {}", message);
                    Err(SourceError::FetchTaskFailed { message })
                }
            };
            let mut inner = store.lock().unwrap_or_else(PoisonError::into_inner);
            inner.in_flight.remove(&task_key);
            if let Ok(value) = &result {
                inner.entries.insert(
                    task_key,
                    Entry {
                        value: value.clone(),
                        stored_at: Instant::now(),
                        policy,
                    },
                );
            }
            result
        });

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    warn!("Cache fetch task failed: {}", join_err);
                    Err(SourceError::FetchTaskFailed {
                        message: join_err.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared();

        inner.in_flight.insert(key, shared.clone());
        shared
    }

    /// Value for `key` if fresh or stale, without fetching
    pub fn peek(&self, key: &K) -> Option<V> {
        let inner = self.lock();
        inner.entries.get(key).and_then(|entry| {
            let age = Instant::now().saturating_duration_since(entry.stored_at);
            (age < entry.policy.hard_ttl()).then(|| entry.value.clone())
        })
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drop entries past their hard TTL, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < entry.policy.hard_ttl());
        let removed = before - inner.entries.len();
        self.stats.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock().in_flight.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

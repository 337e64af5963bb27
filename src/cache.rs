//! Two-tier in-memory TTL cache.
//!
//! The raw tier holds upstream responses, the processed tier holds finished
//! forecasts. Both are keyed by the rounded coordinate. Entries are evicted
//! when a read finds them expired or on an explicit clear; there is no
//! background sweep.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::models::{ProcessedForecast, RawForecastBundle};

// ---

#[derive(Debug)]
struct Entry<T> {
    value: Arc<T>,
    stored_at: Instant,
    approx_bytes: usize,
}

/// Statistics of one cache tier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatistics {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub ttl_secs: u64,
    /// Every stored key, expired ones included, sorted.
    pub keys: Vec<String>,
    pub approx_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub raw: TierStatistics,
    pub processed: TierStatistics,
    /// Both tiers use the same TTL.
    pub ttl_synchronized: bool,
}

/// Removes the in-flight entry for a key once its last waiter is gone.
///
/// Runs on drop, so a caller that is cancelled mid-fetch still cleans up.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(map: &'a DashMap<String, Arc<Mutex<()>>>, key: &'a str) -> Self {
        let lock = Arc::clone(map.entry(key.to_string()).or_default().value());
        Self { map, key, lock }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // ---
        // Drop our reference before checking so the last caller out sees a count of one.
        drop(std::mem::take(&mut self.lock));
        self.map
            .remove_if(self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

/// Concurrent map of values that expire `ttl` after insertion.
///
/// Misses for the same key are serialized through a per-key async mutex so
/// that only one caller fetches while the others wait and reuse the result.
#[derive(Debug)]
pub struct TtlCache<T> {
    // ---
    name: &'static str,
    ttl: Duration,
    entries: DashMap<String, Entry<T>>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl<T: Serialize> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Valid entry for `key` stored no earlier than `since`.
    fn lookup(&self, key: &str, since: Option<Instant>) -> Option<Arc<T>> {
        // ---
        let expired = match self.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                if since.is_some_and(|since| entry.stored_at < since) {
                    return None;
                }
                return Some(Arc::clone(&entry.value));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            let ttl = self.ttl;
            if self
                .entries
                .remove_if(key, |_, entry| entry.stored_at.elapsed() >= ttl)
                .is_some()
            {
                tracing::debug!("{} cache evicted expired entry {}", self.name, key);
            }
        }
        None
    }

    /// Valid entry for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.lookup(key, None)
    }

    pub fn insert(&self, key: &str, value: T) -> Arc<T> {
        // ---
        let approx_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        let value = Arc::new(value);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Arc::clone(&value),
                stored_at: Instant::now(),
                approx_bytes,
            },
        );
        value
    }

    /// Return the cached value for `key` or store the result of `fetch`.
    ///
    /// With `force_refresh` the cached value is ignored unless another caller
    /// stored a fresher one while this call waited. Fetch errors are returned
    /// and nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        force_refresh: bool,
        fetch: F,
    ) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // ---
        let requested_at = Instant::now();
        let since = force_refresh.then_some(requested_at);

        if let Some(value) = self.lookup(key, since) {
            tracing::debug!("{} cache hit for {}", self.name, key);
            return Ok(value);
        }

        let in_flight = InFlight::enter(&self.in_flight, key);
        let _guard = in_flight.lock.lock().await;

        // A concurrent caller may have filled the entry while we waited.
        match self.lookup(key, since) {
            Some(value) => {
                tracing::debug!("{} cache filled while waiting for {}", self.name, key);
                Ok(value)
            }
            None => {
                tracing::debug!("{} cache miss for {}", self.name, key);
                fetch().await.map(|value| self.insert(key, value))
            }
        }
    }

    /// Remove every entry; returns how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn stats(&self) -> TierStatistics {
        // ---
        let mut keys = Vec::new();
        let mut valid = 0;
        let mut approx_bytes = 0;

        for entry in self.entries.iter() {
            keys.push(entry.key().clone());
            approx_bytes += entry.approx_bytes;
            if entry.stored_at.elapsed() < self.ttl {
                valid += 1;
            }
        }
        keys.sort();

        TierStatistics {
            total: keys.len(),
            valid,
            expired: keys.len() - valid,
            ttl_secs: self.ttl.as_secs(),
            keys,
            approx_bytes,
        }
    }
}

/// The raw and processed tiers, owned by one engine instance.
#[derive(Debug)]
pub struct CacheService {
    pub raw: TtlCache<RawForecastBundle>,
    pub processed: TtlCache<ProcessedForecast>,
}

impl CacheService {
    pub fn new(raw_ttl: Duration, processed_ttl: Duration) -> Self {
        // ---
        if raw_ttl != processed_ttl {
            tracing::warn!(
                "Cache TTLs differ (raw {}s, processed {}s); processed results may outlive their raw data",
                raw_ttl.as_secs(),
                processed_ttl.as_secs()
            );
        }
        Self {
            raw: TtlCache::new("raw", raw_ttl),
            processed: TtlCache::new("processed", processed_ttl),
        }
    }

    pub fn stats(&self) -> CacheStatistics {
        CacheStatistics {
            raw: self.raw.stats(),
            processed: self.processed.stats(),
            ttl_synchronized: self.raw.ttl() == self.processed.ttl(),
        }
    }

    pub fn clear(&self) {
        // ---
        let raw = self.raw.clear();
        let processed = self.processed.clear();
        tracing::info!("Cleared cache ({} raw, {} processed entries)", raw, processed);
    }
}

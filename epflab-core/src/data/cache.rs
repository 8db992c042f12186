//! Range-aware fetch cache shared by every fold of a run.
//!
//! Entries are keyed by (source, entity, parameter fingerprint) and remember
//! which time ranges they cover. A request only fetches the sub-ranges not
//! yet covered; fetched data is merged into the entry (newest fetch wins on
//! equal timestamps) and the entry's time-to-live is refreshed.
//!
//! Writes are serialized per key: each key owns a slot mutex that is held
//! for the whole compute-fetch-merge sequence, so a second concurrent
//! requester waits and then re-reads the merged coverage instead of
//! fetching the same range again. Different keys never block each other.
//!
//! When a fetch fails the cache degrades: whatever it already holds for the
//! requested range is returned flagged `stale`. Only when it holds nothing
//! does the request fail with `SourceUnavailable`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::provider::DataError;
use super::store::ParquetStore;
use crate::domain::{normalize_ranges, uncovered, EntityId, SourceId, TimeRange, TimeSeries};

/// Default time-to-live of a cache entry.
pub const DEFAULT_TTL_SECS: i64 = 6 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub source: SourceId,
    pub entity: EntityId,
    /// Fingerprint of source parameters that change the data.
    pub params: String,
}

impl CacheKey {
    pub fn new(source: SourceId, entity: EntityId) -> Self {
        Self {
            source,
            entity,
            params: String::new(),
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }
}

/// Stored snapshot for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub series: TimeSeries,
    /// Normalized union of every range fetched into this entry.
    pub covered: Vec<TimeRange>,
    pub retrieved_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.retrieved_at + self.ttl
    }
}

/// Result of [`Cache::get_or_fetch`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSeries {
    /// Data for the requested range (possibly incomplete when `stale`).
    pub series: TimeSeries,
    /// Set when a fetch failed and cached data was served instead.
    pub stale: bool,
    /// Sub-ranges that were fetched from the source for this request.
    pub fetched: Vec<TimeRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub stale_returns: u64,
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock moved by hand, for expiry tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

pub struct Cache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    store: Option<ParquetStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    stale_returns: AtomicU64,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            clock: Arc::new(SystemClock),
            slots: Mutex::new(HashMap::new()),
            store: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            stale_returns: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist merged entries as Parquet snapshots under `store`.
    pub fn with_persistence(mut self, store: ParquetStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            stale_returns: self.stale_returns.load(Ordering::Relaxed),
        }
    }

    /// Serve `request` for `key`, fetching only the uncovered sub-ranges.
    pub fn get_or_fetch<F>(
        &self,
        key: &CacheKey,
        request: TimeRange,
        mut fetch_fn: F,
    ) -> Result<CachedSeries, DataError>
    where
        F: FnMut(TimeRange) -> Result<TimeSeries, DataError>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = self.load_persisted(key);
        }

        let now = self.clock.now();
        let expired = guard.as_ref().is_some_and(|e| e.is_expired(now));
        let base_covered = match guard.as_ref() {
            Some(entry) if !expired => entry.covered.clone(),
            _ => Vec::new(),
        };

        let missing = uncovered(request, &base_covered);
        if missing.is_empty() {
            if let Some(entry) = guard.as_ref() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(source = %key.source, entity = %key.entity, %request, "cache hit");
                return Ok(CachedSeries {
                    series: entry.series.slice(request),
                    stale: false,
                    fetched: Vec::new(),
                });
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut fetched_ranges = Vec::new();
        let mut fetched_series = Vec::new();
        let mut failure: Option<DataError> = None;
        for sub in missing {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            debug!(source = %key.source, entity = %key.entity, range = %sub, "fetching uncovered range");
            match fetch_fn(sub) {
                Ok(series) => {
                    fetched_series.push(series.slice(sub));
                    fetched_ranges.push(sub);
                }
                Err(e) => {
                    warn!(source = %key.source, entity = %key.entity, range = %sub, error = %e, "fetch failed");
                    failure.get_or_insert(e);
                }
            }
        }

        if !fetched_series.is_empty() {
            let mut merged = match guard.as_ref() {
                Some(entry) => entry.series.clone(),
                None => fetched_series[0].clone(),
            };
            for series in &fetched_series {
                merged = merged.merge_newest_wins(series);
            }
            let mut covered = base_covered;
            covered.extend(fetched_ranges.iter().copied());

            let entry = CacheEntry {
                series: merged,
                covered: normalize_ranges(covered),
                retrieved_at: now,
                ttl: self.ttl,
            };
            if let Some(store) = &self.store {
                if let Err(e) = store.save(key, &entry) {
                    warn!(source = %key.source, entity = %key.entity, error = %e, "cache snapshot not persisted");
                }
            }
            *guard = Some(entry);
        }

        let series = guard.as_ref().map(|e| e.series.slice(request));
        match (failure, series) {
            (None, Some(series)) => Ok(CachedSeries {
                series,
                stale: false,
                fetched: fetched_ranges,
            }),
            (Some(err), Some(series)) if !series.is_empty() => {
                self.stale_returns.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source = %key.source,
                    entity = %key.entity,
                    %request,
                    reason = %err,
                    "serving stale cached data"
                );
                Ok(CachedSeries {
                    series,
                    stale: true,
                    fetched: fetched_ranges,
                })
            }
            (Some(err), _) => Err(DataError::SourceUnavailable {
                source_id: key.source.clone(),
                entity: key.entity.clone(),
                reason: err.to_string(),
            }),
            (None, None) => Err(DataError::SourceUnavailable {
                source_id: key.source.clone(),
                entity: key.entity.clone(),
                reason: "no data returned".into(),
            }),
        }
    }

    /// Snapshot of the entry for `key`, if any.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.slots.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Drop the entry for `key`, including its persisted snapshot.
    pub fn invalidate(&self, key: &CacheKey) -> Result<(), DataError> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(store) = &self.store {
            store.remove(key)?;
        }
        Ok(())
    }

    /// Drop every in-memory entry. Persisted snapshots are kept.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn load_persisted(&self, key: &CacheKey) -> Option<CacheEntry> {
        let store = self.store.as_ref()?;
        match store.load(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(source = %key.source, entity = %key.entity, error = %e, "ignoring unreadable cache snapshot");
                None
            }
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}

//! Concurrency and persistence tests for the shared fetch cache.
//!
//! Two simultaneous requests for overlapping ranges of one key must produce
//! exactly one source call per uncovered sub-range, never overlapping calls,
//! and a single merged entry covering the union.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use epflab_core::data::{Cache, CacheKey, DataError, ParquetStore};
use epflab_core::domain::{EntityId, Frequency, Observation, SourceId, TimeRange, TimeSeries};

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn range(a: i64, b: i64) -> TimeRange {
    TimeRange::new(day(a), day(b)).unwrap()
}

fn key() -> CacheKey {
    CacheKey::new(SourceId::from("market"), EntityId::from("price"))
}

fn series_for(r: TimeRange) -> TimeSeries {
    let points = (0..r.steps(Frequency::Daily))
        .map(|i| {
            let ts = Frequency::Daily.advance(r.start, i);
            Observation::new(ts, (ts - day(0)).num_days() as f64)
        })
        .collect();
    TimeSeries::new(EntityId::from("price"), Frequency::Daily, points).unwrap()
}

#[test]
fn overlapping_concurrent_requests_fetch_disjoint_ranges() {
    let cache = Arc::new(Cache::default());
    let calls: Arc<Mutex<Vec<TimeRange>>> = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [range(0, 10), range(5, 15)]
        .into_iter()
        .map(|request| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_fetch(&key(), request, |sub| {
                        calls.lock().unwrap().push(sub);
                        thread::sleep(std::time::Duration::from_millis(50));
                        Ok::<_, DataError>(series_for(sub))
                    })
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2, "one call per uncovered sub-range: {calls:?}");
    assert!(!calls[0].overlaps(&calls[1]), "calls overlap: {calls:?}");

    let entry = cache.entry(&key()).unwrap();
    assert_eq!(entry.covered, vec![range(0, 15)]);
    assert_eq!(entry.series.len(), 15);
    assert!(results.iter().all(|r| r.series.len() == 10 && !r.stale));
}

#[test]
fn many_threads_same_range_fetch_once() {
    let cache = Arc::new(Cache::default());
    let calls = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            thread::spawn(move || {
                cache
                    .get_or_fetch(&key(), range(0, 30), |sub| {
                        *calls.lock().unwrap() += 1;
                        Ok::<_, DataError>(series_for(sub))
                    })
                    .unwrap()
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(cache.stats().hits, 7);
}

#[test]
fn persisted_entries_survive_a_new_cache_instance() {
    let dir = tempfile::tempdir().unwrap();

    let first = Cache::default().with_persistence(ParquetStore::new(dir.path()));
    first
        .get_or_fetch(&key(), range(0, 20), |sub| Ok::<_, DataError>(series_for(sub)))
        .unwrap();

    let second = Cache::default().with_persistence(ParquetStore::new(dir.path()));
    let mut fetched = false;
    let out = second
        .get_or_fetch(&key(), range(2, 12), |sub| {
            fetched = true;
            Ok::<_, DataError>(series_for(sub))
        })
        .unwrap();

    assert!(!fetched, "served from the persisted snapshot");
    assert_eq!(out.series.len(), 10);
    assert_eq!(out.series.value_at(day(2)), Some(Some(2.0)));
}

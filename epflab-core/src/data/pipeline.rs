//! DataPipeline: sources → cache → alignment → validation.
//!
//! Assembled builder-style:
//!
//! ```ignore
//! let pipeline = DataPipeline::new(cache)
//!     .add_source(market)
//!     .add_source(weather)
//!     .with_validation(policy);
//! let build = pipeline.build(&requests, range)?;
//! ```
//!
//! Every fetch runs on its own thread bounded by a timeout and behind a
//! per-source circuit breaker. A timeout or an open breaker is just a fetch
//! failure to the cache, which then degrades to stale data if it has any.
//!
//! A timed-out worker cannot be interrupted: it is detached and runs until
//! the source call returns, its result discarded. Each source may have at
//! most [`DEFAULT_MAX_IN_FLIGHT`] such calls running (see
//! [`DataPipeline::with_max_in_flight`]); past that, fetches from it fail
//! with [`DataError::Saturated`] without spawning a thread.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::align::{align_series_over, AlignError, AlignedFrame};
use super::cache::{Cache, CacheKey};
use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataSource};
use super::validate::{validate_frame, ValidationIssue, ValidationPolicy, ValidationReport};
use crate::domain::{EntityId, Frequency, RangeError, SourceId, TimeRange, TimeSeries, TimeZoneTag};

/// Default bound on a single source call.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on unfinished source calls per source.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Error)]
pub enum DataPipelineError {
    #[error("at least one data source must be added before building")]
    NoSources,

    #[error("invalid time range: {0}")]
    InvalidRange(#[from] RangeError),

    #[error("required entity '{0}' produced no data column")]
    MissingEntity(EntityId),

    #[error("required entity '{entity}' unavailable: {cause}")]
    SourceUnavailable {
        entity: EntityId,
        #[source]
        cause: DataError,
    },

    #[error("required entity '{entity}' failed validation: {}", .issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation {
        entity: EntityId,
        issues: Vec<ValidationIssue>,
    },

    #[error("alignment failed: {0}")]
    Align(#[from] AlignError),
}

/// One entity to load. Optional entities are dropped (with a warning)
/// instead of failing the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRequest {
    pub entity: EntityId,
    pub required: bool,
}

impl EntityRequest {
    pub fn required(entity: impl Into<EntityId>) -> Self {
        Self {
            entity: entity.into(),
            required: true,
        }
    }

    pub fn optional(entity: impl Into<EntityId>) -> Self {
        Self {
            entity: entity.into(),
            required: false,
        }
    }
}

impl From<EntityId> for EntityRequest {
    fn from(entity: EntityId) -> Self {
        Self {
            entity,
            required: true,
        }
    }
}

/// Output of [`DataPipeline::build`].
#[derive(Debug, Clone)]
pub struct DataBuild {
    pub frame: AlignedFrame,
    pub report: ValidationReport,
    /// Entities served from stale cache after a failed fetch.
    pub stale_entities: Vec<EntityId>,
    /// Optional entities left out, with the reason.
    pub dropped: Vec<(EntityId, String)>,
}

impl DataBuild {
    pub fn dataset_hash(&self) -> String {
        self.frame.dataset_hash()
    }
}

pub struct DataPipeline {
    cache: Arc<Cache>,
    sources: Vec<Arc<dyn DataSource>>,
    breakers: HashMap<SourceId, Arc<CircuitBreaker>>,
    in_flight: HashMap<SourceId, Arc<AtomicUsize>>,
    policy: ValidationPolicy,
    fetch_timeout: Duration,
    max_in_flight: usize,
    frequency: Frequency,
    timezone: TimeZoneTag,
}

impl DataPipeline {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            cache,
            sources: Vec::new(),
            breakers: HashMap::new(),
            in_flight: HashMap::new(),
            policy: ValidationPolicy::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            frequency: Frequency::Hourly,
            timezone: TimeZoneTag::Utc,
        }
    }

    /// Register a source. Entities resolve to the first source serving them.
    pub fn add_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.breakers
            .entry(source.source_id().clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::default_source()));
        self.in_flight.entry(source.source_id().clone()).or_default();
        self.sources.push(source);
        self
    }

    pub fn with_validation(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Cap on source calls per source that are still running, counting
    /// ones whose caller already timed out. At least one.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Time zone calendar features of the built frame are derived in.
    pub fn with_timezone(mut self, timezone: TimeZoneTag) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn resolve(&self, entity: &EntityId) -> Option<&Arc<dyn DataSource>> {
        self.sources.iter().find(|s| s.serves(entity))
    }

    /// Like [`build`](Self::build), checking `end > start` first.
    pub fn build_between(
        &self,
        entities: &[EntityRequest],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DataBuild, DataPipelineError> {
        let range = TimeRange::new(start, end)?;
        self.build(entities, range)
    }

    /// Load, align and validate `entities` over `range`.
    pub fn build(
        &self,
        entities: &[EntityRequest],
        range: TimeRange,
    ) -> Result<DataBuild, DataPipelineError> {
        if self.sources.is_empty() {
            return Err(DataPipelineError::NoSources);
        }
        info!(entities = entities.len(), %range, "building dataset");

        let mut series = Vec::with_capacity(entities.len());
        let mut stale_entities = Vec::new();
        let mut dropped = Vec::new();
        let mut required: HashMap<EntityId, bool> = HashMap::new();

        for request in entities {
            let entity = &request.entity;
            required.insert(entity.clone(), request.required);

            let Some(source) = self.resolve(entity) else {
                // No source can ever produce this column.
                return Err(DataPipelineError::MissingEntity(entity.clone()));
            };

            match self.load_entity(source, entity, range) {
                Ok((s, stale)) if !s.is_empty() => {
                    if stale {
                        stale_entities.push(entity.clone());
                    }
                    series.push(s);
                }
                Ok(_) if request.required => {
                    return Err(DataPipelineError::MissingEntity(entity.clone()));
                }
                Ok(_) => {
                    warn!(%entity, "optional entity returned no data, dropping");
                    dropped.push((entity.clone(), "no data".to_string()));
                }
                Err(cause) if request.required => {
                    return Err(DataPipelineError::SourceUnavailable {
                        entity: entity.clone(),
                        cause,
                    });
                }
                Err(cause) => {
                    warn!(%entity, error = %cause, "optional entity unavailable, dropping");
                    dropped.push((entity.clone(), cause.to_string()));
                }
            }
        }

        let gaps = series
            .iter()
            .map(|s| (s.entity().clone(), s.gaps_within(range)))
            .collect::<HashMap<_, _>>();
        let mut frame = align_series_over(&series, range, self.frequency, self.timezone)?;
        let report = validate_frame(&mut frame, &gaps, &self.policy);

        for entity in frame.entities().cloned().collect::<Vec<_>>() {
            if !report.has_errors_for(&entity) {
                continue;
            }
            let issues: Vec<ValidationIssue> = report.errors_for(&entity).cloned().collect();
            if required.get(&entity).copied().unwrap_or(true) {
                return Err(DataPipelineError::Validation { entity, issues });
            }
            warn!(%entity, errors = issues.len(), "optional entity failed validation, dropping");
            frame.drop_column(&entity);
            dropped.push((entity, "validation failed".to_string()));
        }

        for request in entities.iter().filter(|r| r.required) {
            if !frame.has_column(&request.entity) {
                return Err(DataPipelineError::MissingEntity(request.entity.clone()));
            }
        }

        info!(
            rows = frame.len(),
            columns = frame.columns.len(),
            warnings = report.warnings.len(),
            stale = stale_entities.len(),
            "dataset built"
        );
        Ok(DataBuild {
            frame,
            report,
            stale_entities,
            dropped,
        })
    }

    fn load_entity(
        &self,
        source: &Arc<dyn DataSource>,
        entity: &EntityId,
        range: TimeRange,
    ) -> Result<(TimeSeries, bool), DataError> {
        let key = CacheKey::new(source.source_id().clone(), entity.clone())
            .with_params(source.params_fingerprint());
        let cached = self
            .cache
            .get_or_fetch(&key, range, |sub| self.fetch_with_timeout(source, entity, sub))?;
        Ok((cached.series, cached.stale))
    }

    /// One source call on a worker thread, bounded by the fetch timeout.
    fn fetch_with_timeout(
        &self,
        source: &Arc<dyn DataSource>,
        entity: &EntityId,
        range: TimeRange,
    ) -> Result<TimeSeries, DataError> {
        let source_id = source.source_id().clone();
        let breaker = self.breakers.get(&source_id).cloned();
        if let Some(b) = &breaker {
            if !b.is_allowed() {
                debug!(source = %source_id, "circuit open, skipping fetch");
                return Err(DataError::CircuitOpen(source_id));
            }
        }

        let counter = self.in_flight.get(&source_id).cloned().unwrap_or_default();
        let in_flight = counter.load(Ordering::SeqCst);
        if in_flight >= self.max_in_flight {
            warn!(source = %source_id, in_flight, "too many unfinished fetches, refusing");
            return Err(DataError::Saturated { source_id, in_flight });
        }
        counter.fetch_add(1, Ordering::SeqCst);
        let slot = InFlightSlot(counter);

        let (tx, rx) = mpsc::channel();
        let worker_source = Arc::clone(source);
        let worker_entity = entity.clone();
        thread::spawn(move || {
            let result = worker_source.fetch(&worker_entity, range);
            drop(slot);
            // The receiver may have given up already.
            let _ = tx.send(result);
        });

        let result = match rx.recv_timeout(self.fetch_timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(DataError::Timeout {
                source_id: source_id.clone(),
                entity: entity.clone(),
                timeout_ms: self.fetch_timeout.as_millis() as u64,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(DataError::SourceUnavailable {
                source_id: source_id.clone(),
                entity: entity.clone(),
                reason: "fetch worker terminated".into(),
            }),
        };

        if let Some(b) = &breaker {
            match &result {
                Ok(_) => b.record_success(),
                Err(_) => b.record_failure(),
            }
        }
        result
    }
}

/// Releases one in-flight slot when the worker finishes, panics included.
struct InFlightSlot(Arc<AtomicUsize>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::SyntheticSource;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::days(n)
    }

    fn source(entities: &[&str]) -> Arc<SyntheticSource> {
        Arc::new(SyntheticSource::new(
            "synthetic",
            entities.iter().map(|e| EntityId::from(*e)).collect(),
            Frequency::Daily,
            1,
        ))
    }

    fn pipeline(src: Arc<SyntheticSource>) -> DataPipeline {
        DataPipeline::new(Arc::new(Cache::default()))
            .add_source(src)
            .with_frequency(Frequency::Daily)
    }

    #[test]
    fn build_without_sources_fails() {
        let p = DataPipeline::new(Arc::new(Cache::default()));
        let err = p
            .build(&[EntityRequest::required("price")], TimeRange::new(day(0), day(5)).unwrap())
            .unwrap_err();
        assert!(matches!(err, DataPipelineError::NoSources));
    }

    #[test]
    fn end_before_start_is_invalid_range() {
        let p = pipeline(source(&["price"]));
        let err = p
            .build_between(&[EntityRequest::required("price")], day(5), day(1))
            .unwrap_err();
        assert!(matches!(err, DataPipelineError::InvalidRange(_)));
    }

    #[test]
    fn unserved_entity_is_missing() {
        let p = pipeline(source(&["price"]));
        let err = p
            .build(&[EntityRequest::required("load")], TimeRange::new(day(0), day(5)).unwrap())
            .unwrap_err();
        assert!(matches!(err, DataPipelineError::MissingEntity(_)));
    }

    #[test]
    fn builds_aligned_frame_for_all_entities() {
        let p = pipeline(source(&["price", "load"]));
        let build = p
            .build(
                &[EntityRequest::required("price"), EntityRequest::required("load")],
                TimeRange::new(day(0), day(10)).unwrap(),
            )
            .unwrap();
        assert_eq!(build.frame.len(), 10);
        assert_eq!(build.frame.columns.len(), 2);
        assert!(build.report.is_clean());
    }

    #[test]
    fn slow_source_times_out_and_optional_entity_is_dropped() {
        let slow = Arc::new(
            SyntheticSource::new("slow", vec![EntityId::from("wind")], Frequency::Daily, 1)
                .with_delay(Duration::from_millis(300)),
        );
        let p = pipeline(source(&["price"]))
            .add_source(slow)
            .with_fetch_timeout(Duration::from_millis(20));

        let build = p
            .build(
                &[EntityRequest::required("price"), EntityRequest::optional("wind")],
                TimeRange::new(day(0), day(5)).unwrap(),
            )
            .unwrap();

        assert!(!build.frame.has_column(&EntityId::from("wind")));
        assert_eq!(build.dropped.len(), 1);
    }

    #[test]
    fn failed_refetch_serves_stale_data() {
        let src = source(&["price"]);
        let p = pipeline(src.clone()).with_validation(ValidationPolicy {
            severity_threshold: 1.0,
            ..ValidationPolicy::default()
        });
        let req = [EntityRequest::required("price")];
        p.build(&req, TimeRange::new(day(0), day(5)).unwrap()).unwrap();

        src.set_failing(true);
        let build = p.build(&req, TimeRange::new(day(0), day(8)).unwrap()).unwrap();

        assert_eq!(build.stale_entities, vec![EntityId::from("price")]);
        assert_eq!(build.frame.len(), 8);
        let price = build.frame.column(&EntityId::from("price")).unwrap();
        assert!(price[..5].iter().all(Option::is_some));
        assert_eq!(price[5..], [None, None, None]);
    }

    #[test]
    fn frame_covers_the_requested_range_not_the_returned_one() {
        let src = source(&["price"]);
        let p = pipeline(src.clone()).with_validation(ValidationPolicy {
            severity_threshold: 1.0,
            ..ValidationPolicy::default()
        });
        let req = [EntityRequest::required("price")];
        p.build(&req, TimeRange::new(day(2), day(5)).unwrap()).unwrap();

        // Only days 2..5 are cached now; both edges of the wider request are absent.
        src.set_failing(true);
        let build = p.build(&req, TimeRange::new(day(0), day(8)).unwrap()).unwrap();

        assert_eq!(build.frame.len(), 8);
        assert_eq!(build.frame.index.first(), Some(&day(0)));
        assert_eq!(build.frame.index.last(), Some(&day(7)));
        let price = build.frame.column(&EntityId::from("price")).unwrap();
        assert_eq!(price[..2], [None, None]);
        assert!(price[2..5].iter().all(Option::is_some));
        assert_eq!(price[5..], [None, None, None]);

        let gaps: Vec<(DateTime<Utc>, i64)> = build
            .report
            .warnings
            .iter()
            .filter_map(|w| match w {
                ValidationIssue::Gap { after, missing_steps, .. } => Some((*after, *missing_steps)),
                _ => None,
            })
            .collect();
        assert_eq!(gaps, vec![(day(-1), 2), (day(4), 3)]);
    }

    #[test]
    fn absent_edges_count_towards_severity() {
        let src = source(&["price"]);
        let p = pipeline(src.clone());
        let req = [EntityRequest::required("price")];
        p.build(&req, TimeRange::new(day(0), day(5)).unwrap()).unwrap();

        src.set_failing(true);
        let err = p.build(&req, TimeRange::new(day(0), day(8)).unwrap()).unwrap_err();

        assert!(matches!(
            err,
            DataPipelineError::Validation { ref issues, .. }
                if issues.iter().any(|i| matches!(i, ValidationIssue::SeverityExceeded { .. }))
        ));
    }

    #[test]
    fn stalled_fetches_are_capped_per_source() {
        let slow = Arc::new(
            SyntheticSource::new("slow", vec![EntityId::from("wind")], Frequency::Daily, 1)
                .with_delay(Duration::from_millis(500)),
        );
        let p = pipeline(source(&["price"]))
            .add_source(slow.clone())
            .with_fetch_timeout(Duration::from_millis(10))
            .with_max_in_flight(1);
        let req = [EntityRequest::required("price"), EntityRequest::optional("wind")];

        p.build(&req, TimeRange::new(day(0), day(5)).unwrap()).unwrap();
        let build = p.build(&req, TimeRange::new(day(0), day(6)).unwrap()).unwrap();

        // The first call is still sleeping, so the second never reached the source.
        assert_eq!(slow.calls().len(), 1);
        assert!(!build.frame.has_column(&EntityId::from("wind")));
        assert!(build.dropped[0].1.contains("timed-out fetches"));
    }
}

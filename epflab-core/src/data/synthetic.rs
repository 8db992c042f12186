//! Deterministic synthetic source for tests, benches and dry runs.
//!
//! Each value is a pure function of `(seed, entity, timestamp)`: an
//! entity-specific level, a seasonal cycle and bounded noise. Splitting a
//! range into several fetches therefore returns exactly the same values as
//! one fetch of the whole range.
//!
//! Failure, latency and omitted timestamps can be injected to exercise the
//! cache-degrade, timeout and validation paths.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashSet;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::provider::{DataError, DataSource};
use crate::domain::{EntityId, Frequency, Observation, SourceId, TimeRange, TimeSeries, TimeZoneTag};
use crate::rng::SeedHierarchy;

#[derive(Debug)]
pub struct SyntheticSource {
    id: SourceId,
    entities: Vec<EntityId>,
    frequency: Frequency,
    timezone: TimeZoneTag,
    seeds: SeedHierarchy,
    /// Length of the seasonal cycle in steps.
    period: i64,
    amplitude: f64,
    noise: f64,
    omitted: HashSet<DateTime<Utc>>,
    delay: Option<Duration>,
    failing: AtomicBool,
    calls: Mutex<Vec<(EntityId, TimeRange)>>,
}

impl SyntheticSource {
    pub fn new(id: impl Into<SourceId>, entities: Vec<EntityId>, frequency: Frequency, seed: u64) -> Self {
        let period = match frequency {
            Frequency::Daily => 7,
            Frequency::Hourly => 24,
            Frequency::HalfHourly => 48,
            Frequency::QuarterHourly => 96,
        };
        Self {
            id: id.into(),
            entities,
            frequency,
            timezone: TimeZoneTag::Utc,
            seeds: SeedHierarchy::new(seed),
            period,
            amplitude: 10.0,
            noise: 1.0,
            omitted: HashSet::new(),
            delay: None,
            failing: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_timezone(mut self, timezone: TimeZoneTag) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_season(mut self, period: i64, amplitude: f64) -> Self {
        self.period = period.max(1);
        self.amplitude = amplitude;
        self
    }

    /// Leave these timestamps out of every response (implicit gaps).
    pub fn omitting(mut self, timestamps: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.omitted.extend(timestamps);
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make subsequent fetches fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every `(entity, range)` fetched so far, in call order.
    pub fn calls(&self) -> Vec<(EntityId, TimeRange)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The value this source reports for `entity` at `ts`.
    pub fn value(&self, entity: &EntityId, ts: DateTime<Utc>) -> f64 {
        let step = ts.timestamp().div_euclid(self.frequency.seconds());
        let mut level_rng = self.seeds.rng_for(entity.as_str(), -1);
        let level: f64 = level_rng.gen_range(30.0..80.0);
        let phase: f64 = level_rng.gen_range(0.0..2.0 * PI);
        let season = self.amplitude * (2.0 * PI * step as f64 / self.period as f64 + phase).sin();
        let noise: f64 = self.seeds.rng_for(entity.as_str(), step).gen_range(-1.0..1.0);
        level + season + self.noise * noise
    }
}

impl DataSource for SyntheticSource {
    fn source_id(&self) -> &SourceId {
        &self.id
    }

    fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    fn params_fingerprint(&self) -> String {
        format!(
            "seed={};freq={};period={};amp={};noise={}",
            self.seeds.master_seed(),
            self.frequency,
            self.period,
            self.amplitude,
            self.noise
        )
    }

    fn fetch(&self, entity: &EntityId, range: TimeRange) -> Result<TimeSeries, DataError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((entity.clone(), range));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DataError::SourceUnavailable {
                source_id: self.id.clone(),
                entity: entity.clone(),
                reason: "injected failure".into(),
            });
        }
        if !self.serves(entity) {
            return Err(DataError::SourceUnavailable {
                source_id: self.id.clone(),
                entity: entity.clone(),
                reason: "entity not served".into(),
            });
        }

        // First grid point at or after range.start.
        let secs = self.frequency.seconds();
        let start_step = range.start.timestamp().div_euclid(secs)
            + i64::from(range.start.timestamp().rem_euclid(secs) != 0);
        let mut points = Vec::new();
        let mut step = start_step;
        loop {
            let Some(ts) = DateTime::<Utc>::from_timestamp(step * secs, 0) else {
                break;
            };
            if ts >= range.end {
                break;
            }
            if !self.omitted.contains(&ts) {
                points.push(Observation::new(ts, self.value(entity, ts)));
            }
            step += 1;
        }
        Ok(TimeSeries::new(entity.clone(), self.frequency, points)?.with_timezone(self.timezone))
    }
}

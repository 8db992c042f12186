//! Regularly sampled, entity-tagged time series with explicit missing markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::ids::EntityId;
use super::time::{Frequency, TimeRange, TimeZoneTag};

/// One sample. `value == None` is the explicit missing marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts: DateTime<Utc>,
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(ts: DateTime<Utc>, value: f64) -> Self {
        Self {
            ts,
            value: Some(value),
        }
    }

    pub fn missing(ts: DateTime<Utc>) -> Self {
        Self { ts, value: None }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("{entity}: timestamps must be strictly increasing (violated at {at})")]
    NotIncreasing { entity: EntityId, at: DateTime<Utc> },
    #[error("{entity}: timestamp {at} is not on the {frequency} grid")]
    OffGrid {
        entity: EntityId,
        at: DateTime<Utc>,
        frequency: Frequency,
    },
}

/// A run of timestamps absent from the series (not even marked missing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// Last timestamp present before the gap.
    pub after: DateTime<Utc>,
    /// Number of absent sampling steps.
    pub missing_steps: i64,
}

/// Ordered `(timestamp, value)` samples for one entity.
///
/// Invariants (enforced by every constructor): timestamps strictly increase
/// and consecutive timestamps are a whole number of `frequency` steps apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    entity: EntityId,
    frequency: Frequency,
    timezone: TimeZoneTag,
    points: Vec<Observation>,
}

impl TimeSeries {
    pub fn new(
        entity: EntityId,
        frequency: Frequency,
        points: Vec<Observation>,
    ) -> Result<Self, SeriesError> {
        for pair in points.windows(2) {
            let (prev, next) = (pair[0].ts, pair[1].ts);
            if next <= prev {
                return Err(SeriesError::NotIncreasing { entity, at: next });
            }
            if frequency.steps_between(prev, next).is_none() {
                return Err(SeriesError::OffGrid {
                    entity,
                    at: next,
                    frequency,
                });
            }
        }
        Ok(Self {
            entity,
            frequency,
            timezone: TimeZoneTag::Utc,
            points,
        })
    }

    pub fn empty(entity: EntityId, frequency: Frequency) -> Self {
        Self {
            entity,
            frequency,
            timezone: TimeZoneTag::Utc,
            points: Vec::new(),
        }
    }

    /// Regular series starting at `start`, one value per step.
    pub fn from_values(
        entity: EntityId,
        frequency: Frequency,
        start: DateTime<Utc>,
        values: impl IntoIterator<Item = Option<f64>>,
    ) -> Self {
        let points = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Observation {
                ts: frequency.advance(start, i as i64),
                value,
            })
            .collect();
        Self {
            entity,
            frequency,
            timezone: TimeZoneTag::Utc,
            points,
        }
    }

    pub fn with_timezone(mut self, timezone: TimeZoneTag) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn timezone(&self) -> TimeZoneTag {
        self.timezone
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_ts(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.ts)
    }

    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.ts)
    }

    /// `Some(value)` when `ts` is present (the inner option is the missing marker).
    pub fn value_at(&self, ts: DateTime<Utc>) -> Option<Option<f64>> {
        self.points
            .binary_search_by_key(&ts, |p| p.ts)
            .ok()
            .map(|i| self.points[i].value)
    }

    pub fn missing_count(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_none()).count()
    }

    /// Samples whose timestamp lies in `range`.
    pub fn slice(&self, range: TimeRange) -> TimeSeries {
        let lo = self.points.partition_point(|p| p.ts < range.start);
        let hi = self.points.partition_point(|p| p.ts < range.end);
        TimeSeries {
            entity: self.entity.clone(),
            frequency: self.frequency,
            timezone: self.timezone,
            points: self.points[lo..hi].to_vec(),
        }
    }

    /// Runs of absent timestamps between consecutive samples.
    pub fn gaps(&self) -> Vec<Gap> {
        self.points
            .windows(2)
            .filter_map(|pair| {
                let steps = self.frequency.steps_between(pair[0].ts, pair[1].ts)?;
                (steps > 1).then_some(Gap {
                    after: pair[0].ts,
                    missing_steps: steps - 1,
                })
            })
            .collect()
    }

    /// Runs of timestamps in `range` the series does not have, including
    /// any before its first sample or after its last. A leading run is
    /// reported `after` the step preceding `range.start`.
    pub fn gaps_within(&self, range: TimeRange) -> Vec<Gap> {
        let inside = self.slice(range);
        let before_start = self.frequency.advance(range.start, -1);
        let (Some(first), Some(last)) = (inside.first_ts(), inside.last_ts()) else {
            let missing_steps = range.steps(self.frequency);
            return if missing_steps > 0 {
                vec![Gap {
                    after: before_start,
                    missing_steps,
                }]
            } else {
                Vec::new()
            };
        };

        let mut gaps = Vec::new();
        if let Some(leading) = self.frequency.steps_between(range.start, first).filter(|n| *n > 0) {
            gaps.push(Gap {
                after: before_start,
                missing_steps: leading,
            });
        }
        gaps.extend(inside.gaps());
        if let Some(trailing) = self
            .frequency
            .steps_between(last, range.end)
            .map(|n| n - 1)
            .filter(|n| *n > 0)
        {
            gaps.push(Gap {
                after: last,
                missing_steps: trailing,
            });
        }
        gaps
    }

    /// Same series with every absent timestamp inserted as a missing marker.
    pub fn fill_gaps(&self) -> TimeSeries {
        let (Some(first), Some(last)) = (self.first_ts(), self.last_ts()) else {
            return self.clone();
        };
        let steps = self.frequency.steps_between(first, last).unwrap_or(0);
        let mut points = Vec::with_capacity(steps as usize + 1);
        let mut source = self.points.iter().peekable();
        for i in 0..=steps {
            let ts = self.frequency.advance(first, i);
            match source.peek() {
                Some(p) if p.ts == ts => {
                    points.push(**p);
                    source.next();
                }
                _ => points.push(Observation::missing(ts)),
            }
        }
        TimeSeries {
            entity: self.entity.clone(),
            frequency: self.frequency,
            timezone: self.timezone,
            points,
        }
    }

    /// Union of two snapshots of the same entity; on equal timestamps `newer` wins.
    pub fn merge_newest_wins(&self, newer: &TimeSeries) -> TimeSeries {
        let mut by_ts: BTreeMap<DateTime<Utc>, Option<f64>> =
            self.points.iter().map(|p| (p.ts, p.value)).collect();
        for p in &newer.points {
            by_ts.insert(p.ts, p.value);
        }
        TimeSeries {
            entity: self.entity.clone(),
            frequency: self.frequency,
            timezone: newer.timezone,
            points: by_ts
                .into_iter()
                .map(|(ts, value)| Observation { ts, value })
                .collect(),
        }
    }
}

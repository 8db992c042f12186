//! Multi-entity time alignment.
//!
//! Series are outer-joined onto one regular grid. [`align_series_over`]
//! lays the grid over a requested range, [`align_series`] over the span of
//! the inputs. Timestamps an entity does not have become explicit missing
//! markers (never forward-filled here).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EntityId, Frequency, TimeRange, TimeSeries, TimeZoneTag};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignError {
    #[error("{entity}: frequency {found} does not match the frame frequency {expected}")]
    MixedFrequency {
        entity: EntityId,
        expected: Frequency,
        found: Frequency,
    },
    #[error("{entity}: timestamp {at} is not on the frame grid")]
    OffGrid { entity: EntityId, at: DateTime<Utc> },
    #[error("entity {0} appears more than once")]
    DuplicateEntity(EntityId),
}

/// One column of an [`AlignedFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameColumn {
    pub entity: EntityId,
    pub values: Vec<Option<f64>>,
    /// Rows whose value was filled by validation rather than observed.
    /// Empty when nothing was filled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imputed: Vec<bool>,
}

impl FrameColumn {
    pub fn new(entity: impl Into<EntityId>, values: Vec<Option<f64>>) -> Self {
        Self {
            entity: entity.into(),
            values,
            imputed: Vec::new(),
        }
    }

    pub fn is_imputed(&self, row: usize) -> bool {
        self.imputed.get(row).copied().unwrap_or(false)
    }

    /// Values with every imputed cell set back to missing.
    pub fn observed(&self) -> Vec<Option<f64>> {
        self.values
            .iter()
            .enumerate()
            .map(|(row, v)| if self.is_imputed(row) { None } else { *v })
            .collect()
    }
}

/// Entities on a common timestamp index. Every column has `index.len()` rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedFrame {
    pub index: Vec<DateTime<Utc>>,
    pub columns: Vec<FrameColumn>,
    pub frequency: Frequency,
    pub timezone: TimeZoneTag,
}

impl AlignedFrame {
    pub fn empty(frequency: Frequency, timezone: TimeZoneTag) -> Self {
        Self {
            index: Vec::new(),
            columns: Vec::new(),
            frequency,
            timezone,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.columns.iter().map(|c| &c.entity)
    }

    pub fn has_column(&self, entity: &EntityId) -> bool {
        self.columns.iter().any(|c| &c.entity == entity)
    }

    pub fn column(&self, entity: &EntityId) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| &c.entity == entity)
            .map(|c| c.values.as_slice())
    }

    pub fn frame_column(&self, entity: &EntityId) -> Option<&FrameColumn> {
        self.columns.iter().find(|c| &c.entity == entity)
    }

    pub fn column_mut(&mut self, entity: &EntityId) -> Option<&mut Vec<Option<f64>>> {
        self.columns
            .iter_mut()
            .find(|c| &c.entity == entity)
            .map(|c| &mut c.values)
    }

    pub fn drop_column(&mut self, entity: &EntityId) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| &c.entity != entity);
        self.columns.len() != before
    }

    /// Row position of `ts` on the index.
    pub fn position(&self, ts: DateTime<Utc>) -> Option<usize> {
        self.index.binary_search(&ts).ok()
    }

    /// Covered range `[first, last + one step)`, if any rows exist.
    pub fn range(&self) -> Option<TimeRange> {
        let first = *self.index.first()?;
        let last = *self.index.last()?;
        TimeRange::new(first, self.frequency.advance(last, 1)).ok()
    }

    /// BLAKE3 over timestamps and every column's values, in column order.
    pub fn dataset_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.frequency.as_str().as_bytes());
        for ts in &self.index {
            hasher.update(&ts.timestamp().to_le_bytes());
        }
        for column in &self.columns {
            hasher.update(column.entity.as_str().as_bytes());
            for v in &column.values {
                match v {
                    Some(x) => {
                        hasher.update(&[1]);
                        hasher.update(&x.to_bits().to_le_bytes());
                    }
                    None => {
                        hasher.update(&[0]);
                    }
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Outer-join `series` onto a regular `frequency` grid.
///
/// Column order follows the input order.
pub fn align_series(
    series: &[TimeSeries],
    frequency: Frequency,
    timezone: TimeZoneTag,
) -> Result<AlignedFrame, AlignError> {
    check_inputs(series, frequency)?;

    let first = series.iter().filter_map(|s| s.first_ts()).min();
    let last = series.iter().filter_map(|s| s.last_ts()).max();
    let (Some(first), Some(last)) = (first, last) else {
        let mut frame = AlignedFrame::empty(frequency, timezone);
        frame.columns = series
            .iter()
            .map(|s| FrameColumn::new(s.entity().clone(), Vec::new()))
            .collect();
        return Ok(frame);
    };

    let steps = frequency
        .steps_between(first, last)
        .ok_or_else(|| AlignError::OffGrid {
            entity: series
                .iter()
                .find(|s| s.last_ts() == Some(last))
                .map(|s| s.entity().clone())
                .unwrap_or_else(|| EntityId::from("?")),
            at: last,
        })?;
    let index: Vec<DateTime<Utc>> = (0..=steps).map(|i| frequency.advance(first, i)).collect();
    place(series, index, frequency, timezone)
}

/// Outer-join `series` onto the `frequency` grid of `range`.
///
/// The frame has one row per step of `range` whether or not any source
/// returned it; rows nobody returned are missing in every column. Points
/// outside `range` are ignored.
pub fn align_series_over(
    series: &[TimeSeries],
    range: TimeRange,
    frequency: Frequency,
    timezone: TimeZoneTag,
) -> Result<AlignedFrame, AlignError> {
    check_inputs(series, frequency)?;
    let index: Vec<DateTime<Utc>> = (0..range.steps(frequency))
        .map(|i| frequency.advance(range.start, i))
        .collect();
    let inside: Vec<TimeSeries> = series.iter().map(|s| s.slice(range)).collect();
    place(&inside, index, frequency, timezone)
}

fn check_inputs(series: &[TimeSeries], frequency: Frequency) -> Result<(), AlignError> {
    for (i, s) in series.iter().enumerate() {
        if s.frequency() != frequency {
            return Err(AlignError::MixedFrequency {
                entity: s.entity().clone(),
                expected: frequency,
                found: s.frequency(),
            });
        }
        if series[..i].iter().any(|prev| prev.entity() == s.entity()) {
            return Err(AlignError::DuplicateEntity(s.entity().clone()));
        }
    }
    Ok(())
}

/// Scatter every point of `series` onto `index`.
fn place(
    series: &[TimeSeries],
    index: Vec<DateTime<Utc>>,
    frequency: Frequency,
    timezone: TimeZoneTag,
) -> Result<AlignedFrame, AlignError> {
    let mut columns = Vec::with_capacity(series.len());
    for s in series {
        let mut values = vec![None; index.len()];
        for p in s.points() {
            let pos = index
                .first()
                .and_then(|first| frequency.steps_between(*first, p.ts))
                .filter(|n| *n >= 0 && (*n as usize) < index.len())
                .ok_or_else(|| AlignError::OffGrid {
                    entity: s.entity().clone(),
                    at: p.ts,
                })?;
            values[pos as usize] = p.value;
        }
        columns.push(FrameColumn::new(s.entity().clone(), values));
    }

    Ok(AlignedFrame {
        index,
        columns,
        frequency,
        timezone,
    })
}

//! Forecast values and quantile levels.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ModelError;

/// Resolution of a [`QuantileLevel`]: levels are stored in units of 1e-4.
const LEVEL_UNITS: f64 = 10_000.0;

/// A quantile level strictly inside (0, 1).
///
/// Stored as an integer so it can key maps and be ordered exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct QuantileLevel(u32);

impl QuantileLevel {
    pub const MEDIAN: QuantileLevel = QuantileLevel(5_000);

    pub fn new(level: f64) -> Result<Self, ModelError> {
        let units = (level * LEVEL_UNITS).round();
        if !level.is_finite() || units <= 0.0 || units >= LEVEL_UNITS {
            return Err(ModelError::InvalidQuantile(level));
        }
        Ok(Self(units as u32))
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / LEVEL_UNITS
    }

    /// Level closest to the median, used to point-score quantile forecasts.
    pub fn closest_to_median(levels: &[QuantileLevel]) -> Option<usize> {
        levels
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| l.0.abs_diff(Self::MEDIAN.0))
            .map(|(i, _)| i)
    }
}

impl fmt::Display for QuantileLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl TryFrom<f64> for QuantileLevel {
    type Error = ModelError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QuantileLevel> for f64 {
    fn from(level: QuantileLevel) -> Self {
        level.value()
    }
}

/// Which predict path a model or handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastKind {
    Deterministic,
    Probabilistic,
}

impl fmt::Display for ForecastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastKind::Deterministic => f.write_str("deterministic"),
            ForecastKind::Probabilistic => f.write_str("probabilistic"),
        }
    }
}

/// Model output for every row of a prediction matrix.
///
/// `None` marks a row whose features were incomplete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Forecast {
    Point {
        values: Vec<Option<f64>>,
    },
    Quantiles {
        levels: Vec<QuantileLevel>,
        /// One non-decreasing value per level, per row.
        values: Vec<Option<Vec<f64>>>,
    },
}

impl Forecast {
    pub fn kind(&self) -> ForecastKind {
        match self {
            Forecast::Point { .. } => ForecastKind::Deterministic,
            Forecast::Quantiles { .. } => ForecastKind::Probabilistic,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Forecast::Point { values } => values.len(),
            Forecast::Quantiles { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a monotone map to every value (e.g. undoing target scaling).
    pub fn map_values(self, f: impl Fn(f64) -> f64) -> Forecast {
        match self {
            Forecast::Point { values } => Forecast::Point {
                values: values.into_iter().map(|v| v.map(&f)).collect(),
            },
            Forecast::Quantiles { levels, values } => Forecast::Quantiles {
                levels,
                values: values
                    .into_iter()
                    .map(|row| row.map(|qs| qs.into_iter().map(&f).collect()))
                    .collect(),
            },
        }
    }

    /// Point forecast per row: the value itself, or the median level.
    pub fn point(&self) -> Vec<Option<f64>> {
        match self {
            Forecast::Point { values } => values.clone(),
            Forecast::Quantiles { levels, values } => {
                let Some(mid) = QuantileLevel::closest_to_median(levels) else {
                    return vec![None; values.len()];
                };
                values
                    .iter()
                    .map(|row| row.as_ref().and_then(|qs| qs.get(mid).copied()))
                    .collect()
            }
        }
    }
}

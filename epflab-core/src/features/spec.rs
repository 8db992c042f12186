//! Declarative lag feature descriptors.
//!
//! Grammar: `<entity>:lag<L>[:h<H>][:<agg><W>]`, with `d-<L>` accepted as an
//! alias for `lag<L>` and `agg` one of `mean`, `std`, `min`, `max`.
//!
//! `price:lag7`: price observed 7 steps before the target, horizon 1.
//! `load:d-2:h2:mean24`: mean of the 24 load values ending 2 steps before
//! the target, for a 2-step-ahead forecast.
//!
//! A spec is a construction-time contract: a lag smaller than the horizon
//! would read data that is not observed yet when the forecast is issued, so
//! it never gets built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::EntityId;

/// A feature or scaler configuration that would read data not yet
/// available at prediction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeakageGuardError {
    #[error("{spec}: lag {lag} is smaller than horizon {horizon}")]
    LagBelowHorizon { spec: String, lag: u32, horizon: u32 },

    #[error(
        "{spec}: interpolation reads up to {lookahead} row(s) ahead, which needs lag - horizon >= {lookahead} (have {slack})"
    )]
    NonCausalInterpolation {
        spec: String,
        lookahead: usize,
        slack: u32,
    },

    #[error("scaler fit window '{0}' includes the prediction window")]
    ScalerFitWindow(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("invalid feature spec '{spec}': {reason}")]
    Parse { spec: String, reason: String },

    #[error(transparent)]
    Leakage(#[from] LeakageGuardError),

    #[error("unknown calendar feature '{0}'")]
    UnknownCalendar(String),

    #[error("entity '{0}' is not a column of the frame")]
    UnknownEntity(EntityId),

    #[error("duplicate feature column '{0}'")]
    DuplicateColumn(String),

    #[error("no feature rows for window {0}")]
    EmptyWindow(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollingAgg {
    Mean,
    Std,
    Min,
    Max,
}

impl RollingAgg {
    pub fn as_str(self) -> &'static str {
        match self {
            RollingAgg::Mean => "mean",
            RollingAgg::Std => "std",
            RollingAgg::Min => "min",
            RollingAgg::Max => "max",
        }
    }

    /// Aggregate a complete window. `None` for an undefined statistic.
    pub fn apply(self, window: &[f64]) -> Option<f64> {
        if window.is_empty() {
            return None;
        }
        let n = window.len() as f64;
        match self {
            RollingAgg::Mean => Some(window.iter().sum::<f64>() / n),
            RollingAgg::Std => {
                if window.len() < 2 {
                    return None;
                }
                let mean = window.iter().sum::<f64>() / n;
                let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
                Some(var.sqrt())
            }
            RollingAgg::Min => window.iter().copied().reduce(f64::min),
            RollingAgg::Max => window.iter().copied().reduce(f64::max),
        }
    }

    fn parse_prefix(part: &str) -> Option<(RollingAgg, &str)> {
        [RollingAgg::Mean, RollingAgg::Std, RollingAgg::Min, RollingAgg::Max]
            .into_iter()
            .find_map(|agg| part.strip_prefix(agg.as_str()).map(|rest| (agg, rest)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rolling {
    pub agg: RollingAgg,
    pub window: u32,
}

/// Typed lag feature: entity, lag distance, horizon, optional rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureSpec {
    entity: EntityId,
    lag: u32,
    horizon: u32,
    rolling: Option<Rolling>,
}

impl FeatureSpec {
    /// Rejects `lag < horizon`. Horizon and lag are at least 1.
    pub fn new(entity: impl Into<EntityId>, lag: u32, horizon: u32) -> Result<Self, FeatureError> {
        let entity = entity.into();
        let spec_str = format!("{entity}:lag{lag}:h{horizon}");
        if horizon == 0 {
            return Err(FeatureError::Parse {
                spec: spec_str,
                reason: "horizon must be at least 1".into(),
            });
        }
        if lag < horizon {
            return Err(LeakageGuardError::LagBelowHorizon {
                spec: spec_str,
                lag,
                horizon,
            }
            .into());
        }
        Ok(Self {
            entity,
            lag,
            horizon,
            rolling: None,
        })
    }

    pub fn with_rolling(mut self, agg: RollingAgg, window: u32) -> Result<Self, FeatureError> {
        if window == 0 {
            return Err(FeatureError::Parse {
                spec: self.to_string(),
                reason: "rolling window must be at least 1".into(),
            });
        }
        self.rolling = Some(Rolling { agg, window });
        Ok(self)
    }

    pub fn parse(s: &str) -> Result<Self, FeatureError> {
        let err = |reason: &str| FeatureError::Parse {
            spec: s.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = s.trim().split(':');
        let entity = parts.next().filter(|e| !e.is_empty()).ok_or_else(|| err("missing entity"))?;
        let lag_part = parts.next().ok_or_else(|| err("missing lag (expected lag<L> or d-<L>)"))?;
        let lag_digits = lag_part
            .strip_prefix("lag")
            .or_else(|| lag_part.strip_prefix("d-"))
            .ok_or_else(|| err("lag must be written lag<L> or d-<L>"))?;
        let lag: u32 = lag_digits.parse().map_err(|_| err("lag is not a whole number"))?;

        let mut horizon: Option<u32> = None;
        let mut rolling: Option<(RollingAgg, u32)> = None;
        for part in parts {
            if let Some(h) = part.strip_prefix('h') {
                if horizon.is_some() {
                    return Err(err("horizon given twice"));
                }
                horizon = Some(h.parse().map_err(|_| err("horizon is not a whole number"))?);
            } else if let Some((agg, w)) = RollingAgg::parse_prefix(part) {
                if rolling.is_some() {
                    return Err(err("rolling window given twice"));
                }
                rolling = Some((agg, w.parse().map_err(|_| err("rolling window is not a whole number"))?));
            } else {
                return Err(err(&format!("unrecognised component '{part}'")));
            }
        }

        let spec = Self::new(entity, lag, horizon.unwrap_or(1))?;
        match rolling {
            Some((agg, window)) => spec.with_rolling(agg, window),
            None => Ok(spec),
        }
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn lag(&self) -> u32 {
        self.lag
    }

    pub fn horizon(&self) -> u32 {
        self.horizon
    }

    pub fn rolling(&self) -> Option<Rolling> {
        self.rolling
    }

    /// Deterministic column name, e.g. `load_lag2_h2_mean24`.
    pub fn column_name(&self) -> String {
        match self.rolling {
            Some(r) => format!(
                "{}_lag{}_h{}_{}{}",
                self.entity,
                self.lag,
                self.horizon,
                r.agg.as_str(),
                r.window
            ),
            None => format!("{}_lag{}_h{}", self.entity, self.lag, self.horizon),
        }
    }

    /// Check that a non-causal fill reading `lookahead` rows ahead of each
    /// filled value cannot reach past the forecast origin.
    pub fn check_lookahead(&self, lookahead: usize) -> Result<(), LeakageGuardError> {
        let slack = self.lag - self.horizon;
        if (slack as usize) < lookahead {
            return Err(LeakageGuardError::NonCausalInterpolation {
                spec: self.to_string(),
                lookahead,
                slack,
            });
        }
        Ok(())
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:lag{}:h{}", self.entity, self.lag, self.horizon)?;
        if let Some(r) = self.rolling {
            write!(f, ":{}{}", r.agg.as_str(), r.window)?;
        }
        Ok(())
    }
}

impl FromStr for FeatureSpec {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FeatureSpec {
    type Error = FeatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FeatureSpec> for String {
    fn from(spec: FeatureSpec) -> Self {
        spec.to_string()
    }
}

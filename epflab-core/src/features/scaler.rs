//! Per-fold feature and target scaling.
//!
//! A [`FittedScaler`] is fit on the estimation rows of one fold and then only
//! applied, never refit, to that fold's prediction rows. Binary {0, 1}
//! columns are passed through unchanged; a constant column gets scale 1.
//! The target is always scaled and forecasts are mapped back through
//! [`FittedScaler::inverse_target`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::matrix::FeatureMatrix;
use super::spec::{FeatureError, LeakageGuardError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerKind {
    #[default]
    None,
    Standard,
    #[serde(alias = "min_max")]
    MinMax,
}

impl FromStr for ScalerKind {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(ScalerKind::None),
            "standard" => Ok(ScalerKind::Standard),
            "minmax" | "min_max" => Ok(ScalerKind::MinMax),
            other => Err(FeatureError::Parse {
                spec: other.to_string(),
                reason: "unknown scaler (expected none, standard or minmax)".into(),
            }),
        }
    }
}

/// Which rows a scaler may be fit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalerFitWindow {
    #[default]
    Estimation,
    /// Whole series, prediction window included. Always rejected.
    Full,
}

impl ScalerFitWindow {
    pub fn check(self) -> Result<(), LeakageGuardError> {
        match self {
            ScalerFitWindow::Estimation => Ok(()),
            ScalerFitWindow::Full => Err(LeakageGuardError::ScalerFitWindow(self.to_string())),
        }
    }
}

impl fmt::Display for ScalerFitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalerFitWindow::Estimation => f.write_str("estimation"),
            ScalerFitWindow::Full => f.write_str("full"),
        }
    }
}

/// Affine map `x -> (x - offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScale {
    pub offset: f64,
    pub scale: f64,
}

impl ColumnScale {
    pub const IDENTITY: ColumnScale = ColumnScale {
        offset: 0.0,
        scale: 1.0,
    };

    pub fn apply(&self, x: f64) -> f64 {
        (x - self.offset) / self.scale
    }

    pub fn invert(&self, z: f64) -> f64 {
        z * self.scale + self.offset
    }

    fn fit(kind: ScalerKind, values: &[f64]) -> ColumnScale {
        if values.is_empty() {
            return ColumnScale::IDENTITY;
        }
        let n = values.len() as f64;
        match kind {
            ScalerKind::None => ColumnScale::IDENTITY,
            ScalerKind::Standard => {
                let mean = values.iter().sum::<f64>() / n;
                let std = if values.len() > 1 {
                    (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
                } else {
                    0.0
                };
                ColumnScale {
                    offset: mean,
                    scale: nonzero(std),
                }
            }
            ScalerKind::MinMax => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                ColumnScale {
                    offset: min,
                    scale: nonzero(max - min),
                }
            }
        }
    }
}

fn nonzero(spread: f64) -> f64 {
    if spread.is_finite() && spread > f64::EPSILON {
        spread
    } else {
        1.0
    }
}

fn is_binary(values: &[f64]) -> bool {
    values.iter().all(|v| *v == 0.0 || *v == 1.0)
}

/// Scaling parameters for every feature column and the target of one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScaler {
    pub kind: ScalerKind,
    pub columns: Vec<ColumnScale>,
    pub target: ColumnScale,
}

impl FittedScaler {
    /// Fit on every row of `estimation`. Missing values are ignored.
    pub fn fit(kind: ScalerKind, estimation: &FeatureMatrix) -> Self {
        let columns = (0..estimation.n_cols())
            .map(|col| {
                let present: Vec<f64> = estimation.column(col).flatten().collect();
                if is_binary(&present) {
                    ColumnScale::IDENTITY
                } else {
                    ColumnScale::fit(kind, &present)
                }
            })
            .collect();
        let target: Vec<f64> = estimation.target.iter().flatten().copied().collect();
        Self {
            kind,
            columns,
            target: ColumnScale::fit(kind, &target),
        }
    }

    pub fn identity(n_cols: usize) -> Self {
        Self {
            kind: ScalerKind::None,
            columns: vec![ColumnScale::IDENTITY; n_cols],
            target: ColumnScale::IDENTITY,
        }
    }

    /// Scaled copy of `matrix` (features and target).
    pub fn transform(&self, matrix: &FeatureMatrix) -> FeatureMatrix {
        let values = matrix
            .values
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.columns)
                    .map(|(v, s)| v.map(|x| s.apply(x)))
                    .collect()
            })
            .collect();
        FeatureMatrix {
            index: matrix.index.clone(),
            columns: matrix.columns.clone(),
            values,
            target_name: matrix.target_name.clone(),
            target: matrix.target.iter().map(|v| v.map(|x| self.target.apply(x))).collect(),
            horizon: matrix.horizon,
        }
    }

    /// Map a forecast in scaled target units back to original units.
    /// Monotone, so quantile order is preserved.
    pub fn inverse_target(&self, z: f64) -> f64 {
        self.target.invert(z)
    }
}

//! ModelPipeline: one named estimator behind a uniform fit/predict contract.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use epflab_core::features::FeatureMatrix;

use super::forecast::{Forecast, ForecastKind, QuantileLevel};
use super::{
    Estimator, FitError, ModelError, ModelHandle, PointEstimator, QuantileEstimator, TrainingSet,
};

/// How often a model is refit across the folds of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reestimation {
    /// New fit (and scaler) on every fold.
    #[default]
    PerFold,
    /// Fit once on the first fold; reuse the handle and its scaler.
    Static,
    /// Refit on every n-th fold, reuse in between.
    EveryN(usize),
}

impl Reestimation {
    /// Index of the fold whose fit serves fold `index`.
    pub fn anchor(self, index: usize) -> usize {
        match self {
            Reestimation::PerFold => index,
            Reestimation::Static => 0,
            Reestimation::EveryN(n) => {
                let n = n.max(1);
                index - index % n
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelPipeline {
    name: String,
    estimator: Estimator,
}

impl ModelPipeline {
    pub fn new(name: impl Into<String>, estimator: Estimator) -> Self {
        Self {
            name: name.into(),
            estimator,
        }
    }

    pub fn deterministic(name: impl Into<String>, estimator: Arc<dyn PointEstimator>) -> Self {
        Self::new(name, Estimator::Deterministic(estimator))
    }

    pub fn probabilistic(name: impl Into<String>, estimator: Arc<dyn QuantileEstimator>) -> Self {
        Self::new(name, Estimator::Probabilistic(estimator))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ForecastKind {
        self.estimator.kind()
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Quantile levels of a probabilistic model; empty for point models.
    pub fn levels(&self) -> &[QuantileLevel] {
        match &self.estimator {
            Estimator::Deterministic(_) => &[],
            Estimator::Probabilistic(e) => e.levels(),
        }
    }

    /// Fit on the complete rows of `estimation`. Rows with any missing
    /// feature or a missing target are left out.
    pub fn fit(&self, estimation: &FeatureMatrix) -> Result<ModelHandle, FitError> {
        let (x, y) = estimation.complete_cases();
        let required = estimation.n_cols() + 1;
        if y.len() < required {
            return Err(FitError::InsufficientRows {
                rows: y.len(),
                required,
            });
        }
        let data = TrainingSet::new(&estimation.columns, &x, &y);
        debug!(model = %self.name, rows = data.rows(), cols = estimation.n_cols(), "fitting");

        let columns = estimation.columns.clone();
        Ok(match &self.estimator {
            Estimator::Deterministic(e) => ModelHandle::Deterministic {
                model: e.fit(&data)?,
                columns,
            },
            Estimator::Probabilistic(e) => ModelHandle::Probabilistic {
                model: e.fit(&data)?,
                columns,
            },
        })
    }

    /// Forecast every row of `prediction` on the path matching this
    /// pipeline's variant.
    pub fn predict(&self, handle: &ModelHandle, prediction: &FeatureMatrix) -> Result<Forecast, ModelError> {
        match self.kind() {
            ForecastKind::Deterministic => Ok(Forecast::Point {
                values: Self::predict_point(handle, prediction)?,
            }),
            ForecastKind::Probabilistic => {
                let (levels, values) = Self::predict_quantiles(handle, prediction)?;
                Ok(Forecast::Quantiles { levels, values })
            }
        }
    }

    /// Point path. A probabilistic handle is a [`ModelError::WrongVariant`].
    pub fn predict_point(handle: &ModelHandle, prediction: &FeatureMatrix) -> Result<Vec<Option<f64>>, ModelError> {
        let ModelHandle::Deterministic { model, columns } = handle else {
            return Err(ModelError::WrongVariant {
                expected: ForecastKind::Deterministic,
                found: handle.kind(),
            });
        };
        check_columns(columns, prediction)?;
        Ok((0..prediction.n_rows())
            .map(|row| {
                prediction
                    .complete_row(row)
                    .map(|x| model.predict_row(&x))
                    .filter(|v| v.is_finite())
            })
            .collect())
    }

    /// Quantile path. Values are sorted per row so levels never cross.
    #[allow(clippy::type_complexity)]
    pub fn predict_quantiles(
        handle: &ModelHandle,
        prediction: &FeatureMatrix,
    ) -> Result<(Vec<QuantileLevel>, Vec<Option<Vec<f64>>>), ModelError> {
        let ModelHandle::Probabilistic { model, columns } = handle else {
            return Err(ModelError::WrongVariant {
                expected: ForecastKind::Probabilistic,
                found: handle.kind(),
            });
        };
        check_columns(columns, prediction)?;
        let values = (0..prediction.n_rows())
            .map(|row| {
                let mut qs = model.predict_row(&prediction.complete_row(row)?);
                if qs.iter().any(|v| !v.is_finite()) {
                    return None;
                }
                qs.sort_by(f64::total_cmp);
                Some(qs)
            })
            .collect();
        Ok((model.levels().to_vec(), values))
    }
}

fn check_columns(expected: &[String], prediction: &FeatureMatrix) -> Result<(), ModelError> {
    if expected == prediction.columns.as_slice() {
        Ok(())
    } else {
        Err(ModelError::ColumnMismatch {
            expected: expected.to_vec(),
            found: prediction.columns.clone(),
        })
    }
}

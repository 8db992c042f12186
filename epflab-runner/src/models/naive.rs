//! Naive benchmark: echo one feature column as the forecast.
//!
//! With `price:lag7` this is the classic "same hour last week" benchmark.
//! The echoed column and the target are scaled independently, so pair this
//! estimator with `scaler = "none"`.

use std::sync::Arc;

use super::{FitError, PointEstimator, PointModel, TrainingSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naive {
    feature: String,
}

impl Naive {
    pub fn new(feature: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
        }
    }
}

impl PointEstimator for Naive {
    fn name(&self) -> &str {
        "naive"
    }

    fn fit(&self, data: &TrainingSet<'_>) -> Result<Arc<dyn PointModel>, FitError> {
        let column = data
            .columns
            .iter()
            .position(|c| *c == self.feature)
            .ok_or_else(|| FitError::UnknownColumn(self.feature.clone()))?;
        Ok(Arc::new(NaiveModel { column }))
    }
}

#[derive(Debug, Clone, Copy)]
struct NaiveModel {
    column: usize,
}

impl PointModel for NaiveModel {
    fn predict_row(&self, x: &[f64]) -> f64 {
        x.get(self.column).copied().unwrap_or(f64::NAN)
    }
}

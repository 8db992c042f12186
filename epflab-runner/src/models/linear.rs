//! Ordinary least squares and ridge regression.

use std::sync::Arc;

use super::linalg::{least_squares, LinearFit};
use super::{FitError, PointEstimator, PointModel, TrainingSet};

/// Linear regression with intercept. `lambda = 0` is OLS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRegression {
    lambda: f64,
}

impl LinearRegression {
    pub fn ols() -> Self {
        Self { lambda: 0.0 }
    }

    /// Ridge penalty on every coefficient except the intercept.
    pub fn ridge(lambda: f64) -> Self {
        Self { lambda: lambda.max(0.0) }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl PointEstimator for LinearRegression {
    fn name(&self) -> &str {
        if self.lambda > 0.0 {
            "ridge"
        } else {
            "ols"
        }
    }

    fn fit(&self, data: &TrainingSet<'_>) -> Result<Arc<dyn PointModel>, FitError> {
        let fit = least_squares(data.x, data.y, None, self.lambda)?;
        Ok(Arc::new(LinearModel(fit)))
    }
}

#[derive(Debug, Clone)]
pub struct LinearModel(pub LinearFit);

impl PointModel for LinearModel {
    fn predict_row(&self, x: &[f64]) -> f64 {
        self.0.predict(x)
    }
}

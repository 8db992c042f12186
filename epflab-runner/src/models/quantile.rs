//! Probabilistic estimators producing one value per quantile level.
//!
//! - [`QuantileRegression`]: linear quantile regression, one coefficient
//!   vector per level, fit by iteratively reweighted least squares.
//! - [`ResidualQuantiles`]: any point estimator plus empirical quantiles of
//!   its in-sample residuals (a split-free conformal band).

use std::sync::Arc;
use tracing::debug;

use super::forecast::QuantileLevel;
use super::linalg::{least_squares, LinearFit};
use super::{FitError, PointEstimator, PointModel, QuantileEstimator, QuantileModel, TrainingSet};

/// Floor on |residual| in the IRLS weights, so exact fits do not divide by zero.
const IRLS_EPSILON: f64 = 1e-6;

// ─── Linear quantile regression ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct QuantileRegression {
    levels: Vec<QuantileLevel>,
    max_iter: usize,
    tolerance: f64,
}

impl QuantileRegression {
    pub fn new(levels: Vec<QuantileLevel>) -> Self {
        let mut levels = levels;
        levels.sort();
        levels.dedup();
        Self {
            levels,
            max_iter: 100,
            tolerance: 1e-8,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    fn fit_level(&self, data: &TrainingSet<'_>, tau: f64) -> Result<LinearFit, FitError> {
        let mut fit = least_squares(data.x, data.y, None, 0.0)?;
        let mut weights = vec![1.0; data.y.len()];

        for iteration in 0..self.max_iter {
            for (w, (row, y)) in weights.iter_mut().zip(data.x.iter().zip(data.y)) {
                let r = y - fit.predict(row);
                let side = if r >= 0.0 { tau } else { 1.0 - tau };
                *w = side / r.abs().max(IRLS_EPSILON);
            }
            let next = least_squares(data.x, data.y, Some(&weights), 0.0)?;
            let change = std::iter::once((next.intercept - fit.intercept).abs())
                .chain(next.coef.iter().zip(&fit.coef).map(|(a, b)| (a - b).abs()))
                .fold(0.0_f64, f64::max);
            fit = next;
            if change < self.tolerance {
                debug!(tau, iteration, "quantile regression converged");
                break;
            }
        }

        if fit.intercept.is_finite() && fit.coef.iter().all(|c| c.is_finite()) {
            Ok(fit)
        } else {
            Err(FitError::NonConvergence {
                iterations: self.max_iter,
            })
        }
    }
}

impl QuantileEstimator for QuantileRegression {
    fn name(&self) -> &str {
        "quantile_regression"
    }

    fn levels(&self) -> &[QuantileLevel] {
        &self.levels
    }

    fn fit(&self, data: &TrainingSet<'_>) -> Result<Arc<dyn QuantileModel>, FitError> {
        let fits = self
            .levels
            .iter()
            .map(|level| self.fit_level(data, level.value()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(QuantileRegressionModel {
            levels: self.levels.clone(),
            fits,
        }))
    }
}

#[derive(Debug, Clone)]
struct QuantileRegressionModel {
    levels: Vec<QuantileLevel>,
    fits: Vec<LinearFit>,
}

impl QuantileModel for QuantileRegressionModel {
    fn levels(&self) -> &[QuantileLevel] {
        &self.levels
    }

    fn predict_row(&self, x: &[f64]) -> Vec<f64> {
        self.fits.iter().map(|fit| fit.predict(x)).collect()
    }
}

// ─── Residual quantiles ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResidualQuantiles {
    base: Arc<dyn PointEstimator>,
    levels: Vec<QuantileLevel>,
}

impl ResidualQuantiles {
    pub fn new(base: Arc<dyn PointEstimator>, levels: Vec<QuantileLevel>) -> Self {
        let mut levels = levels;
        levels.sort();
        levels.dedup();
        Self { base, levels }
    }
}

impl QuantileEstimator for ResidualQuantiles {
    fn name(&self) -> &str {
        "residual_quantiles"
    }

    fn levels(&self) -> &[QuantileLevel] {
        &self.levels
    }

    fn fit(&self, data: &TrainingSet<'_>) -> Result<Arc<dyn QuantileModel>, FitError> {
        let base = self.base.fit(data)?;
        let mut residuals: Vec<f64> = data
            .x
            .iter()
            .zip(data.y)
            .map(|(row, y)| y - base.predict_row(row))
            .collect();
        if residuals.iter().any(|r| !r.is_finite()) {
            return Err(FitError::NonFinite);
        }
        residuals.sort_by(f64::total_cmp);
        let offsets = self
            .levels
            .iter()
            .map(|level| empirical_quantile(&residuals, level.value()))
            .collect();
        Ok(Arc::new(ResidualQuantileModel {
            base,
            levels: self.levels.clone(),
            offsets,
        }))
    }
}

#[derive(Debug)]
struct ResidualQuantileModel {
    base: Arc<dyn PointModel>,
    levels: Vec<QuantileLevel>,
    offsets: Vec<f64>,
}

impl QuantileModel for ResidualQuantileModel {
    fn levels(&self) -> &[QuantileLevel] {
        &self.levels
    }

    fn predict_row(&self, x: &[f64]) -> Vec<f64> {
        let centre = self.base.predict_row(x);
        self.offsets.iter().map(|o| centre + o).collect()
    }
}

/// Linearly interpolated quantile of sorted, non-empty `values`.
pub fn empirical_quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

//! Model layer: capability traits, fitted handles and the model pipeline.
//!
//! Estimators come in two capabilities. A [`PointEstimator`] fits a
//! [`PointModel`] producing one value per row; a [`QuantileEstimator`] fits a
//! [`QuantileModel`] producing one value per configured quantile level. New
//! estimators implement one of the traits and plug into [`ModelPipeline`]
//! without touching evaluation code.

pub mod forecast;
pub mod linalg;
pub mod linear;
pub mod naive;
pub mod pipeline;
pub mod quantile;

pub use forecast::{Forecast, ForecastKind, QuantileLevel};
pub use linear::LinearRegression;
pub use naive::Naive;
pub use pipeline::{ModelPipeline, Reestimation};
pub use quantile::{QuantileRegression, ResidualQuantiles};

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Fitting failed. Local to one model and fold: the fold is skipped for that
/// model, the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FitError {
    #[error("{rows} complete row(s), need at least {required}")]
    InsufficientRows { rows: usize, required: usize },

    #[error("design matrix is singular")]
    SingularDesign,

    #[error("no convergence after {iterations} iteration(s)")]
    NonConvergence { iterations: usize },

    #[error("fit produced non-finite coefficients")]
    NonFinite,

    #[error("feature column '{0}' not in the estimation matrix")]
    UnknownColumn(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("handle is {found}, but the {expected} predict path was called")]
    WrongVariant {
        expected: ForecastKind,
        found: ForecastKind,
    },

    #[error("prediction columns {found:?} differ from the fitted columns {expected:?}")]
    ColumnMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("quantile level {0} is not strictly between 0 and 1")]
    InvalidQuantile(f64),
}

/// Complete estimation rows handed to an estimator.
#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    pub columns: &'a [String],
    pub x: &'a [Vec<f64>],
    pub y: &'a [f64],
}

impl<'a> TrainingSet<'a> {
    pub fn new(columns: &'a [String], x: &'a [Vec<f64>], y: &'a [f64]) -> Self {
        Self { columns, x, y }
    }

    pub fn rows(&self) -> usize {
        self.y.len()
    }
}

// ─── Capabilities ────────────────────────────────────────────────────

pub trait PointEstimator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn fit(&self, data: &TrainingSet<'_>) -> Result<Arc<dyn PointModel>, FitError>;
}

pub trait PointModel: Send + Sync + fmt::Debug {
    /// Forecast for one complete feature row.
    fn predict_row(&self, x: &[f64]) -> f64;
}

pub trait QuantileEstimator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Sorted, distinct levels every fitted model predicts.
    fn levels(&self) -> &[QuantileLevel];

    fn fit(&self, data: &TrainingSet<'_>) -> Result<Arc<dyn QuantileModel>, FitError>;
}

pub trait QuantileModel: Send + Sync + fmt::Debug {
    fn levels(&self) -> &[QuantileLevel];

    /// One value per level, in level order. May cross; the pipeline sorts.
    fn predict_row(&self, x: &[f64]) -> Vec<f64>;
}

/// An estimator tagged with its capability.
#[derive(Debug, Clone)]
pub enum Estimator {
    Deterministic(Arc<dyn PointEstimator>),
    Probabilistic(Arc<dyn QuantileEstimator>),
}

impl Estimator {
    pub fn kind(&self) -> ForecastKind {
        match self {
            Estimator::Deterministic(_) => ForecastKind::Deterministic,
            Estimator::Probabilistic(_) => ForecastKind::Probabilistic,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Estimator::Deterministic(e) => e.name(),
            Estimator::Probabilistic(e) => e.name(),
        }
    }
}

/// A fitted model, tagged with the variant it was produced as and the
/// feature columns it was fit on. Cheap to clone; shared when a fit is
/// reused across folds.
#[derive(Debug, Clone)]
pub enum ModelHandle {
    Deterministic {
        model: Arc<dyn PointModel>,
        columns: Vec<String>,
    },
    Probabilistic {
        model: Arc<dyn QuantileModel>,
        columns: Vec<String>,
    },
}

impl ModelHandle {
    pub fn kind(&self) -> ForecastKind {
        match self {
            ModelHandle::Deterministic { .. } => ForecastKind::Deterministic,
            ModelHandle::Probabilistic { .. } => ForecastKind::Probabilistic,
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            ModelHandle::Deterministic { columns, .. } | ModelHandle::Probabilistic { columns, .. } => columns,
        }
    }
}

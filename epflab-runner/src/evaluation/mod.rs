//! Evaluation layer: fold plans, fold lifecycle, scoring, walk-forward
//! execution and cross-fold aggregation.

pub mod aggregate;
pub mod breakdown;
pub mod folds;
pub mod metrics;
pub mod state;
pub mod walk_forward;

pub use aggregate::{aggregate, AggregateScore};
pub use breakdown::{by_hour, by_year, BreakdownKey, BreakdownRow, PredictionRecord};
pub use folds::{Fold, FoldError, FoldIter, FoldPlan, WindowKind};
pub use metrics::{Metric, ScoreRecord};
pub use state::{FoldState, FoldStatus};
pub use walk_forward::{Evaluation, EvaluationError, EvaluationPipeline, FoldOutcome};

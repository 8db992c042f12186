//! EPF Lab Runner: model pipeline, walk-forward evaluation, run orchestration.
//!
//! This crate builds on `epflab-core` to provide:
//! - TOML run configuration with fail-fast validation and fingerprinting
//! - Point and quantile estimators behind one fit/predict contract
//! - Restartable fold plans and a checked per-fold state machine
//! - Parallel walk-forward evaluation with cooperative cancellation
//! - Point and pinball metrics, cross-fold aggregation, calendar breakdowns
//! - The `Orchestrator` tying data, features, models and evaluation together

pub mod config;
pub mod evaluation;
pub mod models;
pub mod orchestrator;

pub use config::{ConfigError, ModelConfig, ModelKind, RunConfig};
pub use evaluation::{
    aggregate, AggregateScore, BreakdownRow, Evaluation, EvaluationError, EvaluationPipeline, Fold, FoldError,
    FoldOutcome, FoldPlan, FoldStatus, Metric, PredictionRecord, ScoreRecord, WindowKind,
};
pub use models::{
    Estimator, FitError, Forecast, ForecastKind, ModelError, ModelHandle, ModelPipeline, PointEstimator,
    PointModel, QuantileEstimator, QuantileLevel, QuantileModel, Reestimation,
};
pub use orchestrator::{Orchestrator, RunError, RunReport};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<ModelConfig>();
        assert_sync::<ModelConfig>();
    }

    #[test]
    fn model_types_are_send_sync() {
        assert_send::<ModelPipeline>();
        assert_sync::<ModelPipeline>();
        assert_send::<ModelHandle>();
        assert_sync::<ModelHandle>();
        assert_send::<Forecast>();
        assert_sync::<Forecast>();
    }

    #[test]
    fn evaluation_types_are_send_sync() {
        assert_send::<FoldPlan>();
        assert_sync::<FoldPlan>();
        assert_send::<EvaluationPipeline>();
        assert_sync::<EvaluationPipeline>();
        assert_send::<ScoreRecord>();
        assert_sync::<ScoreRecord>();
    }

    #[test]
    fn orchestrator_is_send_sync() {
        assert_send::<Orchestrator>();
        assert_sync::<Orchestrator>();
        assert_send::<RunReport>();
        assert_sync::<RunReport>();
    }

    // ── Capability traits must stay object-safe ──

    #[test]
    fn estimator_traits_are_object_safe() {
        fn _point(_: &dyn PointEstimator) {}
        fn _quantile(_: &dyn QuantileEstimator) {}
        fn _point_model(_: &dyn PointModel) {}
        fn _quantile_model(_: &dyn QuantileModel) {}
    }
}

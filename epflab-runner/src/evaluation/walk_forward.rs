//! Walk-forward (rolling-origin) evaluation.
//!
//! Folds are split into re-estimation groups: with per-fold re-estimation
//! every fold is its own group; with static or every-n re-estimation a group
//! is the anchor fold plus the folds that reuse its fit. Groups (per
//! horizon) are independent once their matrices are built and run on a
//! rayon pool; inside a group folds run in order, and models fan out in
//! parallel within each fold.
//!
//! A failure confined to one fold or model (feature window empty, fit
//! failure, wrong predict path) skips that unit with `None` scores. Only
//! an invalid fold plan or an illegal state transition aborts the run.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use epflab_core::data::AlignedFrame;
use epflab_core::features::{FeaturePipeline, FittedScaler, FoldMatrices};

use super::breakdown::PredictionRecord;
use super::folds::{Fold, FoldError, FoldPlan};
use super::metrics::{self, Metric, ScoreRecord};
use super::state::{FoldState, FoldStatus};
use crate::models::{FitError, Forecast, ModelHandle, ModelPipeline, Reestimation};

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Fold(#[from] FoldError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

// ─── Results ─────────────────────────────────────────────────────────

/// Terminal status of one (model, fold, horizon) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub model: String,
    pub fold_id: usize,
    pub horizon: u32,
    pub status: FoldStatus,
    /// Why the unit was skipped.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub folds: Vec<Fold>,
    pub records: Vec<ScoreRecord>,
    pub outcomes: Vec<FoldOutcome>,
    pub predictions: Vec<PredictionRecord>,
    /// True when cancellation stopped at least one fold from launching.
    pub cancelled: bool,
}

impl Evaluation {
    fn absorb(&mut self, other: Evaluation) {
        self.records.extend(other.records);
        self.outcomes.extend(other.outcomes);
        self.predictions.extend(other.predictions);
        self.cancelled |= other.cancelled;
    }

    pub fn count(&self, status: FoldStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EvaluationPipeline {
    plan: FoldPlan,
    reestimation: Reestimation,
    max_workers: Option<usize>,
}

impl EvaluationPipeline {
    pub fn new(plan: FoldPlan, reestimation: Reestimation) -> Self {
        Self {
            plan,
            reestimation,
            max_workers: None,
        }
    }

    /// Bound the worker pool. `None` uses the global rayon pool; `Some(1)`
    /// runs everything on the calling thread.
    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn plan(&self) -> &FoldPlan {
        &self.plan
    }

    /// Evaluate every model on every fold and horizon.
    ///
    /// `cancel` stops new folds from launching; folds already running finish
    /// and keep their scores. Folds that never launched are reported as
    /// [`FoldStatus::Cancelled`].
    pub fn run(
        &self,
        frame: &AlignedFrame,
        features: &FeaturePipeline,
        models: &[ModelPipeline],
        cancel: Option<&AtomicBool>,
    ) -> Result<Evaluation, EvaluationError> {
        let folds = self.plan.collect()?;
        let groups = reestimation_groups(&folds, self.reestimation);
        let units: Vec<(u32, &[Fold])> = features
            .horizons()
            .into_iter()
            .flat_map(|h| groups.iter().map(move |g| (h, *g)))
            .collect();
        info!(
            folds = folds.len(),
            groups = groups.len(),
            horizons = units.len() / groups.len().max(1),
            models = models.len(),
            "starting walk-forward evaluation"
        );

        let run_unit = |&(horizon, group): &(u32, &[Fold])| {
            run_group(frame, features, models, horizon, group, cancel)
        };
        let results: Vec<Result<Evaluation, FoldError>> = match self.max_workers {
            Some(1) => units.iter().map(run_unit).collect(),
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| EvaluationError::ThreadPool(e.to_string()))?;
                pool.install(|| units.par_iter().map(run_unit).collect())
            }
            None => units.par_iter().map(run_unit).collect(),
        };

        let mut evaluation = Evaluation {
            folds,
            ..Evaluation::default()
        };
        for result in results {
            evaluation.absorb(result?);
        }
        // Stable sorts keep model order within a fold.
        evaluation.records.sort_by_key(|r| (r.horizon, r.fold_id));
        evaluation.outcomes.sort_by_key(|o| (o.horizon, o.fold_id));
        evaluation.predictions.sort_by_key(|p| (p.horizon, p.fold_id));

        info!(
            scored = evaluation.count(FoldStatus::Scored),
            skipped = evaluation.count(FoldStatus::Skipped),
            cancelled = evaluation.count(FoldStatus::Cancelled),
            "walk-forward evaluation finished"
        );
        Ok(evaluation)
    }
}

/// Split folds into runs sharing the same anchor fold.
fn reestimation_groups(folds: &[Fold], policy: Reestimation) -> Vec<&[Fold]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in 1..=folds.len() {
        if i == folds.len() || policy.anchor(i) != policy.anchor(start) {
            groups.push(&folds[start..i]);
            start = i;
        }
    }
    groups
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Fit reused by the later folds of a group.
struct Anchor {
    scaler: FittedScaler,
    handles: Vec<Result<ModelHandle, FitError>>,
}

fn run_group(
    frame: &AlignedFrame,
    features: &FeaturePipeline,
    models: &[ModelPipeline],
    horizon: u32,
    group: &[Fold],
    cancel: Option<&AtomicBool>,
) -> Result<Evaluation, FoldError> {
    let mut out = Evaluation::default();
    let mut anchor: Option<Anchor> = None;

    for (pos, fold) in group.iter().enumerate() {
        if is_cancelled(cancel) {
            for fold in &group[pos..] {
                for model in models {
                    let mut state = FoldState::new(fold.id);
                    state.advance(FoldStatus::Cancelled)?;
                    out.outcomes.push(outcome(model, fold, horizon, state.status(), None));
                }
            }
            out.cancelled = true;
            debug!(horizon, first = fold.id, "cancelled before launch");
            break;
        }

        let prepared = match &anchor {
            None => features.prepare_fold(frame, horizon, fold.estimation, fold.prediction),
            Some(a) => features.prepare_fold_reusing(frame, horizon, fold.estimation, fold.prediction, &a.scaler),
        };
        let matrices = match prepared {
            Ok(m) => m,
            Err(e) => {
                warn!(fold = fold.id, horizon, error = %e, "fold skipped: feature preparation failed");
                for model in models {
                    let mut state = FoldState::new(fold.id);
                    state.advance(FoldStatus::Estimating)?;
                    state.advance(FoldStatus::Skipped)?;
                    out.records.extend(missing_scores(model, fold, horizon));
                    out.outcomes
                        .push(outcome(model, fold, horizon, state.status(), Some(e.to_string())));
                }
                continue;
            }
        };

        let reused = anchor.as_ref().map(|a| a.handles.as_slice());
        let results: Vec<(Result<ModelHandle, FitError>, Evaluation)> = models
            .par_iter()
            .enumerate()
            .map(|(i, model)| {
                let handle = match reused {
                    Some(handles) => handles[i].clone(),
                    None => model.fit(&matrices.estimation),
                };
                let unit = evaluate_model(model, &handle, &matrices, fold, horizon)?;
                Ok((handle, unit))
            })
            .collect::<Result<_, FoldError>>()?;

        let mut handles = Vec::with_capacity(results.len());
        for (handle, unit) in results {
            handles.push(handle);
            out.absorb(unit);
        }
        if anchor.is_none() {
            anchor = Some(Anchor {
                scaler: matrices.scaler,
                handles,
            });
        }
    }
    Ok(out)
}

/// Estimate → predict → score one model on one fold.
fn evaluate_model(
    model: &ModelPipeline,
    handle: &Result<ModelHandle, FitError>,
    matrices: &FoldMatrices,
    fold: &Fold,
    horizon: u32,
) -> Result<Evaluation, FoldError> {
    let mut out = Evaluation::default();
    let mut state = FoldState::new(fold.id);
    state.advance(FoldStatus::Estimating)?;

    let skip = |state: &mut FoldState, out: &mut Evaluation, reason: String| -> Result<(), FoldError> {
        warn!(model = model.name(), fold = fold.id, horizon, %reason, "fold skipped");
        state.advance(FoldStatus::Skipped)?;
        out.records.extend(missing_scores(model, fold, horizon));
        out.outcomes
            .push(outcome(model, fold, horizon, state.status(), Some(reason)));
        Ok(())
    };

    let handle = match handle {
        Ok(h) => h,
        Err(e) => {
            skip(&mut state, &mut out, format!("fit failed: {e}"))?;
            return Ok(out);
        }
    };

    state.advance(FoldStatus::Predicting)?;
    let forecast = match model.predict(handle, &matrices.prediction) {
        Ok(f) => f.map_values(|z| matrices.scaler.inverse_target(z)),
        Err(e) => {
            skip(&mut state, &mut out, format!("predict failed: {e}"))?;
            return Ok(out);
        }
    };

    for (metric, value) in metrics::score(&forecast, &matrices.actuals) {
        out.records.push(ScoreRecord {
            model: model.name().to_string(),
            fold_id: fold.id,
            horizon,
            metric,
            value,
        });
    }
    out.predictions.extend(prediction_records(model, fold, horizon, matrices, &forecast));
    state.advance(FoldStatus::Scored)?;
    out.outcomes.push(outcome(model, fold, horizon, state.status(), None));
    Ok(out)
}

fn missing_scores<'a>(model: &'a ModelPipeline, fold: &'a Fold, horizon: u32) -> impl Iterator<Item = ScoreRecord> + 'a {
    Metric::for_levels(model.levels()).into_iter().map(move |metric| ScoreRecord {
        model: model.name().to_string(),
        fold_id: fold.id,
        horizon,
        metric,
        value: None,
    })
}

fn outcome(model: &ModelPipeline, fold: &Fold, horizon: u32, status: FoldStatus, reason: Option<String>) -> FoldOutcome {
    FoldOutcome {
        model: model.name().to_string(),
        fold_id: fold.id,
        horizon,
        status,
        reason,
    }
}

fn prediction_records(
    model: &ModelPipeline,
    fold: &Fold,
    horizon: u32,
    matrices: &FoldMatrices,
    forecast: &Forecast,
) -> Vec<PredictionRecord> {
    let point = forecast.point();
    let quantiles: Vec<Option<Vec<f64>>> = match forecast {
        Forecast::Point { values } => vec![None; values.len()],
        Forecast::Quantiles { values, .. } => values.clone(),
    };
    matrices
        .prediction
        .index
        .iter()
        .zip(&matrices.actuals)
        .zip(point.into_iter().zip(quantiles))
        .map(|((ts, actual), (point, quantiles))| PredictionRecord {
            model: model.name().to_string(),
            fold_id: fold.id,
            horizon,
            ts: *ts,
            actual: *actual,
            point,
            quantiles,
        })
        .collect()
}

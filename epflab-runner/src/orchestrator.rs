//! Orchestrator: DataPipeline → FeaturePipeline → ModelPipeline →
//! EvaluationPipeline for one run.
//!
//! Everything that can fail without data (config validation, spec parsing,
//! leakage guards, model construction) fails in [`Orchestrator::new`], before
//! any source is called. Each orchestrator owns its cache unless a shared
//! one is passed explicitly.

use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use epflab_core::data::{
    Cache, CacheStats, ColumnProfile, DataPipeline, DataPipelineError, DataSource, ParquetStore, ValidationIssue,
};
use epflab_core::domain::EntityId;
use epflab_core::features::{FeatureError, FeaturePipeline};
use epflab_core::fingerprint::{ContentHash, RunId};

use crate::config::{ConfigError, RunConfig};
use crate::evaluation::{
    aggregate, by_hour, by_year, AggregateScore, BreakdownRow, EvaluationError, EvaluationPipeline, Fold, FoldOutcome,
    FoldStatus, Metric, PredictionRecord, ScoreRecord,
};
use crate::models::ModelPipeline;

/// Fatal errors. Anything confined to one fold or model is recorded in the
/// report instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("data pipeline failed: {0}")]
    Data(#[from] DataPipelineError),

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub dataset_hash: String,
    pub folds: Vec<Fold>,
    /// Mean ± std per (model, horizon, metric).
    pub aggregates: Vec<AggregateScore>,
    /// Raw per-fold scores, `None` for skipped folds.
    pub records: Vec<ScoreRecord>,
    pub outcomes: Vec<FoldOutcome>,
    pub predictions: Vec<PredictionRecord>,
    pub by_hour: Vec<BreakdownRow>,
    pub by_year: Vec<BreakdownRow>,
    pub validation_warnings: Vec<ValidationIssue>,
    pub profiles: Vec<ColumnProfile>,
    /// Entities served from stale cache after a failed fetch.
    pub stale_entities: Vec<EntityId>,
    /// Optional entities left out, with the reason.
    pub dropped_entities: Vec<(EntityId, String)>,
    pub cancelled: bool,
    pub cache_stats: CacheStats,
}

impl RunReport {
    pub fn aggregate_for(&self, model: &str, horizon: u32, metric: Metric) -> Option<&AggregateScore> {
        self.aggregates
            .iter()
            .find(|a| a.model == model && a.horizon == horizon && a.metric == metric)
    }

    pub fn records_for<'a>(&'a self, model: &'a str, metric: Metric) -> impl Iterator<Item = &'a ScoreRecord> {
        self.records
            .iter()
            .filter(move |r| r.model == model && r.metric == metric)
    }

    pub fn count(&self, status: FoldStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub struct Orchestrator {
    config: RunConfig,
    config_hash: ContentHash,
    sources: Vec<Arc<dyn DataSource>>,
    features: FeaturePipeline,
    models: Vec<ModelPipeline>,
    cache: Arc<Cache>,
}

impl Orchestrator {
    /// Validate `config` and build every pipeline stage. No source is
    /// called here.
    pub fn new(config: RunConfig, sources: Vec<Arc<dyn DataSource>>) -> Result<Self, RunError> {
        config.validate()?;
        if sources.is_empty() {
            return Err(DataPipelineError::NoSources.into());
        }
        let features = FeaturePipeline::new(config.feature_config()?)?;
        let models = config.build_models()?;
        let config_hash = config.config_hash()?;

        let mut cache = Cache::new(config.cache_ttl());
        if let Some(dir) = &config.cache_dir {
            cache = cache.with_persistence(ParquetStore::new(dir));
        }

        Ok(Self {
            config,
            config_hash,
            sources,
            features,
            models,
            cache: Arc::new(cache),
        })
    }

    /// Share `cache` with other orchestrators instead of owning one.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn models(&self) -> &[ModelPipeline] {
        &self.models
    }

    pub fn run(&self) -> Result<RunReport, RunError> {
        self.execute(None)
    }

    /// Like [`run`](Self::run), but stops launching folds once `cancel` is
    /// set. Folds in flight finish and keep their scores.
    pub fn run_with_cancel(&self, cancel: &AtomicBool) -> Result<RunReport, RunError> {
        self.execute(Some(cancel))
    }

    fn execute(&self, cancel: Option<&AtomicBool>) -> Result<RunReport, RunError> {
        let config = &self.config;
        info!(config = self.config_hash.short(), "starting run");

        let pipeline = self
            .sources
            .iter()
            .fold(DataPipeline::new(Arc::clone(&self.cache)), |p, s| p.add_source(Arc::clone(s)))
            .with_validation(config.validation_policy())
            .with_fetch_timeout(config.fetch_timeout())
            .with_frequency(config.frequency)
            .with_timezone(config.timezone);
        let build = pipeline.build(&config.entity_requests(), config.time_range()?)?;
        for warning in &build.report.warnings {
            info!(%warning, "data validation warning");
        }

        let evaluation = EvaluationPipeline::new(config.fold_plan(), config.reestimation())
            .with_max_workers(config.max_workers)
            .run(&build.frame, &self.features, &self.models, cancel)?;

        let dataset_hash = build.dataset_hash();
        let run_id = RunId::new(self.config_hash.clone(), ContentHash(dataset_hash.clone()));
        let aggregates = aggregate(&evaluation.records);
        let tz = build.frame.timezone;

        let report = RunReport {
            run_id,
            dataset_hash,
            by_hour: by_hour(&evaluation.predictions, tz),
            by_year: by_year(&evaluation.predictions, tz),
            folds: evaluation.folds,
            aggregates,
            records: evaluation.records,
            outcomes: evaluation.outcomes,
            predictions: evaluation.predictions,
            validation_warnings: build.report.warnings,
            profiles: build.report.profiles,
            stale_entities: build.stale_entities,
            dropped_entities: build.dropped,
            cancelled: evaluation.cancelled,
            cache_stats: self.cache.stats(),
        };
        info!(
            run_id = %report.run_id,
            folds = report.folds.len(),
            scored = report.count(FoldStatus::Scored),
            skipped = report.count(FoldStatus::Skipped),
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }
}

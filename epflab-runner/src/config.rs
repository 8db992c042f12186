//! Serializable run configuration.
//!
//! One TOML document describes a whole benchmark run:
//!
//! ```toml
//! entities = ["price", "load"]
//! target = "price"
//! start = "2023-01-01T00:00:00Z"
//! end = "2024-02-05T00:00:00Z"
//! frequency = "1d"
//! feature_specs = ["price:lag7", "load:lag1"]
//! calendar = ["dow", "holiday"]
//! fold_estimation_length = 300
//! fold_prediction_length = 20
//! fold_step = 20
//!
//! [missing_data_policy]
//! policy = "interpolate"
//! method = "ffill"
//! max_gap = 3
//!
//! [[models]]
//! name = "ols"
//! type = "ols"
//!
//! [[models]]
//! name = "qr"
//! type = "quantile_regression"
//! quantiles = [0.1, 0.5, 0.9]
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use epflab_core::data::{EntityRequest, MissingDataPolicy, ValidationPolicy, ValueBounds};
use epflab_core::domain::{EntityId, Frequency, RangeError, TimeRange, TimeZoneTag};
use epflab_core::features::{
    CalendarFeature, FeatureConfig, FeatureError, FeatureSpec, HolidayCalendar, ScalerFitWindow, ScalerKind,
};
use epflab_core::fingerprint::ContentHash;

use crate::evaluation::{FoldPlan, WindowKind};
use crate::models::{
    LinearRegression, ModelPipeline, Naive, PointEstimator, QuantileLevel, QuantileRegression,
    Reestimation, ResidualQuantiles,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse run config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid time range: {0}")]
    Range(#[from] RangeError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error("no entities requested")]
    NoEntities,

    #[error("entity '{0}' listed more than once")]
    DuplicateEntity(String),

    #[error("target '{0}' is not a required entity")]
    TargetNotRequested(String),

    #[error("feature '{spec}' reads '{entity}', which is not a required entity")]
    FeatureEntity { spec: String, entity: String },

    #[error("no models configured")]
    NoModels,

    #[error("model name '{0}' used more than once")]
    DuplicateModel(String),

    #[error("model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("severity_threshold {0} must be in [0, 1]")]
    InvalidThreshold(f64),

    #[error("failed to fingerprint config: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

// ─── Run config ──────────────────────────────────────────────────────

/// Serializable configuration for one benchmark run.
///
/// Map-valued fields are `BTreeMap` so the fingerprint is independent of
/// key order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Required entities; a missing one is fatal.
    pub entities: Vec<String>,

    /// Entities loaded when available, dropped with a warning otherwise.
    #[serde(default)]
    pub optional_entities: Vec<String>,

    /// Entity being forecast. Must be one of `entities`.
    pub target: String,

    /// Start of the data range (inclusive).
    pub start: DateTime<Utc>,

    /// End of the data range (exclusive).
    pub end: DateTime<Utc>,

    #[serde(default = "default_frequency")]
    pub frequency: Frequency,

    #[serde(default)]
    pub timezone: TimeZoneTag,

    /// Lag feature specs, e.g. `"price:lag7"` or `"load:d-2:h2:mean24"`.
    #[serde(default)]
    pub feature_specs: Vec<String>,

    /// Calendar features, e.g. `"hour"`, `"dow"`, `"holiday"`, `"dow=sat"`.
    #[serde(default)]
    pub calendar: Vec<String>,

    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    #[serde(default)]
    pub scaler: ScalerKind,

    #[serde(default)]
    pub scaler_fit_window: ScalerFitWindow,

    pub models: Vec<ModelConfig>,

    pub fold_estimation_length: usize,

    pub fold_prediction_length: usize,

    pub fold_step: usize,

    #[serde(default)]
    pub window: WindowKind,

    #[serde(default)]
    pub max_folds: Option<usize>,

    /// `false` fits once on the first fold and reuses the model.
    #[serde(default = "default_true")]
    pub reestimate_per_fold: bool,

    /// Refit every n-th fold. Takes precedence over `reestimate_per_fold`.
    #[serde(default)]
    pub reestimate_every: Option<usize>,

    #[serde(default)]
    pub missing_data_policy: MissingDataPolicy,

    /// Inclusive value bounds per entity.
    #[serde(default)]
    pub bounds: BTreeMap<String, ValueBounds>,

    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: f64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Directory for Parquet cache snapshots. In-memory only when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Worker threads for fold dispatch. Global rayon pool when unset.
    #[serde(default)]
    pub max_workers: Option<usize>,
}

fn default_frequency() -> Frequency {
    Frequency::Hourly
}

fn default_true() -> bool {
    true
}

fn default_severity_threshold() -> f64 {
    0.1
}

fn default_cache_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl RunConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Check everything that can be checked without data. Leakage guards
    /// run here, so a leaking configuration never reaches a fold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entities.is_empty() {
            return Err(ConfigError::NoEntities);
        }
        let mut seen = HashSet::new();
        for e in self.entities.iter().chain(&self.optional_entities) {
            if !seen.insert(e.as_str()) {
                return Err(ConfigError::DuplicateEntity(e.clone()));
            }
        }
        if !self.entities.contains(&self.target) {
            return Err(ConfigError::TargetNotRequested(self.target.clone()));
        }
        self.time_range()?;

        let features = self.feature_config()?;
        for spec in &features.specs {
            if !self.entities.iter().any(|e| e == spec.entity().as_str()) {
                return Err(ConfigError::FeatureEntity {
                    spec: spec.to_string(),
                    entity: spec.entity().to_string(),
                });
            }
        }
        epflab_core::features::FeaturePipeline::new(features)?;

        for (field, value) in [
            ("fold_estimation_length", self.fold_estimation_length),
            ("fold_prediction_length", self.fold_prediction_length),
            ("fold_step", self.fold_step),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.max_folds == Some(0) {
            return Err(ConfigError::Zero { field: "max_folds" });
        }
        if self.reestimate_every == Some(0) {
            return Err(ConfigError::Zero {
                field: "reestimate_every",
            });
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::Zero { field: "max_workers" });
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Zero { field: "cache_ttl_secs" });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "fetch_timeout_secs",
            });
        }
        if !(0.0..=1.0).contains(&self.severity_threshold) {
            return Err(ConfigError::InvalidThreshold(self.severity_threshold));
        }

        self.build_models()?;
        Ok(())
    }

    /// BLAKE3 fingerprint of the canonical JSON form.
    pub fn config_hash(&self) -> Result<ContentHash, ConfigError> {
        Ok(ContentHash::of(self)?)
    }

    pub fn time_range(&self) -> Result<TimeRange, ConfigError> {
        Ok(TimeRange::new(self.start, self.end)?)
    }

    pub fn entity_requests(&self) -> Vec<EntityRequest> {
        self.entities
            .iter()
            .map(|e| EntityRequest::required(e.as_str()))
            .chain(self.optional_entities.iter().map(|e| EntityRequest::optional(e.as_str())))
            .collect()
    }

    pub fn reestimation(&self) -> Reestimation {
        match self.reestimate_every {
            Some(n) => Reestimation::EveryN(n),
            None if self.reestimate_per_fold => Reestimation::PerFold,
            None => Reestimation::Static,
        }
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            bounds: self
                .bounds
                .iter()
                .map(|(entity, bounds)| (EntityId::new(entity.as_str()), *bounds))
                .collect(),
            missing: self.missing_data_policy,
            severity_threshold: self.severity_threshold,
        }
    }

    pub fn feature_config(&self) -> Result<FeatureConfig, ConfigError> {
        let specs = self
            .feature_specs
            .iter()
            .map(|s| FeatureSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let calendar = self
            .calendar
            .iter()
            .map(|c| c.parse::<CalendarFeature>())
            .collect::<Result<Vec<_>, _>>()?;
        let mut config = FeatureConfig::new(self.target.as_str(), specs);
        config.calendar = calendar;
        config.holidays = HolidayCalendar::new(self.holidays.iter().copied());
        config.scaler = self.scaler;
        config.fit_window = self.scaler_fit_window;
        config.interpolation = self.missing_data_policy;
        Ok(config)
    }

    /// Fold plan over the configured range.
    pub fn fold_plan(&self) -> FoldPlan {
        FoldPlan {
            start: self.start,
            end: self.end,
            frequency: self.frequency,
            estimation_length: self.fold_estimation_length,
            prediction_length: self.fold_prediction_length,
            step: self.fold_step,
            window: self.window,
            max_folds: self.max_folds,
        }
    }

    pub fn build_models(&self) -> Result<Vec<ModelPipeline>, ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        let mut names = HashSet::new();
        self.models
            .iter()
            .map(|m| {
                if !names.insert(m.name.as_str()) {
                    return Err(ConfigError::DuplicateModel(m.name.clone()));
                }
                m.build()
            })
            .collect()
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ─── Models ──────────────────────────────────────────────────────────

/// One named model of the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ModelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    Ols,
    Ridge {
        lambda: f64,
    },
    /// Echo a feature column (by its generated column name).
    Naive {
        feature: String,
    },
    QuantileRegression {
        quantiles: Vec<f64>,
        #[serde(default = "default_max_iter")]
        max_iter: usize,
    },
    /// Point model plus empirical residual quantiles.
    ResidualQuantiles {
        base: Box<ModelKind>,
        quantiles: Vec<f64>,
    },
}

fn default_max_iter() -> usize {
    100
}

impl ModelConfig {
    pub fn build(&self) -> Result<ModelPipeline, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidModel {
            model: self.name.clone(),
            reason,
        };
        match &self.kind {
            ModelKind::QuantileRegression { quantiles, max_iter } => {
                let levels = quantile_levels(quantiles).map_err(invalid)?;
                Ok(ModelPipeline::probabilistic(
                    &self.name,
                    Arc::new(QuantileRegression::new(levels).with_max_iter(*max_iter)),
                ))
            }
            ModelKind::ResidualQuantiles { base, quantiles } => {
                let levels = quantile_levels(quantiles).map_err(invalid)?;
                let base = point_estimator(base).map_err(invalid)?;
                Ok(ModelPipeline::probabilistic(
                    &self.name,
                    Arc::new(ResidualQuantiles::new(base, levels)),
                ))
            }
            point => Ok(ModelPipeline::deterministic(
                &self.name,
                point_estimator(point).map_err(invalid)?,
            )),
        }
    }
}

fn point_estimator(kind: &ModelKind) -> Result<Arc<dyn PointEstimator>, String> {
    match kind {
        ModelKind::Ols => Ok(Arc::new(LinearRegression::ols())),
        ModelKind::Ridge { lambda } if lambda.is_finite() && *lambda >= 0.0 => {
            Ok(Arc::new(LinearRegression::ridge(*lambda)))
        }
        ModelKind::Ridge { lambda } => Err(format!("ridge lambda {lambda} must be finite and non-negative")),
        ModelKind::Naive { feature } => Ok(Arc::new(Naive::new(feature.as_str()))),
        ModelKind::QuantileRegression { .. } | ModelKind::ResidualQuantiles { .. } => {
            Err("residual quantile base must be a point model".into())
        }
    }
}

fn quantile_levels(quantiles: &[f64]) -> Result<Vec<QuantileLevel>, String> {
    if quantiles.is_empty() {
        return Err("at least one quantile level is required".into());
    }
    quantiles
        .iter()
        .map(|q| QuantileLevel::new(*q).map_err(|e| e.to_string()))
        .collect()
}

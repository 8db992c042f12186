//! Feature layer: spec parsing, calendar features, scaling and the causal
//! feature pipeline.

pub mod calendar;
pub mod matrix;
pub mod pipeline;
pub mod scaler;
pub mod spec;

pub use calendar::{CalendarFeature, HolidayCalendar};
pub use matrix::FeatureMatrix;
pub use pipeline::{FeatureConfig, FeaturePipeline, FoldMatrices};
pub use scaler::{ColumnScale, FittedScaler, ScalerFitWindow, ScalerKind};
pub use spec::{FeatureError, FeatureSpec, LeakageGuardError, Rolling, RollingAgg};

//! EPF Lab Core: domain types, cached data pipeline and causal feature engineering.
//!
//! This crate contains everything upstream of model fitting:
//! - Domain types (time series, ranges, frequencies, time-zone tags, identifiers)
//! - Data sources, the range-aware fetch cache and its Parquet persistence
//! - Multi-entity alignment and data-quality validation
//! - Feature spec parsing, calendar features, per-fold scaling
//! - Leakage guards that reject non-causal configurations before any fold runs

pub mod data;
pub mod domain;
pub mod features;
pub mod fingerprint;
pub mod rng;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across fold workers is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::TimeSeries>();
        require_sync::<domain::TimeSeries>();
        require_send::<data::AlignedFrame>();
        require_sync::<data::AlignedFrame>();
        require_send::<data::Cache>();
        require_sync::<data::Cache>();
        require_send::<data::DataPipeline>();
        require_sync::<data::DataPipeline>();
        require_send::<features::FeaturePipeline>();
        require_sync::<features::FeaturePipeline>();
        require_send::<features::FeatureMatrix>();
        require_sync::<features::FeatureMatrix>();
        require_send::<features::FittedScaler>();
        require_sync::<features::FittedScaler>();
        require_send::<rng::SeedHierarchy>();
        require_sync::<rng::SeedHierarchy>();
    }

    /// The source capability must stay object-safe: the pipeline holds
    /// heterogeneous sources as `Arc<dyn DataSource>`.
    #[test]
    fn data_source_is_object_safe() {
        fn _accepts(_: &dyn data::DataSource) {}
    }
}

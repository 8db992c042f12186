//! Data layer: sources, the shared fetch cache, alignment and validation.

pub mod align;
pub mod cache;
pub mod circuit_breaker;
pub mod pipeline;
pub mod provider;
pub mod store;
pub mod synthetic;
pub mod validate;

pub use align::{align_series, align_series_over, AlignError, AlignedFrame, FrameColumn};
pub use cache::{
    Cache, CacheEntry, CacheKey, CacheStats, CachedSeries, Clock, ManualClock, SystemClock,
    DEFAULT_TTL_SECS,
};
pub use circuit_breaker::CircuitBreaker;
pub use pipeline::{
    DataBuild, DataPipeline, DataPipelineError, EntityRequest, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_MAX_IN_FLIGHT,
};
pub use provider::{DataError, DataSource};
pub use store::ParquetStore;
pub use synthetic::SyntheticSource;
pub use validate::{
    interpolate, validate_frame, ColumnProfile, InterpolationMethod, MissingDataPolicy,
    ValidationIssue, ValidationPolicy, ValidationReport, ValueBounds,
};

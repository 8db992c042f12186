//! Data source capability and structured fetch errors.
//!
//! A source knows nothing about caching: the [`Cache`](super::cache::Cache)
//! sits above this trait and decides which sub-ranges are actually fetched.

use thiserror::Error;

use crate::domain::{EntityId, SeriesError, SourceId, TimeRange, TimeSeries};

/// Errors from fetching or persisting raw series.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("source '{source_id}' unavailable for '{entity}': {reason}")]
    SourceUnavailable {
        source_id: SourceId,
        entity: EntityId,
        reason: String,
    },

    #[error("fetch from '{source_id}' for '{entity}' timed out after {timeout_ms}ms")]
    Timeout {
        source_id: SourceId,
        entity: EntityId,
        timeout_ms: u64,
    },

    #[error("circuit breaker open for source '{0}'")]
    CircuitOpen(SourceId),

    #[error("source '{source_id}' still has {in_flight} timed-out fetches running")]
    Saturated { source_id: SourceId, in_flight: usize },

    #[error("invalid series: {0}")]
    InvalidSeries(#[from] SeriesError),

    #[error("cache persistence error: {0}")]
    Persistence(String),
}

/// A provider of time series for a fixed set of entities.
///
/// `fetch` may block on external I/O. Callers wrap it with a timeout.
pub trait DataSource: Send + Sync {
    /// Stable identifier, part of every cache key.
    fn source_id(&self) -> &SourceId;

    /// Entities this source can serve.
    fn entities(&self) -> &[EntityId];

    fn serves(&self, entity: &EntityId) -> bool {
        self.entities().contains(entity)
    }

    /// Fingerprint of request parameters that change the returned data
    /// (market area, unit, API variant). Empty when there are none.
    fn params_fingerprint(&self) -> String {
        String::new()
    }

    /// Fetch `entity` over `range`.
    fn fetch(&self, entity: &EntityId, range: TimeRange) -> Result<TimeSeries, DataError>;
}

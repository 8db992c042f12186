//! Domain types shared by every pipeline stage.

pub mod ids;
pub mod series;
pub mod time;

pub use ids::{EntityId, SourceId};
pub use series::{Gap, Observation, SeriesError, TimeSeries};
pub use time::{normalize_ranges, uncovered, Frequency, RangeError, TimeRange, TimeZoneTag};

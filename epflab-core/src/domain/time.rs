//! Time ranges, sampling frequencies and time-zone tags.
//!
//! Every timestamp in the system is a `DateTime<Utc>`. Local time only
//! exists transiently, when calendar features are derived through a
//! [`TimeZoneTag`].

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("end timestamp ({end}) must be after start timestamp ({start})")]
    EndNotAfterStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("unknown frequency '{0}' (expected 15min, 30min, 1h or 1d)")]
    UnknownFrequency(String),
    #[error("invalid time zone '{0}' (expected UTC or an offset like +01:00)")]
    InvalidTimeZone(String),
}

// ─── TimeRange ───────────────────────────────────────────────────────

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, RangeError> {
        if end <= start {
            return Err(RangeError::EndNotAfterStart { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// True when `other` lies entirely inside `self`.
    pub fn covers(&self, other: &TimeRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end > start).then_some(TimeRange { start, end })
    }

    /// Number of whole sampling steps in the range.
    pub fn steps(&self, frequency: Frequency) -> i64 {
        self.duration().num_seconds() / frequency.seconds()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Sort ranges and merge the ones that overlap or touch.
pub fn normalize_ranges(mut ranges: Vec<TimeRange>) -> Vec<TimeRange> {
    ranges.sort();
    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match merged.last_mut() {
            Some(last) if r.start <= last.end => {
                last.end = last.end.max(r.end);
            }
            _ => merged.push(r),
        }
    }
    merged
}

/// Sub-ranges of `request` not covered by any of `covered`, in order.
pub fn uncovered(request: TimeRange, covered: &[TimeRange]) -> Vec<TimeRange> {
    let mut gaps = Vec::new();
    let mut cursor = request.start;

    for c in normalize_ranges(covered.to_vec()) {
        if c.end <= cursor {
            continue;
        }
        if c.start >= request.end {
            break;
        }
        if c.start > cursor {
            gaps.push(TimeRange {
                start: cursor,
                end: c.start,
            });
        }
        cursor = cursor.max(c.end);
        if cursor >= request.end {
            break;
        }
    }

    if cursor < request.end {
        gaps.push(TimeRange {
            start: cursor,
            end: request.end,
        });
    }
    gaps
}

// ─── Frequency ───────────────────────────────────────────────────────

/// Fixed sampling interval of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "15min")]
    QuarterHourly,
    #[serde(rename = "30min")]
    HalfHourly,
    #[serde(rename = "1h")]
    Hourly,
    #[serde(rename = "1d")]
    Daily,
}

impl Frequency {
    pub fn seconds(self) -> i64 {
        match self {
            Frequency::QuarterHourly => 15 * 60,
            Frequency::HalfHourly => 30 * 60,
            Frequency::Hourly => 3600,
            Frequency::Daily => 86_400,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.seconds())
    }

    /// Timestamp `n` steps after `ts` (negative `n` steps back).
    pub fn advance(self, ts: DateTime<Utc>, n: i64) -> DateTime<Utc> {
        ts + Duration::seconds(self.seconds() * n)
    }

    /// Whole steps from `from` to `to`, or `None` when they are off-grid.
    pub fn steps_between(self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<i64> {
        let secs = (to - from).num_seconds();
        (secs % self.seconds() == 0).then_some(secs / self.seconds())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::QuarterHourly => "15min",
            Frequency::HalfHourly => "30min",
            Frequency::Hourly => "1h",
            Frequency::Daily => "1d",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "15min" => Ok(Frequency::QuarterHourly),
            "30min" => Ok(Frequency::HalfHourly),
            "1h" | "60min" => Ok(Frequency::Hourly),
            "1d" | "24h" => Ok(Frequency::Daily),
            other => Err(RangeError::UnknownFrequency(other.to_string())),
        }
    }
}

// ─── TimeZoneTag ─────────────────────────────────────────────────────

/// Time zone a series is reported in. Drives local-time calendar features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeZoneTag {
    #[default]
    Utc,
    /// Offset east of UTC, in seconds.
    Fixed(i32),
}

impl TimeZoneTag {
    pub fn offset(self) -> FixedOffset {
        match self {
            TimeZoneTag::Utc => Utc.fix(),
            TimeZoneTag::Fixed(secs) => FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix()),
        }
    }

    /// Wall-clock time of `ts` in this zone.
    pub fn localize(self, ts: DateTime<Utc>) -> NaiveDateTime {
        ts.with_timezone(&self.offset()).naive_local()
    }
}

impl fmt::Display for TimeZoneTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneTag::Utc => f.write_str("UTC"),
            TimeZoneTag::Fixed(secs) => {
                let sign = if *secs < 0 { '-' } else { '+' };
                let abs = secs.unsigned_abs();
                write!(f, "{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
            }
        }
    }
}

impl FromStr for TimeZoneTag {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
            return Ok(TimeZoneTag::Utc);
        }
        let invalid = || RangeError::InvalidTimeZone(s.to_string());

        let (sign, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
            (1, rest)
        } else if let Some(rest) = trimmed.strip_prefix('-') {
            (-1, rest)
        } else {
            return Err(invalid());
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
        let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
        if hours > 14 || minutes > 59 {
            return Err(invalid());
        }
        let secs = sign * (hours * 3600 + minutes * 60);
        if secs == 0 {
            Ok(TimeZoneTag::Utc)
        } else {
            Ok(TimeZoneTag::Fixed(secs))
        }
    }
}

impl TryFrom<String> for TimeZoneTag {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeZoneTag> for String {
    fn from(tz: TimeZoneTag) -> Self {
        tz.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    fn range(a: u32, b: u32) -> TimeRange {
        TimeRange::new(day(a), day(b)).unwrap()
    }

    #[test]
    fn range_rejects_end_before_start() {
        assert!(TimeRange::new(day(2), day(1)).is_err());
        assert!(TimeRange::new(day(2), day(2)).is_err());
    }

    #[test]
    fn uncovered_with_nothing_cached_is_whole_request() {
        assert_eq!(uncovered(range(1, 10), &[]), vec![range(1, 10)]);
    }

    #[test]
    fn uncovered_splits_around_cached_middle() {
        let gaps = uncovered(range(1, 10), &[range(3, 5)]);
        assert_eq!(gaps, vec![range(1, 3), range(5, 10)]);
    }

    #[test]
    fn uncovered_empty_when_fully_covered() {
        assert!(uncovered(range(3, 5), &[range(1, 4), range(4, 8)]).is_empty());
    }

    #[test]
    fn normalize_merges_touching_ranges() {
        let merged = normalize_ranges(vec![range(5, 7), range(1, 3), range(3, 5)]);
        assert_eq!(merged, vec![range(1, 7)]);
    }

    #[test]
    fn frequency_steps_between_detects_off_grid() {
        let f = Frequency::Hourly;
        let t0 = day(1);
        assert_eq!(f.steps_between(t0, f.advance(t0, 5)), Some(5));
        assert_eq!(f.steps_between(t0, t0 + Duration::minutes(30)), None);
    }

    #[test]
    fn time_zone_parses_offsets() {
        assert_eq!("UTC".parse::<TimeZoneTag>().unwrap(), TimeZoneTag::Utc);
        assert_eq!("+01:00".parse::<TimeZoneTag>().unwrap(), TimeZoneTag::Fixed(3600));
        assert_eq!("-0500".parse::<TimeZoneTag>().unwrap(), TimeZoneTag::Fixed(-18_000));
        assert!("Invalid/Timezone".parse::<TimeZoneTag>().is_err());
    }

    #[test]
    fn time_zone_localizes_wall_clock() {
        let tz: TimeZoneTag = "+01:00".parse().unwrap();
        assert_eq!(tz.localize(day(1)).hour(), 1);
        let ny: TimeZoneTag = "-05:00".parse().unwrap();
        assert_eq!(ny.localize(day(1)).hour(), 19);
    }

    #[test]
    fn time_zone_display_roundtrips() {
        let tz = TimeZoneTag::Fixed(-18_000);
        assert_eq!(tz.to_string(), "-05:00");
        assert_eq!(tz.to_string().parse::<TimeZoneTag>().unwrap(), tz);
    }
}

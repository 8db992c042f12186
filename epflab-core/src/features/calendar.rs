//! Calendar features: pure functions of the target timestamp.
//!
//! Evaluated on local wall-clock time of the frame's time zone, so an
//! hourly UTC series tagged `+01:00` reports `hour = 0` at 23:00 UTC.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::spec::FeatureError;
use crate::domain::TimeZoneTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CalendarFeature {
    /// 0..=23
    Hour,
    /// Monday = 0 .. Sunday = 6
    DayOfWeek,
    /// 1..=12
    Month,
    /// 1..=366
    DayOfYear,
    Weekend,
    Holiday,
    /// Dummy for one weekday.
    IsDay(Weekday),
}

impl CalendarFeature {
    pub fn column_name(self) -> String {
        match self {
            CalendarFeature::Hour => "cal_hour".into(),
            CalendarFeature::DayOfWeek => "cal_dow".into(),
            CalendarFeature::Month => "cal_month".into(),
            CalendarFeature::DayOfYear => "cal_doy".into(),
            CalendarFeature::Weekend => "cal_weekend".into(),
            CalendarFeature::Holiday => "cal_holiday".into(),
            CalendarFeature::IsDay(day) => format!("cal_dow_{}", weekday_code(day)),
        }
    }

    pub fn value(self, ts: DateTime<Utc>, tz: TimeZoneTag, holidays: &HolidayCalendar) -> f64 {
        let local = tz.localize(ts);
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            CalendarFeature::Hour => local.hour() as f64,
            CalendarFeature::DayOfWeek => local.weekday().num_days_from_monday() as f64,
            CalendarFeature::Month => local.month() as f64,
            CalendarFeature::DayOfYear => local.ordinal() as f64,
            CalendarFeature::Weekend => flag(matches!(local.weekday(), Weekday::Sat | Weekday::Sun)),
            CalendarFeature::Holiday => flag(holidays.contains(local.date())),
            CalendarFeature::IsDay(day) => flag(local.weekday() == day),
        }
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl fmt::Display for CalendarFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarFeature::Hour => f.write_str("hour"),
            CalendarFeature::DayOfWeek => f.write_str("dow"),
            CalendarFeature::Month => f.write_str("month"),
            CalendarFeature::DayOfYear => f.write_str("doy"),
            CalendarFeature::Weekend => f.write_str("weekend"),
            CalendarFeature::Holiday => f.write_str("holiday"),
            CalendarFeature::IsDay(day) => write!(f, "dow={}", weekday_code(*day)),
        }
    }
}

impl FromStr for CalendarFeature {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "hour" => return Ok(CalendarFeature::Hour),
            "dow" => return Ok(CalendarFeature::DayOfWeek),
            "month" => return Ok(CalendarFeature::Month),
            "doy" => return Ok(CalendarFeature::DayOfYear),
            "weekend" => return Ok(CalendarFeature::Weekend),
            "holiday" => return Ok(CalendarFeature::Holiday),
            _ => {}
        }
        s.strip_prefix("dow=")
            .and_then(|d| d.parse::<Weekday>().ok())
            .map(CalendarFeature::IsDay)
            .ok_or_else(|| FeatureError::UnknownCalendar(s.to_string()))
    }
}

impl TryFrom<String> for CalendarFeature {
    type Error = FeatureError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CalendarFeature> for String {
    fn from(feature: CalendarFeature) -> Self {
        feature.to_string()
    }
}

/// Local dates treated as public holidays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolidayCalendar {
    dates: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

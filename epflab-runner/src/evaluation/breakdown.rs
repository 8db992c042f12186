//! Retained predictions and error breakdowns by calendar slice.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use epflab_core::domain::TimeZoneTag;

/// One forecast row kept for post-hoc analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub model: String,
    pub fold_id: usize,
    pub horizon: u32,
    pub ts: DateTime<Utc>,
    pub actual: Option<f64>,
    /// Point forecast, or the median level of a quantile forecast.
    pub point: Option<f64>,
    /// Quantile values in level order, for probabilistic models.
    pub quantiles: Option<Vec<f64>>,
}

impl PredictionRecord {
    fn abs_error(&self) -> Option<f64> {
        Some((self.point? - self.actual?).abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownKey {
    /// Local hour of day.
    Hour,
    /// Local calendar year.
    Year,
}

/// MAE of the point forecast within one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub model: String,
    pub horizon: u32,
    pub key: BreakdownKey,
    pub group: i32,
    pub mae: f64,
    /// Rows scored.
    pub n: usize,
}

pub fn by_hour(predictions: &[PredictionRecord], tz: TimeZoneTag) -> Vec<BreakdownRow> {
    breakdown(predictions, BreakdownKey::Hour, |ts| tz.localize(ts).hour() as i32)
}

pub fn by_year(predictions: &[PredictionRecord], tz: TimeZoneTag) -> Vec<BreakdownRow> {
    breakdown(predictions, BreakdownKey::Year, |ts| tz.localize(ts).year())
}

fn breakdown(
    predictions: &[PredictionRecord],
    key: BreakdownKey,
    group_of: impl Fn(DateTime<Utc>) -> i32,
) -> Vec<BreakdownRow> {
    let mut groups: BTreeMap<(&str, u32, i32), (f64, usize)> = BTreeMap::new();
    for p in predictions {
        let Some(err) = p.abs_error() else {
            continue;
        };
        let slot = groups.entry((p.model.as_str(), p.horizon, group_of(p.ts))).or_default();
        slot.0 += err;
        slot.1 += 1;
    }
    groups
        .into_iter()
        .map(|((model, horizon, group), (sum, n))| BreakdownRow {
            model: model.to_string(),
            horizon,
            key,
            group,
            mae: sum / n as f64,
            n,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pred(model: &str, ts: DateTime<Utc>, point: f64, actual: Option<f64>) -> PredictionRecord {
        PredictionRecord {
            model: model.into(),
            fold_id: 0,
            horizon: 1,
            ts,
            actual,
            point: Some(point),
            quantiles: None,
        }
    }

    #[test]
    fn by_hour_groups_per_model_and_hour() {
        let h0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let h1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let preds = vec![
            pred("a", h0, 10.0, Some(12.0)),
            pred("a", h1, 20.0, Some(18.0)),
            pred("b", h0, 11.0, Some(12.0)),
            pred("b", h1, 19.0, Some(18.0)),
            pred("b", h1, 19.0, None),
        ];
        let rows = by_hour(&preds, TimeZoneTag::Utc);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].model, "a");
        assert_eq!(rows[0].group, 0);
        assert_eq!(rows[0].mae, 2.0);
        assert_eq!(rows[3].n, 1);
    }

    #[test]
    fn by_year_uses_local_time() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 30, 0).unwrap();
        let cet: TimeZoneTag = "+01:00".parse().unwrap();
        let preds = vec![pred("a", ts, 1.0, Some(2.0))];
        assert_eq!(by_year(&preds, TimeZoneTag::Utc)[0].group, 2023);
        assert_eq!(by_year(&preds, cet)[0].group, 2024);
    }
}

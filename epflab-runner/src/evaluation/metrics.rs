//! Forecast scoring.
//!
//! Every metric is computed over rows where both the actual and the forecast
//! are present, and is `None` when no such row exists. MAPE and sMAPE are in
//! percent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{Forecast, QuantileLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    Mae,
    Rmse,
    /// Rows with a zero actual are excluded.
    Mape,
    Smape,
    Pinball(QuantileLevel),
    /// Pinball loss averaged over all levels.
    MeanPinball,
}

impl Metric {
    pub const POINT: [Metric; 4] = [Metric::Mae, Metric::Rmse, Metric::Mape, Metric::Smape];

    /// Metrics reported for a model with the given quantile levels
    /// (empty for a point model).
    pub fn for_levels(levels: &[QuantileLevel]) -> Vec<Metric> {
        let mut metrics = Metric::POINT.to_vec();
        if !levels.is_empty() {
            metrics.extend(levels.iter().map(|l| Metric::Pinball(*l)));
            metrics.push(Metric::MeanPinball);
        }
        metrics
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Mae => f.write_str("mae"),
            Metric::Rmse => f.write_str("rmse"),
            Metric::Mape => f.write_str("mape"),
            Metric::Smape => f.write_str("smape"),
            Metric::Pinball(level) => write!(f, "pinball_{level}"),
            Metric::MeanPinball => f.write_str("pinball_mean"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mae" => Ok(Metric::Mae),
            "rmse" => Ok(Metric::Rmse),
            "mape" => Ok(Metric::Mape),
            "smape" => Ok(Metric::Smape),
            "pinball_mean" => Ok(Metric::MeanPinball),
            other => other
                .strip_prefix("pinball_")
                .and_then(|l| l.parse::<f64>().ok())
                .and_then(|l| QuantileLevel::new(l).ok())
                .map(Metric::Pinball)
                .ok_or_else(|| format!("unknown metric '{other}'")),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.to_string()
    }
}

/// One score for one (model, fold, horizon, metric). `None` when the fold
/// was skipped or no row could be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub model: String,
    pub fold_id: usize,
    pub horizon: u32,
    pub metric: Metric,
    pub value: Option<f64>,
}

// ─── Point metrics ───────────────────────────────────────────────────

fn pairs<'a>(forecast: &'a [Option<f64>], actual: &'a [Option<f64>]) -> impl Iterator<Item = (f64, f64)> + 'a {
    forecast
        .iter()
        .zip(actual)
        .filter_map(|(f, a)| Some(((*f)?, (*a)?)))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

pub fn mae(forecast: &[Option<f64>], actual: &[Option<f64>]) -> Option<f64> {
    mean(pairs(forecast, actual).map(|(f, a)| (f - a).abs()))
}

pub fn rmse(forecast: &[Option<f64>], actual: &[Option<f64>]) -> Option<f64> {
    mean(pairs(forecast, actual).map(|(f, a)| (f - a).powi(2))).map(f64::sqrt)
}

pub fn mape(forecast: &[Option<f64>], actual: &[Option<f64>]) -> Option<f64> {
    mean(
        pairs(forecast, actual)
            .filter(|(_, a)| *a != 0.0)
            .map(|(f, a)| ((f - a) / a).abs()),
    )
    .map(|v| 100.0 * v)
}

pub fn smape(forecast: &[Option<f64>], actual: &[Option<f64>]) -> Option<f64> {
    mean(pairs(forecast, actual).filter_map(|(f, a)| {
        let denom = f.abs() + a.abs();
        (denom > 0.0).then(|| 2.0 * (f - a).abs() / denom)
    }))
    .map(|v| 100.0 * v)
}

// ─── Quantile metrics ────────────────────────────────────────────────

/// Pinball loss of one quantile prediction.
pub fn pinball_loss(tau: f64, prediction: f64, actual: f64) -> f64 {
    let diff = actual - prediction;
    if diff >= 0.0 {
        tau * diff
    } else {
        (tau - 1.0) * diff
    }
}

/// Mean pinball loss per level, in level order.
pub fn pinball(
    levels: &[QuantileLevel],
    forecast: &[Option<Vec<f64>>],
    actual: &[Option<f64>],
) -> Vec<Option<f64>> {
    levels
        .iter()
        .enumerate()
        .map(|(i, level)| {
            mean(
                forecast
                    .iter()
                    .zip(actual)
                    .filter_map(|(f, a)| Some((f.as_ref()?.get(i).copied()?, (*a)?)))
                    .map(|(f, a)| pinball_loss(level.value(), f, a)),
            )
        })
        .collect()
}

/// Every metric for one forecast against the actuals.
pub fn score(forecast: &Forecast, actual: &[Option<f64>]) -> Vec<(Metric, Option<f64>)> {
    let point = forecast.point();
    let mut scores = vec![
        (Metric::Mae, mae(&point, actual)),
        (Metric::Rmse, rmse(&point, actual)),
        (Metric::Mape, mape(&point, actual)),
        (Metric::Smape, smape(&point, actual)),
    ];
    if let Forecast::Quantiles { levels, values } = forecast {
        let per_level = pinball(levels, values, actual);
        let present: Vec<f64> = per_level.iter().flatten().copied().collect();
        let mean_pinball = if present.len() == per_level.len() {
            mean(present.into_iter())
        } else {
            None
        };
        scores.extend(levels.iter().zip(per_level).map(|(l, v)| (Metric::Pinball(*l), v)));
        scores.push((Metric::MeanPinball, mean_pinball));
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(v: &[f64]) -> Vec<Option<f64>> {
        v.iter().copied().map(Some).collect()
    }

    #[test]
    fn mae_matches_hand_computation() {
        let f = some(&[10.0, 20.0, 30.0]);
        let a = some(&[12.0, 18.0, 33.0]);
        assert!((mae(&f, &a).unwrap() - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(mae(&a, &a), Some(0.0));
    }

    #[test]
    fn rows_without_actual_are_ignored() {
        let f = some(&[1.0, 100.0]);
        let a = vec![Some(2.0), None];
        assert_eq!(mae(&f, &a), Some(1.0));
        assert_eq!(rmse(&f, &a), Some(1.0));
        assert_eq!(mae(&f, &[None, None]), None);
    }

    #[test]
    fn mape_skips_zero_actuals() {
        let f = some(&[5.0, 110.0]);
        let a = some(&[0.0, 100.0]);
        assert!((mape(&f, &a).unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(mape(&some(&[1.0]), &some(&[0.0])), None);
    }

    #[test]
    fn smape_is_symmetric() {
        let a = smape(&some(&[110.0]), &some(&[100.0])).unwrap();
        let b = smape(&some(&[100.0]), &some(&[110.0])).unwrap();
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn pinball_penalises_each_side() {
        assert!((pinball_loss(0.9, 10.0, 12.0) - 1.8).abs() < 1e-12);
        assert!((pinball_loss(0.9, 12.0, 10.0) - 0.2).abs() < 1e-12);
        assert_eq!(pinball_loss(0.5, 3.0, 3.0), 0.0);
    }

    #[test]
    fn quantile_forecast_scores_every_level_and_mean() {
        let levels: Vec<QuantileLevel> = [0.1, 0.5, 0.9].iter().map(|q| QuantileLevel::new(*q).unwrap()).collect();
        let forecast = Forecast::Quantiles {
            levels: levels.clone(),
            values: vec![Some(vec![8.0, 10.0, 12.0]), Some(vec![9.0, 11.0, 13.0])],
        };
        let scores = score(&forecast, &some(&[10.0, 11.0]));
        let names: Vec<String> = scores.iter().map(|(m, _)| m.to_string()).collect();
        assert_eq!(
            names,
            ["mae", "rmse", "mape", "smape", "pinball_0.1", "pinball_0.5", "pinball_0.9", "pinball_mean"]
        );
        let get = |m: Metric| scores.iter().find(|(k, _)| *k == m).and_then(|(_, v)| *v).unwrap();
        assert_eq!(get(Metric::Mae), 0.0);
        assert!((get(Metric::Pinball(levels[0])) - 0.2).abs() < 1e-12);
        let mean = (0.2 + 0.0 + 0.2) / 3.0;
        assert!((get(Metric::MeanPinball) - mean).abs() < 1e-12);
    }

    #[test]
    fn metric_names_parse_back() {
        for m in Metric::for_levels(&[QuantileLevel::new(0.25).unwrap()]) {
            assert_eq!(m.to_string().parse::<Metric>().unwrap(), m);
        }
    }
}

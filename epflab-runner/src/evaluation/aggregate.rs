//! Cross-fold aggregation of score records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::metrics::{Metric, ScoreRecord};

/// Mean ± sample standard deviation of one (model, horizon, metric) across
/// the folds that produced a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    pub model: String,
    pub horizon: u32,
    pub metric: Metric,
    pub mean: Option<f64>,
    /// 0 for a single fold.
    pub std: Option<f64>,
    /// Folds that contributed a value.
    pub n_folds: usize,
    /// Folds whose value was `None` (skipped or unscorable).
    pub n_missing: usize,
}

/// Group by (model, horizon, metric). `None` values are counted in
/// `n_missing` and never enter the mean or the denominator.
pub fn aggregate(records: &[ScoreRecord]) -> Vec<AggregateScore> {
    let mut groups: BTreeMap<(&str, u32, Metric), (Vec<f64>, usize)> = BTreeMap::new();
    for r in records {
        let entry = groups.entry((r.model.as_str(), r.horizon, r.metric)).or_default();
        match r.value {
            Some(v) if v.is_finite() => entry.0.push(v),
            _ => entry.1 += 1,
        }
    }

    groups
        .into_iter()
        .map(|((model, horizon, metric), (values, n_missing))| {
            let (mean, std) = mean_std(&values);
            AggregateScore {
                model: model.to_string(),
                horizon,
                metric,
                mean,
                std,
                n_folds: values.len(),
                n_missing,
            }
        })
        .collect()
}

fn mean_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    let n = values.len();
    if n == 0 {
        return (None, None);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n == 1 {
        return (Some(mean), Some(0.0));
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (Some(mean), Some(var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, fold: usize, metric: Metric, value: Option<f64>) -> ScoreRecord {
        ScoreRecord {
            model: model.into(),
            fold_id: fold,
            horizon: 1,
            metric,
            value,
        }
    }

    #[test]
    fn skipped_folds_leave_the_denominator() {
        let records = vec![
            record("ols", 0, Metric::Mae, Some(2.0)),
            record("ols", 1, Metric::Mae, None),
            record("ols", 2, Metric::Mae, Some(4.0)),
        ];
        let agg = aggregate(&records);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].mean, Some(3.0));
        assert_eq!(agg[0].n_folds, 2);
        assert_eq!(agg[0].n_missing, 1);
        assert!((agg[0].std.unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn single_fold_has_zero_std() {
        let agg = aggregate(&[record("ols", 0, Metric::Rmse, Some(1.5))]);
        assert_eq!(agg[0].std, Some(0.0));
    }

    #[test]
    fn all_missing_has_no_mean() {
        let agg = aggregate(&[record("ols", 0, Metric::Mae, None)]);
        assert_eq!(agg[0].mean, None);
        assert_eq!(agg[0].n_folds, 0);
    }

    #[test]
    fn groups_by_model_and_metric() {
        let records = vec![
            record("a", 0, Metric::Mae, Some(1.0)),
            record("b", 0, Metric::Mae, Some(2.0)),
            record("a", 0, Metric::Rmse, Some(3.0)),
        ];
        assert_eq!(aggregate(&records).len(), 3);
    }
}

//! Model-ready feature matrix.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::domain::TimeRange;

/// Rows indexed by target timestamp; named feature columns plus the target.
///
/// Row-major: `values[row][col]`. `None` marks a feature that could not be
/// computed causally (missing or not yet observed source data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub index: Vec<DateTime<Utc>>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
    pub target_name: String,
    pub target: Vec<Option<f64>>,
    /// Forecast horizon (in steps) the lag features were built for.
    pub horizon: u32,
}

impl FeatureMatrix {
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, col: usize) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values.iter().map(move |row| row.get(col).copied().flatten())
    }

    /// Row positions with timestamp inside `range`.
    pub fn rows_in(&self, range: TimeRange) -> Range<usize> {
        let lo = self.index.partition_point(|ts| *ts < range.start);
        let hi = self.index.partition_point(|ts| *ts < range.end);
        lo..hi
    }

    /// Owned copy of a contiguous block of rows.
    pub fn slice_rows(&self, rows: Range<usize>) -> FeatureMatrix {
        let rows = rows.start.min(self.n_rows())..rows.end.min(self.n_rows());
        FeatureMatrix {
            index: self.index[rows.clone()].to_vec(),
            columns: self.columns.clone(),
            values: self.values[rows.clone()].to_vec(),
            target_name: self.target_name.clone(),
            target: self.target[rows].to_vec(),
            horizon: self.horizon,
        }
    }

    /// Fully observed feature row, if every column is present.
    pub fn complete_row(&self, row: usize) -> Option<Vec<f64>> {
        self.values.get(row)?.iter().copied().collect()
    }

    /// Rows where every feature and the target are present.
    pub fn complete_cases(&self) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (row, target) in self.target.iter().enumerate() {
            if let (Some(features), Some(t)) = (self.complete_row(row), target) {
                x.push(features);
                y.push(*t);
            }
        }
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn matrix() -> FeatureMatrix {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FeatureMatrix {
            index: (0..4).map(|i| t0 + Duration::days(i)).collect(),
            columns: vec!["a".into(), "b".into()],
            values: vec![
                vec![Some(1.0), Some(2.0)],
                vec![None, Some(3.0)],
                vec![Some(4.0), Some(5.0)],
                vec![Some(6.0), Some(7.0)],
            ],
            target_name: "price".into(),
            target: vec![Some(1.0), Some(2.0), None, Some(4.0)],
            horizon: 1,
        }
    }

    #[test]
    fn complete_cases_skip_missing_features_and_targets() {
        let (x, y) = matrix().complete_cases();
        assert_eq!(x, vec![vec![1.0, 2.0], vec![6.0, 7.0]]);
        assert_eq!(y, vec![1.0, 4.0]);
    }

    #[test]
    fn rows_in_is_half_open() {
        let m = matrix();
        let range = TimeRange::new(m.index[1], m.index[3]).unwrap();
        assert_eq!(m.rows_in(range), 1..3);
        let sliced = m.slice_rows(1..3);
        assert_eq!(sliced.n_rows(), 2);
        assert_eq!(sliced.columns, m.columns);
    }
}

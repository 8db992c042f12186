//! FeaturePipeline: aligned frame → causal feature matrices.
//!
//! Lag features for target row `t` read source row `t - lag` only, and only
//! when that row's timestamp is at or before the information cutoff
//! `as_of`. Anything unavailable is `None`, never filled from later rows.
//! Specs are grouped by horizon; each group is a separate feature set
//! (direct multi-horizon forecasting) sharing the calendar features.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use tracing::debug;

use super::calendar::{CalendarFeature, HolidayCalendar};
use super::matrix::FeatureMatrix;
use super::scaler::{FittedScaler, ScalerFitWindow, ScalerKind};
use super::spec::{FeatureError, FeatureSpec};
use crate::data::{AlignedFrame, MissingDataPolicy};
use crate::domain::{EntityId, TimeRange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub target: EntityId,
    pub specs: Vec<FeatureSpec>,
    #[serde(default)]
    pub calendar: Vec<CalendarFeature>,
    #[serde(default)]
    pub holidays: HolidayCalendar,
    #[serde(default)]
    pub scaler: ScalerKind,
    #[serde(default)]
    pub fit_window: ScalerFitWindow,
    /// Missing-data policy of the data layer feeding this pipeline. A
    /// non-causal fill constrains which lags are safe.
    #[serde(default)]
    pub interpolation: MissingDataPolicy,
}

impl FeatureConfig {
    pub fn new(target: impl Into<EntityId>, specs: Vec<FeatureSpec>) -> Self {
        Self {
            target: target.into(),
            specs,
            calendar: Vec::new(),
            holidays: HolidayCalendar::default(),
            scaler: ScalerKind::None,
            fit_window: ScalerFitWindow::Estimation,
            interpolation: MissingDataPolicy::default(),
        }
    }
}

/// Scaled estimation/prediction matrices of one fold, plus what is needed to
/// score the forecasts in original units.
#[derive(Debug, Clone)]
pub struct FoldMatrices {
    pub estimation: FeatureMatrix,
    pub prediction: FeatureMatrix,
    /// Unscaled observed target over the prediction rows. Rows that were
    /// missing before validation filled them stay `None`.
    pub actuals: Vec<Option<f64>>,
    pub scaler: FittedScaler,
}

#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    config: FeatureConfig,
    groups: BTreeMap<u32, Vec<FeatureSpec>>,
}

impl FeaturePipeline {
    /// Validate the configuration. Every leakage guard runs here, before
    /// any data is touched.
    pub fn new(config: FeatureConfig) -> Result<Self, FeatureError> {
        config.fit_window.check()?;
        let lookahead = config.interpolation.lookahead_rows();

        let mut seen = HashSet::new();
        let mut groups: BTreeMap<u32, Vec<FeatureSpec>> = BTreeMap::new();
        for spec in &config.specs {
            if lookahead > 0 {
                spec.check_lookahead(lookahead)?;
            }
            let name = spec.column_name();
            if !seen.insert(name.clone()) {
                return Err(FeatureError::DuplicateColumn(name));
            }
            groups.entry(spec.horizon()).or_default().push(spec.clone());
        }
        for cal in &config.calendar {
            if !seen.insert(cal.column_name()) {
                return Err(FeatureError::DuplicateColumn(cal.column_name()));
            }
        }
        if groups.is_empty() {
            groups.insert(1, Vec::new());
        }

        Ok(Self { config, groups })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn target(&self) -> &EntityId {
        &self.config.target
    }

    /// Horizons in ascending order.
    pub fn horizons(&self) -> Vec<u32> {
        self.groups.keys().copied().collect()
    }

    /// Target plus every entity a spec reads, without duplicates.
    pub fn required_entities(&self) -> Vec<EntityId> {
        let mut out = vec![self.config.target.clone()];
        for spec in &self.config.specs {
            if !out.contains(spec.entity()) {
                out.push(spec.entity().clone());
            }
        }
        out
    }

    /// Column order of the matrix for `horizon`: lag specs in declaration
    /// order, then calendar features. Identical for every fold.
    pub fn column_names(&self, horizon: u32) -> Vec<String> {
        let specs = self.groups.get(&horizon).map(Vec::as_slice).unwrap_or(&[]);
        specs
            .iter()
            .map(FeatureSpec::column_name)
            .chain(self.config.calendar.iter().map(|c| c.column_name()))
            .collect()
    }

    /// Feature matrix over every row of `frame`.
    pub fn transform(
        &self,
        frame: &AlignedFrame,
        horizon: u32,
        as_of: DateTime<Utc>,
    ) -> Result<FeatureMatrix, FeatureError> {
        self.transform_rows(frame, horizon, as_of, 0..frame.len())
    }

    /// Estimation and prediction matrices of one fold.
    ///
    /// The cutoff is the last prediction timestamp minus the horizon: the
    /// latest moment from which a forecast for that row can be issued. The
    /// scaler is fit on the estimation rows only.
    pub fn prepare_fold(
        &self,
        frame: &AlignedFrame,
        horizon: u32,
        estimation: TimeRange,
        prediction: TimeRange,
    ) -> Result<FoldMatrices, FeatureError> {
        self.prepare(frame, horizon, estimation, prediction, None)
    }

    /// Like [`prepare_fold`](Self::prepare_fold), applying a scaler fit on an
    /// earlier fold instead of fitting a new one. Used when a model fit on
    /// that earlier fold is reused.
    pub fn prepare_fold_reusing(
        &self,
        frame: &AlignedFrame,
        horizon: u32,
        estimation: TimeRange,
        prediction: TimeRange,
        scaler: &FittedScaler,
    ) -> Result<FoldMatrices, FeatureError> {
        self.prepare(frame, horizon, estimation, prediction, Some(scaler))
    }

    fn prepare(
        &self,
        frame: &AlignedFrame,
        horizon: u32,
        estimation: TimeRange,
        prediction: TimeRange,
        reuse: Option<&FittedScaler>,
    ) -> Result<FoldMatrices, FeatureError> {
        let last_prediction = frame.frequency.advance(prediction.end, -1);
        let as_of = frame.frequency.advance(last_prediction, -i64::from(horizon));

        let lo = frame.index.partition_point(|ts| *ts < estimation.start);
        let hi = frame.index.partition_point(|ts| *ts < prediction.end);
        let window = self.transform_rows(frame, horizon, as_of, lo..hi)?;

        let est_rows = window.rows_in(estimation);
        let pred_rows = window.rows_in(prediction);
        if est_rows.is_empty() {
            return Err(FeatureError::EmptyWindow(estimation.to_string()));
        }
        if pred_rows.is_empty() {
            return Err(FeatureError::EmptyWindow(prediction.to_string()));
        }

        let raw_estimation = window.slice_rows(est_rows);
        let raw_prediction = window.slice_rows(pred_rows);
        let scaler = match reuse {
            Some(scaler) => scaler.clone(),
            None => FittedScaler::fit(self.config.scaler, &raw_estimation),
        };
        debug!(
            horizon,
            estimation_rows = raw_estimation.n_rows(),
            prediction_rows = raw_prediction.n_rows(),
            %as_of,
            "prepared fold matrices"
        );

        Ok(FoldMatrices {
            estimation: scaler.transform(&raw_estimation),
            prediction: scaler.transform(&raw_prediction),
            actuals: raw_prediction.target,
            scaler,
        })
    }

    fn transform_rows(
        &self,
        frame: &AlignedFrame,
        horizon: u32,
        as_of: DateTime<Utc>,
        rows: Range<usize>,
    ) -> Result<FeatureMatrix, FeatureError> {
        let specs = self.groups.get(&horizon).map(Vec::as_slice).unwrap_or(&[]);
        // Targets and actuals never see validation fills; only lags may.
        let target = frame
            .frame_column(&self.config.target)
            .map(|column| column.observed())
            .ok_or_else(|| FeatureError::UnknownEntity(self.config.target.clone()))?;
        let sources = specs
            .iter()
            .map(|spec| {
                frame
                    .column(spec.entity())
                    .ok_or_else(|| FeatureError::UnknownEntity(spec.entity().clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Rows at or before the cutoff.
        let visible = frame.index.partition_point(|ts| *ts <= as_of);

        let mut values = Vec::with_capacity(rows.len());
        for row in rows.clone() {
            let ts = frame.index[row];
            let mut features = Vec::with_capacity(specs.len() + self.config.calendar.len());
            for (spec, column) in specs.iter().zip(&sources) {
                features.push(lag_value(column, row, spec, visible));
            }
            for cal in &self.config.calendar {
                features.push(Some(cal.value(ts, frame.timezone, &self.config.holidays)));
            }
            values.push(features);
        }

        Ok(FeatureMatrix {
            index: frame.index[rows.clone()].to_vec(),
            columns: self.column_names(horizon),
            values,
            target_name: self.config.target.to_string(),
            target: target[rows].to_vec(),
            horizon,
        })
    }
}

/// Value of `spec` for target `row`, reading only rows below `visible`.
fn lag_value(column: &[Option<f64>], row: usize, spec: &FeatureSpec, visible: usize) -> Option<f64> {
    let src = row.checked_sub(spec.lag() as usize)?;
    if src >= visible {
        return None;
    }
    match spec.rolling() {
        None => column[src],
        Some(r) => {
            let start = (src + 1).checked_sub(r.window as usize)?;
            let window: Option<Vec<f64>> = column[start..=src].iter().copied().collect();
            r.agg.apply(&window?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::align::FrameColumn;
    use crate::data::{validate_frame, InterpolationMethod, ValidationPolicy};
    use std::collections::HashMap;
    use crate::domain::{Frequency, TimeZoneTag};
    use crate::features::spec::LeakageGuardError;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn frame(n: usize) -> AlignedFrame {
        AlignedFrame {
            index: (0..n as i64).map(day).collect(),
            columns: vec![
                FrameColumn::new("price", (0..n).map(|i| Some(i as f64)).collect()),
                FrameColumn::new("load", (0..n).map(|i| Some(100.0 + i as f64)).collect()),
            ],
            frequency: Frequency::Daily,
            timezone: TimeZoneTag::Utc,
        }
    }

    fn spec(s: &str) -> FeatureSpec {
        s.parse().unwrap()
    }

    #[test]
    fn lag_reads_the_shifted_row() {
        let p = FeaturePipeline::new(FeatureConfig::new("price", vec![spec("load:lag2")])).unwrap();
        let m = p.transform(&frame(6), 1, day(100)).unwrap();
        assert_eq!(m.values[0][0], None);
        assert_eq!(m.values[3][0], Some(101.0));
        assert_eq!(m.target[3], Some(3.0));
    }

    #[test]
    fn values_after_cutoff_are_missing() {
        let p = FeaturePipeline::new(FeatureConfig::new("price", vec![spec("load:lag1")])).unwrap();
        let m = p.transform(&frame(6), 1, day(2)).unwrap();
        assert_eq!(m.values[3][0], Some(102.0));
        assert_eq!(m.values[4][0], None);
    }

    #[test]
    fn rolling_window_needs_every_value() {
        let p = FeaturePipeline::new(FeatureConfig::new("price", vec![spec("load:lag1:mean3")])).unwrap();
        let mut f = frame(9);
        f.column_mut(&EntityId::from("load")).unwrap()[4] = None;
        let m = p.transform(&f, 1, day(100)).unwrap();
        assert_eq!(m.values[2][0], None);
        assert_eq!(m.values[3][0], Some(101.0));
        assert_eq!(m.values[5][0], None);
        assert_eq!(m.values[7][0], None);
        assert_eq!(m.values[8][0], Some(106.0));
    }

    #[test]
    fn specs_are_grouped_by_horizon() {
        let p = FeaturePipeline::new(FeatureConfig::new(
            "price",
            vec![spec("price:lag7"), spec("load:lag2:h2"), spec("price:lag3:h2")],
        ))
        .unwrap();
        assert_eq!(p.horizons(), vec![1, 2]);
        assert_eq!(p.column_names(2), vec!["load_lag2_h2", "price_lag3_h2"]);
    }

    #[test]
    fn full_fit_window_is_rejected_at_construction() {
        let mut config = FeatureConfig::new("price", vec![spec("price:lag7")]);
        config.fit_window = ScalerFitWindow::Full;
        let err = FeaturePipeline::new(config).unwrap_err();
        assert!(matches!(err, FeatureError::Leakage(LeakageGuardError::ScalerFitWindow(_))));
    }

    #[test]
    fn linear_interpolation_requires_lag_slack() {
        let mut config = FeatureConfig::new("price", vec![spec("price:lag2")]);
        config.interpolation = MissingDataPolicy::Interpolate {
            method: InterpolationMethod::Linear,
            max_gap: 2,
        };
        assert!(matches!(
            FeaturePipeline::new(config.clone()).unwrap_err(),
            FeatureError::Leakage(LeakageGuardError::NonCausalInterpolation { .. })
        ));

        config.specs = vec![spec("price:lag4")];
        assert!(FeaturePipeline::new(config).is_ok());
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = FeaturePipeline::new(FeatureConfig::new(
            "price",
            vec![spec("price:lag7"), spec("price:d-7")],
        ))
        .unwrap_err();
        assert!(matches!(err, FeatureError::DuplicateColumn(_)));
    }

    #[test]
    fn prepare_fold_scaler_ignores_prediction_values() {
        let mut config = FeatureConfig::new("price", vec![spec("load:lag1")]);
        config.scaler = ScalerKind::Standard;
        let p = FeaturePipeline::new(config).unwrap();
        let est = TimeRange::new(day(0), day(10)).unwrap();
        let pred = TimeRange::new(day(10), day(14)).unwrap();

        let f = frame(14);
        let before = p.prepare_fold(&f, 1, est, pred).unwrap();

        let mut mutated = f.clone();
        for col in &mut mutated.columns {
            for v in &mut col.values[10..] {
                *v = v.map(|x| x * 1000.0);
            }
        }
        let after = p.prepare_fold(&mutated, 1, est, pred).unwrap();

        assert_eq!(before.scaler, after.scaler);
        assert_eq!(before.estimation, after.estimation);
        assert_eq!(after.actuals[0], Some(10_000.0));
    }

    #[test]
    fn imputed_targets_are_never_scored() {
        let mut f = frame(40);
        f.column_mut(&EntityId::from("price")).unwrap()[35] = None;
        let report = validate_frame(&mut f, &HashMap::new(), &ValidationPolicy::default());
        assert_eq!(report.interpolated.get(&EntityId::from("price")), Some(&1));
        assert_eq!(f.column(&EntityId::from("price")).unwrap()[35], Some(34.0));

        let p = FeaturePipeline::new(FeatureConfig::new("price", vec![spec("load:lag1")])).unwrap();
        let est = TimeRange::new(day(0), day(30)).unwrap();
        let pred = TimeRange::new(day(30), day(40)).unwrap();
        let m = p.prepare_fold(&f, 1, est, pred).unwrap();

        assert_eq!(m.actuals.len(), 10);
        assert_eq!(m.actuals[5], None);
        assert_eq!(m.actuals[4], Some(34.0));
        assert_eq!(m.actuals[6], Some(36.0));
    }

    #[test]
    fn scaler_ignores_estimation_targets_interpolated_from_prediction_rows() {
        let linear = MissingDataPolicy::Interpolate {
            method: InterpolationMethod::Linear,
            max_gap: 1,
        };
        let mut config = FeatureConfig::new("price", vec![spec("price:lag7")]);
        config.scaler = ScalerKind::Standard;
        config.interpolation = linear;
        let p = FeaturePipeline::new(config).unwrap();
        let est = TimeRange::new(day(0), day(30)).unwrap();
        let pred = TimeRange::new(day(30), day(40)).unwrap();
        let policy = ValidationPolicy {
            missing: linear,
            ..ValidationPolicy::default()
        };

        let fold_with_first_prediction = |value: f64| {
            let mut f = frame(40);
            let price = f.column_mut(&EntityId::from("price")).unwrap();
            price[29] = None;
            price[30] = Some(value);
            validate_frame(&mut f, &HashMap::new(), &policy);
            p.prepare_fold(&f, 1, est, pred).unwrap()
        };
        let low = fold_with_first_prediction(12.0);
        let high = fold_with_first_prediction(1000.0);

        assert_eq!(low.scaler, high.scaler);
        assert_eq!(low.estimation, high.estimation);
        assert_eq!(low.actuals[0], Some(12.0));
        assert_eq!(high.actuals[0], Some(1000.0));
    }
}

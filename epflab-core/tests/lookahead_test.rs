//! Look-ahead contamination tests for the feature pipeline.
//!
//! Invariant: no feature value for target row t may depend on source data
//! after t - lag, nor on anything after the information cutoff.
//!
//! Method: build features on a truncated frame (rows 0..120) and on the full
//! frame (rows 0..240). Rows 0..120 must be identical between both runs.
//! Then corrupt every row after a cutoff and check that features computed
//! with that cutoff do not move.

use chrono::{DateTime, Duration, TimeZone, Utc};

use epflab_core::data::align::FrameColumn;
use epflab_core::data::AlignedFrame;
use epflab_core::domain::{EntityId, Frequency, TimeRange, TimeZoneTag};
use epflab_core::features::{
    CalendarFeature, FeatureConfig, FeaturePipeline, FeatureSpec, ScalerKind,
};

fn hour(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(n)
}

fn make_frame(n: usize) -> AlignedFrame {
    let wave = |i: usize, k: f64| Some(50.0 + 10.0 * (i as f64 * k).sin() + (i % 7) as f64);
    AlignedFrame {
        index: (0..n as i64).map(hour).collect(),
        columns: vec![
            FrameColumn::new("price", (0..n).map(|i| wave(i, 0.26)).collect()),
            FrameColumn::new("load", (0..n).map(|i| wave(i, 0.13)).collect()),
        ],
        frequency: Frequency::Hourly,
        timezone: TimeZoneTag::Fixed(3600),
    }
}

fn pipeline() -> FeaturePipeline {
    let specs = ["price:lag24", "price:lag168", "load:lag1:mean24", "load:d-2:h2:std12", "price:lag3:h2:max6"]
        .iter()
        .map(|s| s.parse::<FeatureSpec>().unwrap())
        .collect();
    let mut config = FeatureConfig::new("price", specs);
    config.calendar = vec![CalendarFeature::Hour, CalendarFeature::DayOfWeek, CalendarFeature::Weekend];
    config.scaler = ScalerKind::Standard;
    FeaturePipeline::new(config).unwrap()
}

#[test]
fn truncated_and_full_frames_agree() {
    let p = pipeline();
    let full = make_frame(240);
    let mut truncated = full.clone();
    truncated.index.truncate(120);
    for col in &mut truncated.columns {
        col.values.truncate(120);
    }

    for horizon in p.horizons() {
        let a = p.transform(&full, horizon, hour(10_000)).unwrap();
        let b = p.transform(&truncated, horizon, hour(10_000)).unwrap();
        assert_eq!(b.n_rows(), 120);
        assert_eq!(&a.values[..120], &b.values[..], "horizon {horizon} leaks future rows");
    }
}

#[test]
fn corrupting_rows_after_the_cutoff_changes_nothing() {
    let p = pipeline();
    let clean = make_frame(240);
    let cutoff = hour(150);

    let mut corrupted = clean.clone();
    for col in &mut corrupted.columns {
        for v in &mut col.values[151..] {
            *v = Some(1e9);
        }
    }

    for horizon in p.horizons() {
        let a = p.transform(&clean, horizon, cutoff).unwrap();
        let b = p.transform(&corrupted, horizon, cutoff).unwrap();
        assert_eq!(a.values, b.values, "horizon {horizon} reads past the cutoff");
    }
}

#[test]
fn fold_matrices_do_not_see_the_prediction_window() {
    let p = pipeline();
    let clean = make_frame(240);
    let estimation = TimeRange::new(hour(0), hour(200)).unwrap();
    let prediction = TimeRange::new(hour(200), hour(224)).unwrap();

    let mut corrupted = clean.clone();
    for col in &mut corrupted.columns {
        for v in &mut col.values[200..] {
            *v = v.map(|x| -x * 7.0);
        }
    }

    for horizon in p.horizons() {
        let a = p.prepare_fold(&clean, horizon, estimation, prediction).unwrap();
        let b = p.prepare_fold(&corrupted, horizon, estimation, prediction).unwrap();
        assert_eq!(a.scaler, b.scaler, "scaler parameters moved with future values");
        assert_eq!(a.estimation, b.estimation);
        // Prediction rows may only differ where the lag reaches into the window.
        let earliest_lag = p
            .config()
            .specs
            .iter()
            .filter(|s| s.horizon() == horizon)
            .map(|s| s.lag() as usize)
            .min()
            .unwrap_or(usize::MAX);
        let untouched = earliest_lag.min(a.prediction.n_rows());
        assert_eq!(a.prediction.values[..untouched], b.prediction.values[..untouched]);
    }
}

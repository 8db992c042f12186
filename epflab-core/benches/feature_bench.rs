//! Criterion benchmarks for the feature hot paths.
//!
//! Benchmarks:
//! 1. Full-frame feature transform (lags, rolling windows, calendar)
//! 2. Per-fold preparation (window transform + scaler fit/apply)
//! 3. Alignment of many entities onto one grid

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use epflab_core::data::{align_series, AlignedFrame};
use epflab_core::domain::{EntityId, Frequency, TimeRange, TimeSeries, TimeZoneTag};
use epflab_core::features::{CalendarFeature, FeatureConfig, FeaturePipeline, FeatureSpec, ScalerKind};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(entity: &str, n: usize, k: f64) -> TimeSeries {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    TimeSeries::from_values(
        EntityId::from(entity),
        Frequency::Hourly,
        start,
        (0..n).map(|i| Some(50.0 + 10.0 * (i as f64 * k).sin())),
    )
}

fn make_frame(n: usize) -> AlignedFrame {
    let series = [make_series("price", n, 0.26), make_series("load", n, 0.13), make_series("wind", n, 0.07)];
    align_series(&series, Frequency::Hourly, TimeZoneTag::Utc).unwrap()
}

fn make_pipeline() -> FeaturePipeline {
    let specs = ["price:lag24", "price:lag48", "price:lag168", "load:lag24:mean24", "wind:lag24:std24"]
        .iter()
        .map(|s| s.parse::<FeatureSpec>().unwrap())
        .collect();
    let mut config = FeatureConfig::new("price", specs);
    config.calendar = vec![CalendarFeature::Hour, CalendarFeature::DayOfWeek, CalendarFeature::Holiday];
    config.scaler = ScalerKind::Standard;
    FeaturePipeline::new(config).unwrap()
}

// ── 1. Transform ─────────────────────────────────────────────────────

fn bench_transform(c: &mut Criterion) {
    let pipeline = make_pipeline();
    let mut group = c.benchmark_group("feature_transform");
    for n in [24 * 365, 24 * 365 * 3] {
        let frame = make_frame(n);
        let as_of = *frame.index.last().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &frame, |b, frame| {
            b.iter(|| pipeline.transform(black_box(frame), 1, as_of).unwrap())
        });
    }
    group.finish();
}

// ── 2. Fold preparation ──────────────────────────────────────────────

fn bench_prepare_fold(c: &mut Criterion) {
    let pipeline = make_pipeline();
    let frame = make_frame(24 * 400);
    let t0 = frame.index[0];
    let estimation = TimeRange::new(t0, t0 + Duration::days(365)).unwrap();
    let prediction = TimeRange::new(estimation.end, estimation.end + Duration::days(7)).unwrap();

    c.bench_function("prepare_fold_365d", |b| {
        b.iter(|| {
            pipeline
                .prepare_fold(black_box(&frame), 1, estimation, prediction)
                .unwrap()
        })
    });
}

// ── 3. Alignment ─────────────────────────────────────────────────────

fn bench_align(c: &mut Criterion) {
    let series: Vec<TimeSeries> = (0..20)
        .map(|i| make_series(&format!("entity_{i}"), 24 * 365, 0.01 * (i + 1) as f64))
        .collect();
    c.bench_function("align_20x8760", |b| {
        b.iter(|| align_series(black_box(&series), Frequency::Hourly, TimeZoneTag::Utc).unwrap())
    });
}

criterion_group!(benches, bench_transform, bench_prepare_fold, bench_align);
criterion_main!(benches);

//! Property tests for core invariants.
//!
//! Uses proptest to verify:
//! 1. Range subtraction: uncovered pieces plus coverage tile the request exactly
//! 2. Newest-wins merge: the newer snapshot's values always survive
//! 3. Leakage guard: lag < horizon never constructs
//! 4. Interpolation: never fills leading/trailing runs or runs above max_gap

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use epflab_core::data::{interpolate, InterpolationMethod};
use epflab_core::domain::{normalize_ranges, uncovered, EntityId, Frequency, TimeRange, TimeSeries};
use epflab_core::features::{FeatureError, FeatureSpec};

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_range() -> impl Strategy<Value = TimeRange> {
    (0i64..100, 1i64..30).prop_map(|(start, len)| TimeRange::new(day(start), day(start + len)).unwrap())
}

fn arb_values() -> impl Strategy<Value = Vec<Option<f64>>> {
    prop::collection::vec(prop::option::weighted(0.7, -100.0..100.0_f64), 0..60)
}

// ── 1. Range subtraction ─────────────────────────────────────────────

proptest! {
    #[test]
    fn uncovered_tiles_the_request(
        request in arb_range(),
        covered in prop::collection::vec(arb_range(), 0..6),
    ) {
        let gaps = uncovered(request, &covered);

        for g in &gaps {
            prop_assert!(request.covers(g));
            prop_assert!(!covered.iter().any(|c| c.overlaps(g)));
        }
        for pair in gaps.windows(2) {
            prop_assert!(pair[0].end < pair[1].start);
        }

        let mut pieces: Vec<TimeRange> = gaps.clone();
        pieces.extend(covered.iter().filter_map(|c| c.intersect(&request)));
        prop_assert_eq!(normalize_ranges(pieces), vec![request]);
    }
}

// ── 2. Newest-wins merge ─────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_keeps_newer_values(
        old_start in 0i64..20,
        old in arb_values(),
        new_start in 0i64..20,
        new in arb_values(),
    ) {
        let price = EntityId::from("price");
        let a = TimeSeries::from_values(price.clone(), Frequency::Daily, day(old_start), old.clone());
        let b = TimeSeries::from_values(price, Frequency::Daily, day(new_start), new.clone());
        let merged = a.merge_newest_wins(&b);

        for (i, v) in new.iter().enumerate() {
            prop_assert_eq!(merged.value_at(day(new_start + i as i64)), Some(*v));
        }
        let ts: Vec<_> = merged.points().iter().map(|p| p.ts).collect();
        prop_assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }
}

// ── 3. Leakage guard ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn spec_strings_respect_the_lag_guard(lag in 0u32..400, horizon in 1u32..400) {
        let parsed = format!("price:lag{lag}:h{horizon}").parse::<FeatureSpec>();
        if lag < horizon {
            prop_assert!(matches!(parsed, Err(FeatureError::Leakage(_))));
        } else {
            let spec = parsed.unwrap();
            prop_assert_eq!(spec.column_name(), format!("price_lag{lag}_h{horizon}"));
        }
    }
}

// ── 4. Interpolation bounds ──────────────────────────────────────────

proptest! {
    #[test]
    fn interpolation_only_fills_short_interior_runs(
        values in arb_values(),
        max_gap in 0usize..5,
        linear in any::<bool>(),
    ) {
        let method = if linear { InterpolationMethod::Linear } else { InterpolationMethod::ForwardFill };
        let mut filled = values.clone();
        interpolate(&mut filled, method, max_gap);

        // Observed values never change.
        for (before, after) in values.iter().zip(&filled) {
            if before.is_some() {
                prop_assert_eq!(before, after);
            }
        }
        // Leading and trailing missing values stay missing.
        let lead = values.iter().take_while(|v| v.is_none()).count();
        let trail = values.iter().rev().take_while(|v| v.is_none()).count();
        prop_assert!(filled[..lead].iter().all(Option::is_none));
        prop_assert!(filled[filled.len() - trail..].iter().all(Option::is_none));
    }
}

//! Data-quality validation of an aligned frame.
//!
//! Runs after alignment. For each column it checks
//!
//! - continuity: timestamps absent from the source series (no explicit
//!   missing marker) are recorded as gap warnings,
//! - declared value bounds: violations are recorded and the value is
//!   treated as missing,
//!
//! then remediates per [`MissingDataPolicy`]: interior runs of missing values
//! up to `max_gap` rows are interpolated, or any interior missing value is an
//! error. A column whose share of problem rows exceeds the severity threshold
//! is escalated to an error regardless of policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::align::AlignedFrame;
use crate::domain::{EntityId, Gap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Carry the last observed value forward. Causal.
    #[default]
    #[serde(alias = "ffill")]
    ForwardFill,
    /// Straight line between the neighbours of a run. Reads up to
    /// `max_gap + 1` rows ahead of the filled value.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MissingDataPolicy {
    Interpolate {
        #[serde(default)]
        method: InterpolationMethod,
        /// Longest run of missing rows that is filled.
        #[serde(default = "default_max_gap")]
        max_gap: usize,
    },
    Error,
}

fn default_max_gap() -> usize {
    3
}

impl Default for MissingDataPolicy {
    fn default() -> Self {
        MissingDataPolicy::Interpolate {
            method: InterpolationMethod::ForwardFill,
            max_gap: default_max_gap(),
        }
    }
}

impl MissingDataPolicy {
    /// Rows a filled value may read ahead of itself.
    pub fn lookahead_rows(&self) -> usize {
        match self {
            MissingDataPolicy::Interpolate {
                method: InterpolationMethod::Linear,
                max_gap,
            } => max_gap + 1,
            _ => 0,
        }
    }
}

/// Inclusive value range for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueBounds {
    pub fn non_negative() -> Self {
        Self {
            min: Some(0.0),
            max: None,
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        self.min.map_or(true, |m| v >= m) && self.max.map_or(true, |m| v <= m)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub bounds: HashMap<EntityId, ValueBounds>,
    pub missing: MissingDataPolicy,
    /// Share of a column's rows with issues above which the column fails.
    pub severity_threshold: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            bounds: HashMap::new(),
            missing: MissingDataPolicy::default(),
            severity_threshold: 0.1,
        }
    }
}

/// One data-quality finding. Whether it is a warning or an error is decided
/// by where it lands in the [`ValidationReport`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ValidationIssue {
    #[error("{entity}: {missing_steps} timestamp(s) absent after {after} without a missing marker")]
    Gap {
        entity: EntityId,
        after: DateTime<Utc>,
        missing_steps: i64,
    },
    #[error("{entity}: value {value} at {at} outside declared bounds")]
    OutOfBounds {
        entity: EntityId,
        at: DateTime<Utc>,
        value: f64,
    },
    #[error("{entity}: {count} interior missing value(s) and the policy forbids interpolation")]
    MissingData { entity: EntityId, count: usize },
    #[error("{entity}: {fraction:.3} of rows have issues, above threshold {threshold}")]
    SeverityExceeded {
        entity: EntityId,
        fraction: f64,
        threshold: f64,
    },
}

impl ValidationIssue {
    pub fn entity(&self) -> &EntityId {
        match self {
            ValidationIssue::Gap { entity, .. }
            | ValidationIssue::OutOfBounds { entity, .. }
            | ValidationIssue::MissingData { entity, .. }
            | ValidationIssue::SeverityExceeded { entity, .. } => entity,
        }
    }
}

/// Descriptive statistics of one column after remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub entity: EntityId,
    pub count: usize,
    pub missing_count: usize,
    pub missing_pct: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub warnings: Vec<ValidationIssue>,
    pub errors: Vec<ValidationIssue>,
    /// Values filled by interpolation, per entity.
    pub interpolated: HashMap<EntityId, usize>,
    pub profiles: Vec<ColumnProfile>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn errors_for<'a>(&'a self, entity: &'a EntityId) -> impl Iterator<Item = &'a ValidationIssue> {
        self.errors.iter().filter(move |e| e.entity() == entity)
    }

    pub fn has_errors_for(&self, entity: &EntityId) -> bool {
        self.errors_for(entity).next().is_some()
    }
}

/// Validate and remediate `frame` in place.
///
/// `gaps` holds, per entity, the runs of timestamps the source omitted
/// (see [`TimeSeries::gaps_within`](crate::domain::TimeSeries::gaps_within)).
/// Every value the missing-data policy fills is flagged in
/// [`FrameColumn::imputed`](crate::data::FrameColumn::imputed).
pub fn validate_frame(
    frame: &mut AlignedFrame,
    gaps: &HashMap<EntityId, Vec<Gap>>,
    policy: &ValidationPolicy,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let index = frame.index.clone();

    for column in &mut frame.columns {
        let entity = column.entity.clone();
        let mut issues = Vec::new();
        let mut problem_rows = 0usize;

        for gap in gaps.get(&entity).map(Vec::as_slice).unwrap_or(&[]) {
            problem_rows += gap.missing_steps.max(0) as usize;
            issues.push(ValidationIssue::Gap {
                entity: entity.clone(),
                after: gap.after,
                missing_steps: gap.missing_steps,
            });
        }

        if let Some(bounds) = policy.bounds.get(&entity) {
            for (ts, v) in index.iter().zip(column.values.iter_mut()) {
                if let Some(x) = *v {
                    if !bounds.contains(x) {
                        problem_rows += 1;
                        issues.push(ValidationIssue::OutOfBounds {
                            entity: entity.clone(),
                            at: *ts,
                            value: x,
                        });
                        *v = None;
                    }
                }
            }
        }

        for issue in &issues {
            warn!(%entity, issue = %issue, "validation warning");
        }
        report.warnings.extend(issues);

        let rows = column.values.len().max(1);
        let fraction = problem_rows as f64 / rows as f64;
        if fraction > policy.severity_threshold {
            report.errors.push(ValidationIssue::SeverityExceeded {
                entity: entity.clone(),
                fraction,
                threshold: policy.severity_threshold,
            });
        }

        match policy.missing {
            MissingDataPolicy::Interpolate { method, max_gap } => {
                let missing: Vec<bool> = column.values.iter().map(Option::is_none).collect();
                let filled = interpolate(&mut column.values, method, max_gap);
                if filled > 0 {
                    column.imputed = missing
                        .iter()
                        .zip(&column.values)
                        .map(|(was_missing, v)| *was_missing && v.is_some())
                        .collect();
                    debug!(%entity, filled, ?method, "interpolated missing values");
                    report.interpolated.insert(entity.clone(), filled);
                }
            }
            MissingDataPolicy::Error => {
                let count = interior_runs(&column.values)
                    .iter()
                    .map(|(start, end)| end - start)
                    .sum::<usize>();
                if count > 0 {
                    report.errors.push(ValidationIssue::MissingData {
                        entity: entity.clone(),
                        count,
                    });
                }
            }
        }

        let profile = profile_column(&entity, &column.values);
        debug!(
            %entity,
            count = profile.count,
            missing = profile.missing_count,
            mean = ?profile.mean,
            std = ?profile.std,
            "column profile"
        );
        report.profiles.push(profile);
    }

    report
}

// ─── Interpolation ───────────────────────────────────────────────────

/// Half-open row ranges of missing values bounded by observations on both sides.
fn interior_runs(values: &[Option<f64>]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let Some(first) = values.iter().position(Option::is_some) else {
        return runs;
    };
    let mut i = first;
    while i < values.len() {
        if values[i].is_none() {
            let start = i;
            while i < values.len() && values[i].is_none() {
                i += 1;
            }
            if i < values.len() {
                runs.push((start, i));
            }
        } else {
            i += 1;
        }
    }
    runs
}

/// Fill interior runs no longer than `max_gap`. Returns the number filled.
pub fn interpolate(values: &mut [Option<f64>], method: InterpolationMethod, max_gap: usize) -> usize {
    let mut filled = 0;
    for (start, end) in interior_runs(values) {
        let len = end - start;
        if len > max_gap {
            continue;
        }
        let (Some(before), Some(after)) = (values[start - 1], values[end]) else {
            continue;
        };
        for (k, slot) in values[start..end].iter_mut().enumerate() {
            *slot = Some(match method {
                InterpolationMethod::ForwardFill => before,
                InterpolationMethod::Linear => {
                    let frac = (k + 1) as f64 / (len + 1) as f64;
                    before + (after - before) * frac
                }
            });
        }
        filled += len;
    }
    filled
}

// ─── Profiles ────────────────────────────────────────────────────────

fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

pub fn profile_column(entity: &EntityId, values: &[Option<f64>]) -> ColumnProfile {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    present.sort_by(f64::total_cmp);
    let count = present.len();
    let missing_count = values.len() - count;

    let mean = (count > 0).then(|| present.iter().sum::<f64>() / count as f64);
    let std = match mean {
        Some(m) if count > 1 => {
            let var = present.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (count - 1) as f64;
            Some(var.sqrt())
        }
        _ => None,
    };

    ColumnProfile {
        entity: entity.clone(),
        count,
        missing_count,
        missing_pct: if values.is_empty() {
            0.0
        } else {
            100.0 * missing_count as f64 / values.len() as f64
        },
        min: present.first().copied(),
        max: present.last().copied(),
        mean,
        std,
        q25: quantile(&present, 0.25),
        median: quantile(&present, 0.5),
        q75: quantile(&present, 0.75),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::align::FrameColumn;
    use crate::domain::{Frequency, TimeZoneTag};
    use chrono::{Duration, TimeZone};

    fn frame(values: Vec<Option<f64>>) -> AlignedFrame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        AlignedFrame {
            index: (0..values.len()).map(|i| start + Duration::hours(i as i64)).collect(),
            columns: vec![FrameColumn::new("load", values)],
            frequency: Frequency::Hourly,
            timezone: TimeZoneTag::Utc,
        }
    }

    #[test]
    fn forward_fill_respects_max_gap() {
        let mut v = vec![Some(1.0), None, Some(3.0), None, None, None, Some(7.0)];
        let filled = interpolate(&mut v, InterpolationMethod::ForwardFill, 2);
        assert_eq!(filled, 1);
        assert_eq!(v[1], Some(1.0));
        assert_eq!(v[3], None);
    }

    #[test]
    fn linear_fill_interpolates_between_neighbours() {
        let mut v = vec![Some(0.0), None, None, Some(3.0)];
        interpolate(&mut v, InterpolationMethod::Linear, 2);
        assert_eq!(v, vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn leading_and_trailing_missing_stay_missing() {
        let mut v = vec![None, Some(1.0), Some(2.0), None];
        assert_eq!(interpolate(&mut v, InterpolationMethod::ForwardFill, 5), 0);
        assert_eq!(v[0], None);
        assert_eq!(v[3], None);
    }

    #[test]
    fn out_of_bounds_values_are_warned_and_remediated() {
        let mut f = frame(vec![Some(10.0), Some(-5.0), Some(12.0), Some(11.0), Some(13.0),
            Some(10.0), Some(10.0), Some(10.0), Some(10.0), Some(10.0), Some(10.0)]);
        let mut policy = ValidationPolicy::default();
        policy.bounds.insert(EntityId::from("load"), ValueBounds::non_negative());

        let report = validate_frame(&mut f, &HashMap::new(), &policy);

        assert_eq!(report.warnings.len(), 1);
        assert!(report.errors.is_empty());
        assert_eq!(f.columns[0].values[1], Some(10.0));
    }

    #[test]
    fn too_many_issues_escalate_to_error() {
        let mut f = frame(vec![Some(-1.0), Some(-1.0), Some(5.0), Some(6.0)]);
        let mut policy = ValidationPolicy::default();
        policy.bounds.insert(EntityId::from("load"), ValueBounds::non_negative());

        let report = validate_frame(&mut f, &HashMap::new(), &policy);
        assert!(report.has_errors_for(&EntityId::from("load")));
    }

    #[test]
    fn error_policy_rejects_interior_missing() {
        let mut f = frame(vec![Some(1.0), None, Some(3.0)]);
        let policy = ValidationPolicy {
            missing: MissingDataPolicy::Error,
            severity_threshold: 1.0,
            ..ValidationPolicy::default()
        };
        let report = validate_frame(&mut f, &HashMap::new(), &policy);
        assert!(matches!(report.errors[0], ValidationIssue::MissingData { count: 1, .. }));
    }

    #[test]
    fn filled_values_are_flagged_as_imputed() {
        let mut f = frame(vec![Some(1.0), None, Some(3.0), None]);
        let report = validate_frame(&mut f, &HashMap::new(), &ValidationPolicy::default());

        assert_eq!(report.interpolated.get(&EntityId::from("load")), Some(&1));
        let column = &f.columns[0];
        assert_eq!(column.values[1], Some(1.0));
        assert_eq!(column.imputed, vec![false, true, false, false]);
        assert_eq!(column.observed(), vec![Some(1.0), None, Some(3.0), None]);
    }

    #[test]
    fn clean_frame_has_no_findings() {
        let mut f = frame((0..24).map(|i| Some(i as f64)).collect());
        let report = validate_frame(&mut f, &HashMap::new(), &ValidationPolicy::default());
        assert!(report.is_clean());
        assert_eq!(report.profiles[0].count, 24);
        assert_eq!(report.profiles[0].median, Some(11.5));
        assert!(f.columns[0].imputed.is_empty());
    }
}

//! Walk-forward fold generation.
//!
//! A [`FoldPlan`] is a value, not a cursor: [`FoldPlan::folds`] can be called
//! any number of times and always yields the same folds, so parallel workers
//! and retries regenerate the fold set independently.
//!
//! With `E` estimation steps, `P` prediction steps and step `S`, fold `k` is
//!
//! - prediction: `[start + E + kS, start + E + kS + P)`
//! - estimation (rolling): the `E` steps right before the prediction window
//! - estimation (expanding): everything from `start` up to the prediction window
//!
//! Folds stop at the first prediction window that would run past `end`, or
//! after `max_folds`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use epflab_core::domain::{Frequency, TimeRange};

use super::state::FoldStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("invalid fold plan: {0}")]
    InvalidPlan(String),

    #[error("no fold fits in {range}: need {needed} step(s), have {available}")]
    NoFolds {
        range: String,
        needed: i64,
        available: i64,
    },

    #[error("fold {fold}: illegal transition {from} -> {to}")]
    IllegalTransition {
        fold: usize,
        from: FoldStatus,
        to: FoldStatus,
    },
}

// ─── Plan ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    #[default]
    Rolling,
    Expanding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldPlan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub frequency: Frequency,
    /// Estimation window length in steps (initial length when expanding).
    pub estimation_length: usize,
    pub prediction_length: usize,
    /// Origin advance between consecutive folds, in steps.
    pub step: usize,
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default)]
    pub max_folds: Option<usize>,
}

/// One estimation/prediction split. The estimation window ends where the
/// prediction window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fold {
    pub id: usize,
    pub estimation: TimeRange,
    pub prediction: TimeRange,
}

impl FoldPlan {
    pub fn validate(&self) -> Result<(), FoldError> {
        if self.end <= self.start {
            return Err(FoldError::InvalidPlan(format!("end {} is not after start {}", self.end, self.start)));
        }
        for (name, value) in [
            ("estimation_length", self.estimation_length),
            ("prediction_length", self.prediction_length),
            ("step", self.step),
        ] {
            if value == 0 {
                return Err(FoldError::InvalidPlan(format!("{name} must be at least 1")));
            }
        }
        if self.max_folds == Some(0) {
            return Err(FoldError::InvalidPlan("max_folds must be at least 1".into()));
        }
        Ok(())
    }

    /// Lazy, restartable iterator over the folds.
    pub fn folds(&self) -> FoldIter {
        FoldIter {
            plan: self.clone(),
            next: 0,
        }
    }

    /// All folds, or an error if the plan is invalid or fits none.
    pub fn collect(&self) -> Result<Vec<Fold>, FoldError> {
        self.validate()?;
        let folds: Vec<Fold> = self.folds().collect();
        if folds.is_empty() {
            let available = (self.end - self.start).num_seconds() / self.frequency.seconds();
            return Err(FoldError::NoFolds {
                range: format!("[{}, {})", self.start, self.end),
                needed: (self.estimation_length + self.prediction_length) as i64,
                available,
            });
        }
        Ok(folds)
    }

    fn fold(&self, k: usize) -> Option<Fold> {
        if self.estimation_length == 0 || self.prediction_length == 0 || self.step == 0 {
            return None;
        }
        if self.max_folds.is_some_and(|max| k >= max) {
            return None;
        }
        let f = self.frequency;
        let origin = f.advance(self.start, (self.estimation_length + k * self.step) as i64);
        let pred_end = f.advance(origin, self.prediction_length as i64);
        if pred_end > self.end {
            return None;
        }
        let est_start = match self.window {
            WindowKind::Rolling => f.advance(origin, -(self.estimation_length as i64)),
            WindowKind::Expanding => self.start,
        };
        Some(Fold {
            id: k,
            estimation: TimeRange::new(est_start, origin).ok()?,
            prediction: TimeRange::new(origin, pred_end).ok()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FoldIter {
    plan: FoldPlan,
    next: usize,
}

impl Iterator for FoldIter {
    type Item = Fold;

    fn next(&mut self) -> Option<Fold> {
        let fold = self.plan.fold(self.next)?;
        self.next += 1;
        Some(fold)
    }
}

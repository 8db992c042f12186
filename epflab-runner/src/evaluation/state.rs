//! Per-fold lifecycle.
//!
//! ```text
//! Pending ──> Estimating ──> Predicting ──> Scored
//!    │             │              │
//!    │             └──> Skipped <─┘
//!    └──> Cancelled
//! ```
//!
//! Scored, Skipped and Cancelled are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::folds::FoldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStatus {
    Pending,
    Estimating,
    Predicting,
    Scored,
    Skipped,
    /// Never launched because the run was cancelled.
    Cancelled,
}

impl FoldStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FoldStatus::Scored | FoldStatus::Skipped | FoldStatus::Cancelled)
    }

    pub fn can_transition_to(self, to: FoldStatus) -> bool {
        use FoldStatus::*;
        matches!(
            (self, to),
            (Pending, Estimating)
                | (Pending, Cancelled)
                | (Estimating, Predicting)
                | (Estimating, Skipped)
                | (Predicting, Scored)
                | (Predicting, Skipped)
        )
    }
}

impl fmt::Display for FoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FoldStatus::Pending => "PENDING",
            FoldStatus::Estimating => "ESTIMATING",
            FoldStatus::Predicting => "PREDICTING",
            FoldStatus::Scored => "SCORED",
            FoldStatus::Skipped => "SKIPPED",
            FoldStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Status tracker for one (model, fold, horizon) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldState {
    fold: usize,
    status: FoldStatus,
}

impl FoldState {
    pub fn new(fold: usize) -> Self {
        Self {
            fold,
            status: FoldStatus::Pending,
        }
    }

    pub fn status(&self) -> FoldStatus {
        self.status
    }

    pub fn advance(&mut self, to: FoldStatus) -> Result<(), FoldError> {
        if !self.status.can_transition_to(to) {
            return Err(FoldError::IllegalTransition {
                fold: self.fold,
                from: self.status,
                to,
            });
        }
        debug!(fold = self.fold, from = %self.status, %to, "fold transition");
        self.status = to;
        Ok(())
    }
}

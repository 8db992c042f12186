//! Dense least squares for the linear estimators.
//!
//! Designs here are small (tens of columns), so normal equations solved by
//! Gaussian elimination with partial pivoting are accurate enough and keep
//! the crate free of a linear-algebra dependency.

use super::FitError;

/// Pivots smaller than this (relative to the largest entry) mean the design
/// has no unique solution.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Solve `a · x = b` in place.
pub fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, FitError> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |m, v| m.max(v.abs()))
        .max(1.0);

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() <= SINGULAR_TOLERANCE * scale {
            return Err(FitError::SingularDesign);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(FitError::NonFinite)
    }
}

/// Linear fit `y ≈ intercept + x · coef`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub coef: Vec<f64>,
}

impl LinearFit {
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.intercept + x.iter().zip(&self.coef).map(|(a, b)| a * b).sum::<f64>()
    }
}

/// Weighted, optionally ridge-penalised least squares with an unpenalised
/// intercept. `weights = None` means unit weights.
pub fn least_squares(
    x: &[Vec<f64>],
    y: &[f64],
    weights: Option<&[f64]>,
    lambda: f64,
) -> Result<LinearFit, FitError> {
    let k = x.first().map_or(0, Vec::len);
    let p = k + 1;
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];

    for (i, (row, target)) in x.iter().zip(y).enumerate() {
        let w = weights.map_or(1.0, |w| w[i]);
        // Design row is [1, row...].
        let design = |j: usize| if j == 0 { 1.0 } else { row[j - 1] };
        for a in 0..p {
            let da = design(a) * w;
            xty[a] += da * target;
            for b in a..p {
                xtx[a][b] += da * design(b);
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            xtx[a][b] = xtx[b][a];
        }
    }
    for (j, row) in xtx.iter_mut().enumerate().skip(1) {
        row[j] += lambda;
    }

    let beta = solve(xtx, xty)?;
    Ok(LinearFit {
        intercept: beta[0],
        coef: beta[1..].to_vec(),
    })
}
